//! Response routing.
//!
//! The multiplexer does not interpret response payloads. It registers a
//! handler per request id and hands decoded envelopes (or failures) to a
//! [`ResponseRouter`], which owns the dispatch.

use std::collections::HashMap;

use batchline_core::{RequestData, RequestId, ResponseEnvelope};
use serde_json::Value;

use crate::PhysicalTransfer;

/// Receives the response of one logical request.
pub trait ResponseHandler: Send {
    /// Called for every action the server answered for this request.
    fn handle(&mut self, action: &str, payload: &Value);

    /// Called when the transfer carrying this request failed at the request level.
    fn failure(&mut self, _request: &RequestData) {}
}

impl<F> ResponseHandler for F
where
    F: FnMut(&str, &Value) + Send,
{
    fn handle(&mut self, action: &str, payload: &Value) {
        self(action, payload)
    }
}

/// Discards everything. Installed for cancelled requests whose transfer
/// still goes out for the sake of its siblings.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyResponseHandler;

impl ResponseHandler for DummyResponseHandler {
    fn handle(&mut self, _action: &str, _payload: &Value) {}
}

/// Dispatches decoded server payloads to per-request handlers.
pub trait ResponseRouter {
    /// Register (or replace) the handler for `id`.
    fn add_request_response_handler(&mut self, id: RequestId, handler: Box<dyn ResponseHandler>);

    fn remove_request_response_handler(&mut self, id: &RequestId);

    /// Route a well-formed response.
    fn receive(&mut self, response: ResponseEnvelope);

    /// Report a request-level failure of `transfer`.
    fn receive_failure(&mut self, request: RequestData, transfer: &PhysicalTransfer);
}

/// In-process [`ResponseRouter`] keyed by request id.
///
/// Handlers are forgotten once their request has been answered or has
/// failed. Entries without a registered handler, such as notifications the
/// server bundles into a response, go to the fallback handler if one is set.
#[derive(Default)]
pub struct HandlerRouter {
    handlers: HashMap<RequestId, Box<dyn ResponseHandler>>,
    fallback: Option<Box<dyn ResponseHandler>>,
}

impl HandlerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route unclaimed entries to `fallback`.
    pub fn with_fallback(mut self, fallback: impl ResponseHandler + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn has_handler(&self, id: &RequestId) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl ResponseRouter for HandlerRouter {
    fn add_request_response_handler(&mut self, id: RequestId, handler: Box<dyn ResponseHandler>) {
        self.handlers.insert(id, handler);
    }

    fn remove_request_response_handler(&mut self, id: &RequestId) {
        self.handlers.remove(id);
    }

    fn receive(&mut self, response: ResponseEnvelope) {
        let mut answered = Vec::new();

        for entry in response.entries() {
            let id = RequestId::new(entry.request_id);
            if let Some(handler) = self.handlers.get_mut(&id) {
                handler.handle(entry.action, entry.payload);
                answered.push(id);
            } else if let Some(fallback) = self.fallback.as_mut() {
                fallback.handle(entry.action, entry.payload);
            } else {
                tracing::debug!(
                    module = entry.module,
                    request = entry.request_id,
                    action = entry.action,
                    "no handler for response entry"
                );
            }
        }

        for id in answered {
            self.handlers.remove(&id);
        }
    }

    fn receive_failure(&mut self, request: RequestData, transfer: &PhysicalTransfer) {
        tracing::warn!(
            transfer = %transfer.id(),
            requests = transfer.request_ids().len(),
            "request failed on the server"
        );
        for id in transfer.request_ids() {
            if let Some(mut handler) = self.handlers.remove(id) {
                handler.failure(&request);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;
    use serde_json::json;

    #[test]
    fn routes_by_request_id_and_forgets_handler() {
        let (a, a_log) = Recorder::new();
        let (b, b_log) = Recorder::new();
        let mut router = HandlerRouter::new();
        router.add_request_response_handler(RequestId::new("m1"), Box::new(a));
        router.add_request_response_handler(RequestId::new("m2"), Box::new(b));

        let body = br#"{"zarafa":{"m":{"m1":{"list":{"n":1}},"m2":{"open":{"n":2}}}}}"#;
        router.receive(ResponseEnvelope::decode(body).unwrap());

        assert_eq!(a_log.entries(), vec![("list".to_string(), json!({"n": 1}))]);
        assert_eq!(b_log.entries(), vec![("open".to_string(), json!({"n": 2}))]);
        assert!(router.is_empty());
    }

    #[test]
    fn unclaimed_entries_go_to_fallback() {
        let (fallback, log) = Recorder::new();
        let mut router = HandlerRouter::new().with_fallback(fallback);

        let body = br#"{"zarafa":{"hierarchynotifier":{"hierarchynotifier1":{"newmail":{}}}}}"#;
        router.receive(ResponseEnvelope::decode(body).unwrap());

        assert_eq!(log.entries(), vec![("newmail".to_string(), json!({}))]);
    }

    #[test]
    fn closures_are_handlers() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut router = HandlerRouter::new();
        router.add_request_response_handler(
            RequestId::new("m1"),
            Box::new(move |action: &str, _: &Value| sink.lock().unwrap().push(action.to_string())),
        );

        router.receive(ResponseEnvelope::decode(br#"{"zarafa":{"m":{"m1":{"item":{}}}}}"#).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["item".to_string()]);
    }

    #[test]
    fn dummy_handler_swallows_response() {
        let mut router = HandlerRouter::new();
        router.add_request_response_handler(RequestId::new("m1"), Box::new(DummyResponseHandler));
        router.receive(ResponseEnvelope::decode(br#"{"zarafa":{"m":{"m1":{"list":{}}}}}"#).unwrap());
        assert!(!router.has_handler(&RequestId::new("m1")));
    }
}
