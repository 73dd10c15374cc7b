//! Outgoing envelope construction.
//!
//! A JSON envelope has the shape
//!
//! ```text
//! { "zarafa": { <module>: { <request id>: { <action>: <data> } } } }
//! ```
//!
//! and may carry any number of logical requests. A raw envelope carries
//! exactly one opaque payload. The two modes never mix within one envelope.

use serde_json::{Map, Value};

use crate::{RequestId, RequestIdGenerator, UsageError};

/// Top-level key wrapping every JSON envelope, in both directions.
pub const ENVELOPE_KEY: &str = "zarafa";

/// A flushed request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Serialized JSON envelope.
    Json(String),
    /// Opaque payload, sent verbatim.
    Raw(Vec<u8>),
}

impl Body {
    /// True if the body is a serialized JSON document that can be decoded again.
    pub fn is_encoded(&self) -> bool {
        matches!(self, Body::Json(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Json(s) => s.as_bytes(),
            Body::Raw(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Result of [`EnvelopeBuilder::flush`]: the body to send and the ids it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flushed {
    pub body: Body,
    /// Request ids in the order they were added.
    pub request_ids: Vec<RequestId>,
}

#[derive(Debug)]
enum Draft {
    Empty,
    Json(Map<String, Value>),
    Raw(Vec<u8>),
}

/// Accumulates logical requests into a single envelope.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    ids: RequestIdGenerator,
    draft: Option<Draft>,
    pending: Vec<RequestId>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any unsent envelope and pending ids and start an empty one.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.draft = Some(Draft::Empty);
    }

    /// Drop the envelope without starting a new one. Further additions
    /// fail until the next [`reset`](Self::reset).
    pub fn discard(&mut self) {
        self.pending.clear();
        self.draft = None;
    }

    /// True between a [`reset`](Self::reset) and the next flush or discard.
    pub fn is_active(&self) -> bool {
        self.draft.is_some()
    }

    pub fn has_json(&self) -> bool {
        matches!(self.draft, Some(Draft::Json(_)))
    }

    pub fn has_raw(&self) -> bool {
        matches!(self.draft, Some(Draft::Raw(_)))
    }

    /// Ids added since the last reset, in insertion order.
    pub fn pending(&self) -> &[RequestId] {
        &self.pending
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains(id)
    }

    /// Merge an action into the JSON envelope under `module` / new id / `action`.
    ///
    /// `Null` data is sent as an empty object.
    pub fn add_request(
        &mut self,
        module: &str,
        action: &str,
        data: Value,
    ) -> Result<RequestId, UsageError> {
        let draft = self.draft.as_mut().ok_or(UsageError::NotInitialised)?;
        if matches!(draft, Draft::Empty) {
            *draft = Draft::Json(Map::new());
        }
        let Draft::Json(modules) = draft else {
            return Err(UsageError::RawModeActive);
        };

        let id = self.ids.next(Some(module));
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data
        };

        let requests = modules
            .entry(module.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(requests) = requests {
            let mut actions = Map::new();
            actions.insert(action.to_string(), data);
            requests.insert(id.to_string(), Value::Object(actions));
        }

        self.pending.push(id.clone());
        Ok(id)
    }

    /// Replace the envelope with a raw payload. Only one raw request fits
    /// in an envelope; `action` is not transmitted.
    pub fn add_data_request(
        &mut self,
        module: &str,
        _action: &str,
        data: Vec<u8>,
    ) -> Result<RequestId, UsageError> {
        let draft = self.draft.as_mut().ok_or(UsageError::NotInitialised)?;
        match draft {
            Draft::Json(_) => return Err(UsageError::JsonModeActive),
            Draft::Raw(_) => return Err(UsageError::RawAlreadyPresent),
            Draft::Empty => {}
        }

        let id = self.ids.next(Some(module));
        *draft = Draft::Raw(data);
        self.pending.push(id.clone());
        Ok(id)
    }

    /// Serialize the envelope and hand over its pending ids. The builder
    /// is left inactive; the id counter carries on.
    pub fn flush(&mut self) -> Result<Flushed, UsageError> {
        if self.draft.is_none() {
            return Err(UsageError::NotInitialised);
        }
        if self.pending.is_empty() {
            return Err(UsageError::NothingQueued);
        }

        let body = match self.draft.take() {
            Some(Draft::Raw(bytes)) => Body::Raw(bytes),
            Some(Draft::Json(modules)) => Body::Json(wrap(modules).to_string()),
            Some(Draft::Empty) | None => Body::Json(wrap(Map::new()).to_string()),
        };

        Ok(Flushed {
            body,
            request_ids: std::mem::take(&mut self.pending),
        })
    }
}

fn wrap(modules: Map<String, Value>) -> Value {
    let mut root = Map::new();
    root.insert(ENVELOPE_KEY.to_string(), Value::Object(modules));
    Value::Object(root)
}
