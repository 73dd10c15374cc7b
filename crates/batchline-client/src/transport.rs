//! The I/O primitive underneath the multiplexer.

use std::collections::HashMap;

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;

use crate::{ClientEvent, Completion, HttpResponse, PhysicalTransfer, TransferId};

/// Performs physical transfers.
///
/// `start` must not block: the outcome is reported later, out of band, and
/// fed back to [`Multiplexer::complete`](crate::Multiplexer::complete).
pub trait Transport {
    fn start(&mut self, transfer: &PhysicalTransfer);

    /// Abort an in-flight transfer. No completion is reported for it.
    fn abort(&mut self, id: TransferId);

    /// The completion of `id` has been processed.
    fn finished(&mut self, _id: TransferId) {}
}

/// [`Transport`] backed by [`reqwest`], one spawned task per transfer.
#[derive(Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    events: mpsc::UnboundedSender<ClientEvent>,
    running: HashMap<TransferId, AbortHandle>,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            http,
            events,
            running: HashMap::new(),
        }
    }

    /// Transfers started and not yet finished or aborted.
    pub fn running(&self) -> usize {
        self.running.len()
    }
}

impl Transport for HttpTransport {
    fn start(&mut self, transfer: &PhysicalTransfer) {
        let mut builder = self.http.post(transfer.url());
        for (name, value) in transfer.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let builder = builder.body(transfer.body().as_bytes().to_vec());

        let id = transfer.id();
        let events = self.events.clone();
        let (handle, registration) = AbortHandle::new_pair();
        let task = Abortable::new(
            async move {
                let completion = match post(builder).await {
                    Ok(response) => Completion::Response(response),
                    Err(e) => Completion::Failed(e.to_string()),
                };
                let _ = events.send(ClientEvent::Completed {
                    transfer: id,
                    completion,
                });
            },
            registration,
        );

        tokio::spawn(task);
        self.running.insert(id, handle);
        tracing::debug!(transfer = %id, url = transfer.url(), "transfer started");
    }

    fn abort(&mut self, id: TransferId) {
        if let Some(handle) = self.running.remove(&id) {
            handle.abort();
            tracing::debug!(transfer = %id, "transfer aborted");
        }
    }

    fn finished(&mut self, id: TransferId) {
        self.running.remove(&id);
    }
}

async fn post(builder: reqwest::RequestBuilder) -> Result<HttpResponse, reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status().as_u16();

    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
