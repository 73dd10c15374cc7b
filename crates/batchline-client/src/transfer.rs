//! Physical transfers: one HTTP call carrying a batch of logical requests.

use std::collections::BTreeMap;
use std::fmt;

use batchline_core::{Body, Flushed, RequestData, RequestId};

/// Request headers, by name.
pub type Headers = BTreeMap<String, String>;

/// Identifier of a physical transfer. A retry gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing [`TransferId`]s.
#[derive(Debug, Default)]
pub(crate) struct TransferIds {
    last: u64,
}

impl TransferIds {
    pub(crate) fn next(&mut self) -> TransferId {
        self.last += 1;
        TransferId(self.last)
    }
}

/// One outbound HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalTransfer {
    id: TransferId,
    url: String,
    headers: Headers,
    body: Body,
    request_ids: Vec<RequestId>,
    prevent_retry: bool,
}

impl PhysicalTransfer {
    pub(crate) fn new(id: TransferId, url: String, headers: Headers, flushed: Flushed) -> Self {
        Self {
            id,
            url,
            headers,
            body: flushed.body,
            request_ids: flushed.request_ids,
            prevent_retry: false,
        }
    }

    /// A copy of this transfer to replay after the connection comes back.
    pub(crate) fn retry(&self, id: TransferId) -> Self {
        Self {
            id,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            request_ids: self.request_ids.clone(),
            prevent_retry: false,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Logical requests carried, in batch order.
    pub fn request_ids(&self) -> &[RequestId] {
        &self.request_ids
    }

    pub fn carries(&self, id: &RequestId) -> bool {
        self.request_ids.contains(id)
    }

    /// True if `id` is the only logical request in this transfer.
    pub fn carries_only(&self, id: &RequestId) -> bool {
        self.request_ids.len() == 1 && self.request_ids[0] == *id
    }

    /// If set, a connection failure drops this transfer instead of queueing a retry.
    pub fn prevent_retry(&self) -> bool {
        self.prevent_retry
    }

    pub(crate) fn set_prevent_retry(&mut self) {
        self.prevent_retry = true;
    }

    /// The data that was sent, decoded if it was serialized.
    pub fn request_data(&self) -> RequestData {
        RequestData::from_body(&self.body)
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,

    /// Response headers (lowercase keys).
    pub headers: Vec<(String, String)>,

    /// The response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_lowercase(), value.to_string()));
        self
    }

    /// Look up a response header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k == &lower)
            .map(|(_, v)| v.as_str())
    }
}

/// How a physical transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The server answered, whatever the status.
    Response(HttpResponse),
    /// No answer: refused, reset, timed out.
    Failed(String),
}
