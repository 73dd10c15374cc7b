//! Inbound wire types.
//!
//! Responses use the same `{ "zarafa": { ... } }` wrapper as requests.
//! Everything the server sends under it (per-request results as well as
//! unsolicited notifications) is routed from the decoded envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Body, DecodeError, ENVELOPE_KEY, RequestId};

/// A decoded response envelope: `module -> request id -> action -> payload`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    modules: Map<String, Value>,
}

impl ResponseEnvelope {
    /// Decode a response body. An empty body, invalid JSON, or a missing
    /// top-level envelope are rejected. An envelope with no modules is
    /// valid: the server had nothing to say.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }

        let mut root: Map<String, Value> = serde_json::from_slice(body)?;
        match root.remove(ENVELOPE_KEY) {
            Some(Value::Object(modules)) => Ok(Self { modules }),
            _ => Err(DecodeError::MissingEnvelope(ENVELOPE_KEY)),
        }
    }

    pub fn modules(&self) -> &Map<String, Value> {
        &self.modules
    }

    /// Flatten into `(module, id, action, payload)` entries in document order.
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        self.modules
            .iter()
            .filter_map(|(module, requests)| Some((module, requests.as_object()?)))
            .flat_map(|(module, requests)| {
                requests
                    .iter()
                    .filter_map(|(id, actions)| Some((id, actions.as_object()?)))
                    .flat_map(move |(id, actions)| {
                        actions.iter().map(move |(action, payload)| Entry {
                            module,
                            request_id: id,
                            action,
                            payload,
                        })
                    })
            })
    }
}

/// One routed item of a response envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry<'a> {
    pub module: &'a str,
    pub request_id: &'a str,
    pub action: &'a str,
    pub payload: &'a Value,
}

/// The data of a request that failed at the request level, handed back to
/// the response router for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    /// The JSON envelope that was sent, decoded again.
    Json(Value),
    /// A raw payload, or a JSON body that could not be decoded.
    Raw(Vec<u8>),
}

impl RequestData {
    /// Recover the request data from a body, decoding it if it was serialized.
    pub fn from_body(body: &Body) -> Self {
        match body {
            Body::Json(text) => serde_json::from_str(text)
                .map(RequestData::Json)
                .unwrap_or_else(|_| RequestData::Raw(text.as_bytes().to_vec())),
            Body::Raw(bytes) => RequestData::Raw(bytes.clone()),
        }
    }

    /// Request ids found under the envelope of a JSON request.
    pub fn request_ids(&self) -> Vec<RequestId> {
        let RequestData::Json(doc) = self else {
            return Vec::new();
        };
        doc.get(ENVELOPE_KEY)
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|modules| modules.values())
            .filter_map(Value::as_object)
            .flat_map(|requests| requests.keys())
            .map(|id| RequestId::new(id.as_str()))
            .collect()
    }
}

/// Body of a connectivity probe response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// `Some(false)` if the server no longer knows our session.
    #[serde(default)]
    pub active: Option<bool>,
}

impl ProbeResponse {
    /// True only if the server explicitly reported the session as gone.
    pub fn session_lost(&self) -> bool {
        self.active == Some(false)
    }
}
