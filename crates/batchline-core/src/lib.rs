//! Core types for the batchline transport.
//!
//! This crate provides the protocol primitives: request ids, the outgoing
//! envelope, inbound decoding and the connection vocabulary. It performs
//! no I/O; `batchline-client` drives it over HTTP.

mod envelope;
mod error;
mod message;
mod request_id;
mod session;

pub use envelope::{Body, ENVELOPE_KEY, EnvelopeBuilder, Flushed};
pub use error::{DecodeError, UsageError};
pub use message::{Entry, ProbeResponse, RequestData, ResponseEnvelope};
pub use request_id::{DEFAULT_PREFIX, RequestId, RequestIdGenerator};
pub use session::{SUBSYSTEM_PARAM, SubsystemId, url_append};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Response header explaining a 401.
pub const REASON_HEADER: &str = "X-Zarafa-Hresult";

/// [`REASON_HEADER`] value for a workstation or account that is not allowed to log on.
pub const INVALID_WORKSTATION: &str = "MAPI_E_INVALID_WORKSTATION_ACCOUNT";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Transfers are sent as soon as they are built.
    #[default]
    Normal,
    /// Connection lost, transfers are queued until a probe succeeds.
    Interrupted,
    /// Session gone for good. Nothing is sent or processed any more.
    Paralyzed,
}

impl ConnectionState {
    pub fn is_paralyzed(self) -> bool {
        self == ConnectionState::Paralyzed
    }

    pub fn is_interrupted(self) -> bool {
        self == ConnectionState::Interrupted
    }
}

/// Why the connection was paralyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParalyzeReason {
    /// The application is shutting down.
    Unloading,
    /// The server session timed out or was lost.
    SessionExpired,
    /// The account or workstation may not use this session.
    SessionInvalid,
}

impl ParalyzeReason {
    /// Interpret the [`REASON_HEADER`] of a 401 response.
    pub fn from_unauthorized(reason: Option<&str>) -> Self {
        match reason {
            Some(INVALID_WORKSTATION) => ParalyzeReason::SessionInvalid,
            _ => ParalyzeReason::SessionExpired,
        }
    }
}

impl fmt::Display for ParalyzeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParalyzeReason::Unloading => "unloading",
            ParalyzeReason::SessionExpired => "session expired",
            ParalyzeReason::SessionInvalid => "session invalid",
        })
    }
}
