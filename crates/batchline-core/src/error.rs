//! Error types shared by the envelope builder and wire decoding.

/// Misuse of the request API. These are programming errors: they are
/// reported synchronously at the call site and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("request object not initialised, call reset() first")]
    NotInitialised,
    #[error("request object initialised with raw data")]
    RawModeActive,
    #[error("request object initialised with JSON data")]
    JsonModeActive,
    #[error("request object already contains raw data")]
    RawAlreadyPresent,
    #[error("no requests have been added, use add_request()")]
    NothingQueued,
}

/// A response body that cannot be routed. Reported to the response
/// router as a request-level failure, never as a connection failure.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("response body is empty")]
    Empty,
    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response is missing the '{0}' envelope")]
    MissingEnvelope(&'static str),
}
