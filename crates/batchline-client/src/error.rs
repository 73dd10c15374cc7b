//! Error types for the HTTP side of the client.

use thiserror::Error;

/// Errors while setting up a [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// A single failed connectivity probe. Never surfaced; the prober retries.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("probe answered with status {0}")]
    Status(u16),
}
