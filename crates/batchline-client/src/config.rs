//! Client configuration.
//!
//! Every field has a default, so a configuration file only needs the
//! values that differ:
//!
//! ```toml
//! [multiplexer]
//! default_url = "https://mail.example.com/grommunio.php"
//!
//! [multiplexer.request_headers]
//! X-Requested-With = "batchline"
//!
//! [prober]
//! max_interval_ms = 60000
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::{ClientError, Headers, ProberConfig};

/// Settings of the [`Multiplexer`](crate::Multiplexer).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Endpoint used when `send` is given no URL.
    pub default_url: String,
    /// Prefix of the per-instance session discriminator.
    pub subsystem_prefix: String,
    /// Headers used when `send` is given none.
    pub default_headers: Headers,
    /// Headers sent with every transfer. They win over per-send and default headers.
    pub request_headers: Headers,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            default_url: "grommunio.php".to_string(),
            subsystem_prefix: "webapp".to_string(),
            default_headers: Headers::from([(
                "Content-Type".to_string(),
                "application/json; charset=utf-8;".to_string(),
            )]),
            request_headers: Headers::new(),
        }
    }
}

/// Settings of the underlying HTTP client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-transfer timeout. Without one, a transfer waits as long as the server does.
    pub timeout_ms: Option<u64>,
}

impl HttpConfig {
    pub fn build_client(&self) -> Result<reqwest::Client, ClientError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        Ok(builder.build()?)
    }
}

/// Everything needed to build a [`Client`](crate::Client).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub multiplexer: MultiplexerConfig,
    pub prober: ProberConfig,
    pub http: HttpConfig,
}
