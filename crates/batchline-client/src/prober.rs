//! Connectivity probing while the connection is interrupted.

use std::time::Duration;

use batchline_core::{ProbeResponse, url_append};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{ClientEvent, Headers, ProbeError};

/// Polls the server until it answers again.
///
/// A prober reports restoration through whatever event path its factory
/// wired up; the multiplexer only starts and stops it.
pub trait Prober: Send {
    /// The URL being polled.
    fn url(&self) -> &str;

    fn start(&mut self);

    /// Stop polling. Calling this on a stopped prober does nothing.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Creates a [`Prober`] for each interruption.
pub trait ProberFactory {
    type Prober: Prober + 'static;

    fn create(&mut self, url: &str, headers: &Headers) -> Self::Prober;
}

/// Polling schedule for [`HttpProber`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProberConfig {
    /// Delay before the first probe.
    pub initial_interval_ms: u64,
    /// Upper bound for the delay between probes.
    pub max_interval_ms: u64,
    /// Delay multiplier after each failed probe.
    pub backoff_factor: u32,
    /// Timeout of a single probe request.
    pub timeout_ms: u64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            max_interval_ms: 300_000,
            backoff_factor: 2,
            timeout_ms: 10_000,
        }
    }
}

impl ProberConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms).min(self.max_interval())
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The delay to wait after a probe that followed `current` failed.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.backoff_factor.max(1))
            .min(self.max_interval())
    }
}

/// Query fragment marking a request as a probe.
const PROBE_QUERY: &str = "service=ping";

/// [`Prober`] that POSTs to the server on a backoff schedule.
///
/// The first `200` ends polling with a restoration event carrying the
/// decoded `{ "active": bool }` body, if there was one. A `401` means the
/// server is back but our session is not, and is reported as inactive.
#[derive(Debug)]
pub struct HttpProber {
    http: reqwest::Client,
    url: String,
    headers: Headers,
    config: ProberConfig,
    events: mpsc::UnboundedSender<ClientEvent>,
    task: Option<JoinHandle<()>>,
}

impl Prober for HttpProber {
    fn url(&self) -> &str {
        &self.url
    }

    fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let task = poll(
            self.http.clone(),
            self.url.clone(),
            self.headers.clone(),
            self.config.clone(),
            self.events.clone(),
        );
        self.task = Some(tokio::spawn(task));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(url = %self.url, "prober stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for HttpProber {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll(
    http: reqwest::Client,
    url: String,
    headers: Headers,
    config: ProberConfig,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut interval = config.initial_interval();
    loop {
        tokio::time::sleep(interval).await;

        match probe(&http, &url, &headers, config.timeout()).await {
            Ok(response) => {
                tracing::info!(url = %url, "server reachable again");
                let _ = events.send(ClientEvent::Restored(response));
                return;
            }
            Err(e) => {
                interval = config.next_interval(interval);
                tracing::debug!(error = %e, retry_in = ?interval, "probe failed");
            }
        }
    }
}

async fn probe(
    http: &reqwest::Client,
    url: &str,
    headers: &Headers,
    timeout: Duration,
) -> Result<Option<ProbeResponse>, ProbeError> {
    let mut request = http.post(url).timeout(timeout);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await?;
    match response.status() {
        StatusCode::OK => {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body).ok())
        }
        StatusCode::UNAUTHORIZED => Ok(Some(ProbeResponse {
            active: Some(false),
        })),
        status => Err(ProbeError::Status(status.as_u16())),
    }
}

/// Builds [`HttpProber`]s sharing one HTTP client and event channel.
#[derive(Debug, Clone)]
pub struct HttpProberFactory {
    http: reqwest::Client,
    config: ProberConfig,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl HttpProberFactory {
    pub fn new(
        http: reqwest::Client,
        config: ProberConfig,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            http,
            config,
            events,
        }
    }
}

impl ProberFactory for HttpProberFactory {
    type Prober = HttpProber;

    fn create(&mut self, url: &str, headers: &Headers) -> HttpProber {
        HttpProber {
            http: self.http.clone(),
            url: url_append(url, PROBE_QUERY),
            headers: headers.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            task: None,
        }
    }
}
