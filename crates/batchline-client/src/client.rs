//! Async driver running the multiplexer over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Client                            │
//! │                                                            │
//! │  mux().send() ──► HttpTransport ──► spawned POST task ──┐  │
//! │                                                         │  │
//! │  HttpProber (while interrupted) ── spawned poll task ───┤  │
//! │                                                         ▼  │
//! │  process() ◄──────────────────────────────────── events    │
//! │     └─► Multiplexer::complete / Multiplexer::restore       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Network I/O runs in spawned tasks, but every outcome comes back as a
//! [`ClientEvent`] and is applied by [`Client::process`], so the
//! multiplexer itself is only ever touched from one place.

use batchline_core::ProbeResponse;
use tokio::sync::mpsc;

use crate::{
    ClientConfig, ClientError, Completion, HttpProberFactory, HttpTransport, Multiplexer,
    ResponseRouter, TransferId,
};

/// Outcomes reported by background tasks.
#[derive(Debug)]
pub enum ClientEvent {
    /// A physical transfer finished.
    Completed {
        transfer: TransferId,
        completion: Completion,
    },
    /// The prober reached the server.
    Restored(Option<ProbeResponse>),
}

/// The multiplexer wired to [`HttpTransport`] and [`HttpProberFactory`].
pub type HttpMultiplexer<R> = Multiplexer<R, HttpTransport, HttpProberFactory>;

/// A [`Multiplexer`] over HTTP together with its event loop.
///
/// Must be created and driven inside a tokio runtime.
pub struct Client<R>
where
    R: ResponseRouter,
{
    mux: HttpMultiplexer<R>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl<R> Client<R>
where
    R: ResponseRouter,
{
    pub fn new(config: ClientConfig, router: R) -> Result<Self, ClientError> {
        let http = config.http.build_client()?;
        let (tx, events) = mpsc::unbounded_channel();

        let transport = HttpTransport::new(http.clone(), tx.clone());
        let probers = HttpProberFactory::new(http, config.prober, tx);
        let mux = Multiplexer::new(config.multiplexer, router, transport, probers);

        tracing::debug!(subsystem = %mux.subsystem(), "client created");
        Ok(Self { mux, events })
    }

    pub fn mux(&self) -> &HttpMultiplexer<R> {
        &self.mux
    }

    pub fn mux_mut(&mut self) -> &mut HttpMultiplexer<R> {
        &mut self.mux
    }

    /// Apply one event to the multiplexer.
    pub fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Completed {
                transfer,
                completion,
            } => self.mux.complete(transfer, completion),
            ClientEvent::Restored(response) => self.mux.restore(response),
        }
    }

    /// Wait for the next event and apply it. Returns `false` if no more
    /// events can arrive.
    pub async fn process(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    /// Process events until nothing is in flight or queued and the
    /// connection is not interrupted, or until it is paralyzed.
    pub async fn run_until_idle(&mut self) {
        while !self.mux.is_idle() {
            if !self.process().await {
                break;
            }
        }
    }
}
