//! Client-side transport multiplexer for the batchline protocol.
//!
//! Many logical requests are batched into one HTTP POST. Each logical
//! request is tracked on its own, so it can be cancelled, retried after a
//! connection loss, or routed to its handler when the batch comes back.
//!
//! [`Multiplexer`] holds the state machine and performs no I/O; [`Client`]
//! runs it over HTTP with [`reqwest`] and tokio.

mod client;
mod config;
mod error;
mod multiplexer;
mod observer;
mod prober;
mod router;
mod transfer;
mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientEvent, HttpMultiplexer};
pub use config::{ClientConfig, HttpConfig, MultiplexerConfig};
pub use error::{ClientError, ProbeError};
pub use multiplexer::{Cancellation, Multiplexer};
pub use observer::{ChannelObserver, ConnectionEvent, Observer};
pub use prober::{HttpProber, HttpProberFactory, Prober, ProberConfig, ProberFactory};
pub use router::{DummyResponseHandler, HandlerRouter, ResponseHandler, ResponseRouter};
pub use transfer::{Completion, Headers, HttpResponse, PhysicalTransfer, TransferId};
pub use transport::{HttpTransport, Transport};
