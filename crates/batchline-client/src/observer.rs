//! Connection events for interested parties (typically the UI shell).

use batchline_core::{ParalyzeReason, RequestId};
use tokio::sync::mpsc;

use crate::{PhysicalTransfer, Prober, TransferId};

/// Subscriber to multiplexer events. All methods default to no-ops.
///
/// Observers are called in subscription order, synchronously, from inside
/// the multiplexer operation that caused the event.
pub trait Observer: Send {
    /// The session is gone. Nothing will be sent any more.
    fn connection_paralyzed(&mut self, _reason: ParalyzeReason) {}

    /// The connection was lost. `prober` is about to start polling.
    fn connection_interrupted(&mut self, _prober: &dyn Prober) {}

    /// A probe succeeded and queued transfers are being replayed.
    fn connection_restored(&mut self) {}

    /// Return `false` to suppress sending `transfer`.
    fn before_send(&mut self, _transfer: &PhysicalTransfer) -> bool {
        true
    }

    fn after_send(&mut self, _transfer: &PhysicalTransfer) {}
}

/// Observable events, as values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Paralyzed(ParalyzeReason),
    Interrupted { probe_url: String },
    Restored,
    Sent {
        transfer: TransferId,
        requests: Vec<RequestId>,
    },
}

/// Forwards events over a channel, for consumers living in another task.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ConnectionEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl Observer for ChannelObserver {
    fn connection_paralyzed(&mut self, reason: ParalyzeReason) {
        self.emit(ConnectionEvent::Paralyzed(reason));
    }

    fn connection_interrupted(&mut self, prober: &dyn Prober) {
        self.emit(ConnectionEvent::Interrupted {
            probe_url: prober.url().to_string(),
        });
    }

    fn connection_restored(&mut self) {
        self.emit(ConnectionEvent::Restored);
    }

    fn after_send(&mut self, transfer: &PhysicalTransfer) {
        self.emit(ConnectionEvent::Sent {
            transfer: transfer.id(),
            requests: transfer.request_ids().to_vec(),
        });
    }
}
