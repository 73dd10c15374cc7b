//! The transport multiplexer.
//!
//! Batches logical requests into physical transfers and keeps the
//! application usable across connection loss and session loss.
//!
//! # Connection states
//!
//! ```text
//!            connection failure              probe ok, session active
//!   Normal ─────────────────────► Interrupted ─────────────────────► Normal
//!     │                               │
//!     │ 401                           │ 401 / probe: session inactive
//!     ▼                               ▼
//!  Paralyzed ◄────────────────────────┘          (terminal)
//! ```
//!
//! While interrupted, new transfers wait in the outage queue. Once the
//! connection is back the queue drains one transfer at a time: the next
//! one is sent when the previous one completes.
//!
//! The multiplexer does no I/O itself. A [`Transport`] performs transfers
//! and its completions are fed back through [`Multiplexer::complete`];
//! a [`Prober`] signals restoration through [`Multiplexer::restore`].
//! All operations take `&mut self`, so every state change happens on one
//! serialized chain of calls.

use std::collections::{HashMap, VecDeque};

use batchline_core::{
    ConnectionState, EnvelopeBuilder, ParalyzeReason, ProbeResponse, REASON_HEADER, RequestId,
    ResponseEnvelope, SubsystemId, UsageError,
};
use serde_json::Value;

use crate::transfer::TransferIds;
use crate::{
    Completion, DummyResponseHandler, Headers, MultiplexerConfig, Observer, PhysicalTransfer,
    Prober, ProberFactory, ResponseHandler, ResponseRouter, TransferId, Transport,
};

/// What [`Multiplexer::cancel_active_request`] managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The request will never reach the server.
    Discarded,
    /// The request still goes out with its batch; its response is ignored.
    Muted,
    /// The request is not pending, queued or in flight.
    Unknown,
}

/// Client-side transport multiplexer.
///
/// - `R` receives decoded responses and failures.
/// - `T` performs the physical transfers.
/// - `F` builds a prober whenever the connection is interrupted.
pub struct Multiplexer<R, T, F>
where
    F: ProberFactory,
{
    router: R,
    transport: T,
    probers: F,
    prober: Option<F::Prober>,
    observers: Vec<Box<dyn Observer>>,

    default_url: String,
    default_headers: Headers,
    request_headers: Headers,
    subsystem: SubsystemId,

    state: ConnectionState,
    envelope: EnvelopeBuilder,
    transfer_ids: TransferIds,
    /// Request id -> transfer carrying it, for transfers in flight.
    active: HashMap<RequestId, TransferId>,
    in_flight: HashMap<TransferId, PhysicalTransfer>,
    /// Transfers waiting for the connection to come back, oldest first.
    queued: VecDeque<PhysicalTransfer>,
}

impl<R, T, F> Multiplexer<R, T, F>
where
    R: ResponseRouter,
    T: Transport,
    F: ProberFactory,
{
    pub fn new(config: MultiplexerConfig, router: R, transport: T, probers: F) -> Self {
        let subsystem = SubsystemId::generate(&config.subsystem_prefix);
        Self {
            router,
            transport,
            probers,
            prober: None,
            observers: Vec::new(),
            default_url: config.default_url,
            default_headers: config.default_headers,
            request_headers: config.request_headers,
            subsystem,
            state: ConnectionState::Normal,
            envelope: EnvelopeBuilder::new(),
            transfer_ids: TransferIds::default(),
            active: HashMap::new(),
            in_flight: HashMap::new(),
            queued: VecDeque::new(),
        }
    }

    /// Add an observer. Observers are notified in subscription order.
    pub fn subscribe(&mut self, observer: impl Observer + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_paralyzed(&self) -> bool {
        self.state.is_paralyzed()
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.is_interrupted()
    }

    pub fn subsystem(&self) -> &SubsystemId {
        &self.subsystem
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut R {
        &mut self.router
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn probers(&self) -> &F {
        &self.probers
    }

    /// The prober of the current interruption, if any.
    pub fn prober(&self) -> Option<&F::Prober> {
        self.prober.as_ref()
    }

    pub fn has_queued_transfers(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Transfers waiting for restoration, oldest first.
    pub fn queued_transfers(&self) -> impl Iterator<Item = &PhysicalTransfer> {
        self.queued.iter()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Request ids added since the last reset and not yet sent.
    pub fn pending_requests(&self) -> &[RequestId] {
        self.envelope.pending()
    }

    /// True if there is nothing left to wait for.
    pub fn is_idle(&self) -> bool {
        self.is_paralyzed()
            || (self.in_flight.is_empty() && self.queued.is_empty() && !self.is_interrupted())
    }

    /// Set a header sent with every subsequent transfer.
    pub fn set_request_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.request_headers.insert(name.into(), value.into());
    }

    /// The in-flight transfer carrying `id`.
    pub fn get_active_request(&self, id: &RequestId) -> Option<&PhysicalTransfer> {
        self.active.get(id).and_then(|t| self.in_flight.get(t))
    }

    /// Start a new, empty envelope, dropping any unsent requests.
    pub fn reset(&mut self) {
        self.envelope.reset();
    }

    /// Add a JSON request to the current envelope.
    ///
    /// The returned id can be passed to [`cancel_active_request`](Self::cancel_active_request).
    pub fn add_request(
        &mut self,
        module: &str,
        action: &str,
        data: Value,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<RequestId, UsageError> {
        let id = self.envelope.add_request(module, action, data)?;
        if let Some(handler) = handler {
            self.router.add_request_response_handler(id.clone(), handler);
        }
        Ok(id)
    }

    /// Make the current envelope a raw payload.
    pub fn add_data_request(
        &mut self,
        module: &str,
        action: &str,
        data: Vec<u8>,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<RequestId, UsageError> {
        let id = self.envelope.add_data_request(module, action, data)?;
        if let Some(handler) = handler {
            self.router.add_request_response_handler(id.clone(), handler);
        }
        Ok(id)
    }

    /// Flush the envelope into a transfer and send or queue it.
    ///
    /// `url` defaults to the configured URL with the session discriminator
    /// appended; `headers` default to the configured default headers.
    /// Once paralyzed, the envelope is dropped without a transfer.
    pub fn send(&mut self, url: Option<&str>, headers: Option<&Headers>) -> Result<(), UsageError> {
        let flushed = self.envelope.flush()?;

        if self.is_paralyzed() {
            tracing::debug!(
                requests = flushed.request_ids.len(),
                "connection paralyzed, dropping envelope"
            );
            self.drop_handlers(&flushed.request_ids);
            return Ok(());
        }

        let url = match url {
            Some(url) => url.to_string(),
            None => self.subsystem.append_to(&self.default_url),
        };
        let mut merged = headers.unwrap_or(&self.default_headers).clone();
        merged.extend(
            self.request_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let transfer = PhysicalTransfer::new(self.transfer_ids.next(), url, merged, flushed);
        if self.is_interrupted() || self.has_queued_transfers() {
            tracing::debug!(
                transfer = %transfer.id(),
                queued = self.queued.len() + 1,
                "queueing transfer until the connection is restored"
            );
            self.queued.push_back(transfer);
        } else {
            self.dispatch(transfer);
        }
        Ok(())
    }

    /// [`reset`](Self::reset), [`add_request`](Self::add_request) and
    /// [`send`](Self::send) in one go.
    pub fn single_request(
        &mut self,
        module: &str,
        action: &str,
        data: Value,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<RequestId, UsageError> {
        self.reset();
        let id = self.add_request(module, action, data, handler)?;
        self.send(None, None)?;
        Ok(id)
    }

    /// Cancel a logical request as far as is still possible.
    ///
    /// A transfer is never partially aborted: the server may bundle
    /// unrelated notifications into its response. A request that must go
    /// out with its batch is muted instead, by replacing its handler with
    /// a [`DummyResponseHandler`].
    pub fn cancel_active_request(&mut self, id: &RequestId) -> Cancellation {
        if self.envelope.is_pending(id) {
            if self.envelope.pending().len() == 1 {
                self.envelope.reset();
                self.router.remove_request_response_handler(id);
                tracing::debug!(request = %id, "cancelled pending request, envelope discarded");
                return Cancellation::Discarded;
            }
            return self.mute(id);
        }

        if let Some(pos) = self.queued.iter().position(|t| t.carries(id)) {
            if self.queued[pos].carries_only(id) {
                if let Some(transfer) = self.queued.remove(pos) {
                    tracing::debug!(request = %id, transfer = %transfer.id(), "dropped queued transfer");
                }
                self.router.remove_request_response_handler(id);
                return Cancellation::Discarded;
            }
            return self.mute(id);
        }

        if let Some(transfer_id) = self.active.get(id).copied() {
            if let Some(transfer) = self.in_flight.get_mut(&transfer_id) {
                if transfer.carries_only(id) {
                    transfer.set_prevent_retry();
                }
            }
            return self.mute(id);
        }

        tracing::debug!(request = %id, "nothing to cancel");
        Cancellation::Unknown
    }

    fn mute(&mut self, id: &RequestId) -> Cancellation {
        self.router
            .add_request_response_handler(id.clone(), Box::new(DummyResponseHandler));
        tracing::debug!(request = %id, "cancelled request muted");
        Cancellation::Muted
    }

    /// Force-abort an in-flight transfer, discarding any partial response.
    ///
    /// The carried requests are forgotten and never retried. If the outage
    /// queue is draining, the next queued transfer takes its place. Returns
    /// `false` if the transfer is not in flight.
    pub fn abort_request(&mut self, transfer: TransferId) -> bool {
        let Some(mut aborted) = self.in_flight.remove(&transfer) else {
            return false;
        };
        aborted.set_prevent_retry();
        self.forget(&aborted);
        self.drop_handlers(aborted.request_ids());
        self.transport.abort(transfer);
        tracing::info!(transfer = %transfer, "transfer aborted");

        if !self.is_interrupted() && !self.is_paralyzed() {
            self.dequeue();
        }
        true
    }

    /// Process the outcome of a transfer started by the transport.
    pub fn complete(&mut self, id: TransferId, completion: Completion) {
        let Some(transfer) = self.in_flight.remove(&id) else {
            tracing::debug!(transfer = %id, "completion for unknown transfer ignored");
            return;
        };
        self.transport.finished(id);

        // The call is over whatever its outcome.
        self.forget(&transfer);

        if self.is_paralyzed() {
            tracing::debug!(transfer = %id, "connection paralyzed, dropping response");
            return;
        }

        let response = match completion {
            Completion::Response(response) => response,
            Completion::Failed(error) => {
                tracing::warn!(transfer = %id, %error, "transfer failed");
                self.connection_failed(transfer);
                return;
            }
        };

        match response.status {
            401 => {
                let reason = ParalyzeReason::from_unauthorized(response.header(REASON_HEADER));
                tracing::warn!(transfer = %id, %reason, "server rejected the session");
                self.paralyze(reason);
            }
            500 => {
                self.dequeue();
                self.receive_failure(&transfer);
            }
            200 => {
                self.dequeue();
                match ResponseEnvelope::decode(&response.body) {
                    Ok(envelope) => self.router.receive(envelope),
                    Err(e) => {
                        tracing::warn!(transfer = %id, error = %e, "unusable response body");
                        self.receive_failure(&transfer);
                    }
                }
            }
            status => {
                tracing::warn!(transfer = %id, status, "unexpected status");
                self.connection_failed(transfer);
            }
        }
    }

    /// Handle a restoration signal from the prober.
    pub fn restore(&mut self, response: Option<ProbeResponse>) {
        if !self.is_interrupted() {
            return;
        }

        if response.is_some_and(|r| r.session_lost()) {
            self.paralyze(ParalyzeReason::SessionExpired);
            return;
        }

        self.state = ConnectionState::Normal;
        tracing::info!(queued = self.queued.len(), "connection restored");
        for observer in &mut self.observers {
            observer.connection_restored();
        }

        // One at a time; the rest follow as each completes.
        self.dequeue();

        // Last, after everything the restoration triggered.
        self.stop_prober();
    }

    /// Stop all communication with the server for good.
    pub fn paralyze(&mut self, reason: ParalyzeReason) {
        if self.is_paralyzed() {
            return;
        }

        self.state = ConnectionState::Paralyzed;
        tracing::warn!(%reason, "connection paralyzed");

        let dropped = self.queued.len() + self.in_flight.len();
        let mut orphaned: Vec<RequestId> = self.envelope.pending().to_vec();
        self.envelope.discard();
        for transfer in self.queued.drain(..) {
            orphaned.extend_from_slice(transfer.request_ids());
        }
        for (id, transfer) in self.in_flight.drain() {
            orphaned.extend_from_slice(transfer.request_ids());
            self.transport.abort(id);
        }
        self.active.clear();
        self.drop_handlers(&orphaned);
        if dropped > 0 {
            tracing::debug!(dropped, "discarded outstanding transfers");
        }

        for observer in &mut self.observers {
            observer.connection_paralyzed(reason);
        }
        self.stop_prober();
    }

    fn interrupt(&mut self) {
        if self.is_interrupted() || self.is_paralyzed() {
            return;
        }

        self.state = ConnectionState::Interrupted;
        tracing::warn!(url = %self.default_url, "connection interrupted");

        let mut prober = self.probers.create(&self.default_url, &self.default_headers);
        // Observers get to see the prober before it starts.
        for observer in &mut self.observers {
            observer.connection_interrupted(&prober);
        }
        prober.start();
        self.prober = Some(prober);
    }

    fn connection_failed(&mut self, transfer: PhysicalTransfer) {
        self.interrupt();

        if transfer.prevent_retry() {
            tracing::debug!(transfer = %transfer.id(), "cancelled transfer not retried");
            self.drop_handlers(transfer.request_ids());
            return;
        }
        let retry = transfer.retry(self.transfer_ids.next());
        tracing::debug!(
            transfer = %transfer.id(),
            retry = %retry.id(),
            "queued retry"
        );
        self.queued.push_back(retry);
    }

    fn dispatch(&mut self, transfer: PhysicalTransfer) {
        if self.is_paralyzed() {
            return;
        }

        if !self.observers.iter_mut().all(|o| o.before_send(&transfer)) {
            tracing::info!(transfer = %transfer.id(), "send suppressed by observer");
            self.drop_handlers(transfer.request_ids());
            return;
        }

        for id in transfer.request_ids() {
            self.active.insert(id.clone(), transfer.id());
        }
        self.transport.start(&transfer);
        for observer in &mut self.observers {
            observer.after_send(&transfer);
        }
        self.in_flight.insert(transfer.id(), transfer);
    }

    fn dequeue(&mut self) {
        if let Some(transfer) = self.queued.pop_front() {
            tracing::debug!(
                transfer = %transfer.id(),
                remaining = self.queued.len(),
                "sending queued transfer"
            );
            self.dispatch(transfer);
        }
    }

    fn forget(&mut self, transfer: &PhysicalTransfer) {
        for id in transfer.request_ids() {
            if self.active.get(id) == Some(&transfer.id()) {
                self.active.remove(id);
            }
        }
    }

    /// Unregister handlers of requests that will never be answered.
    fn drop_handlers(&mut self, ids: &[RequestId]) {
        for id in ids {
            self.router.remove_request_response_handler(id);
        }
    }

    fn receive_failure(&mut self, transfer: &PhysicalTransfer) {
        self.router
            .receive_failure(transfer.request_data(), transfer);
    }

    fn stop_prober(&mut self) {
        if let Some(mut prober) = self.prober.take() {
            prober.stop();
        }
    }
}
