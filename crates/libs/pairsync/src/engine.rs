use crate::codec::Codec;
use crate::config::SyncConfig;
use crate::error::{ErrorReporter, LogErrorReporter, SyncError};
use crate::message::{RawPayload, SyncMessage};
use crate::registry::{decode_with, DecodedMessage, KindId, TypeRegistry};
use crate::router::{self, DeliveryRouter, Route};
use crate::session::{Facets, SessionSnapshot, SessionState, SessionStateMachine};
use crate::stream::MessageStream;
use crate::subscription::{
    run_all, Executor, Inline, Pool, SubscriptionHandle, SubscriptionRegistry,
};
use crate::tracker::{Completion, TransferKind, TransferOutcome, TransferTracker};
use crate::transport::{
    ActivationState, MessageChannel, PeerTransport, ReceivedFile, TransferId, TransportError,
    TransportEvent,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Result of a successful send.
#[derive(Debug)]
#[must_use]
pub enum SendReceipt {
    /// Acknowledged by the peer over the realtime channel.
    Delivered,
    /// Accepted into the durable queue; settles when the transport reports
    /// the transfer finished.
    Sent(PendingTransfer),
}

impl SendReceipt {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    pub fn into_pending(self) -> Option<PendingTransfer> {
        match self {
            Self::Delivered => None,
            Self::Sent(pending) => Some(pending),
        }
    }
}

fn tracking_ended() -> SyncError {
    SyncError::Unhandled(TransportError::foreign("transfer tracking ended before completion"))
}

/// A queued or file transfer awaiting its completion.
#[derive(Debug)]
pub struct PendingTransfer {
    id: TransferId,
    kind: TransferKind,
    rx: oneshot::Receiver<TransferOutcome>,
}

impl PendingTransfer {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub async fn settled(self) -> TransferOutcome {
        self.rx.await.unwrap_or_else(|_| Err(tracking_ended()))
    }

    /// Blocks the current thread. Must not be called from async code.
    pub fn blocking_settled(self) -> TransferOutcome {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(tracking_ended()))
    }

    pub fn try_settled(&mut self) -> Option<TransferOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(tracking_ended())),
        }
    }
}

#[derive(Debug)]
pub struct PendingActivation {
    rx: oneshot::Receiver<Result<(), SyncError>>,
}

impl PendingActivation {
    fn settled(result: Result<(), SyncError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub async fn wait(self) -> Result<(), SyncError> {
        self.rx.await.unwrap_or(Err(SyncError::ActivationFailed(None)))
    }

    /// Blocks the current thread. Must not be called from async code.
    pub fn blocking_wait(self) -> Result<(), SyncError> {
        self.rx.blocking_recv().unwrap_or(Err(SyncError::ActivationFailed(None)))
    }

    pub fn try_result(&mut self) -> Option<Result<(), SyncError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(SyncError::ActivationFailed(None)))
            }
        }
    }
}

struct EngineState {
    kinds: TypeRegistry,
    subscriptions: SubscriptionRegistry,
    tracker: TransferTracker,
    session: SessionStateMachine,
    activation_waiters: Vec<oneshot::Sender<Result<(), SyncError>>>,
}

struct EngineInner {
    config: SyncConfig,
    codec: Codec,
    router: DeliveryRouter,
    reporter: Arc<dyn ErrorReporter>,
    state: Mutex<EngineState>,
}

/// Delivery engine for one paired peer.
///
/// Cheap to clone; clones share all state. Feed transport notifications to
/// [`SyncEngine::handle_event`] from any thread.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, transport: Option<Arc<dyn PeerTransport>>) -> Self {
        Self::with_error_reporter(config, transport, Arc::new(LogErrorReporter))
    }

    pub fn with_error_reporter(
        config: SyncConfig,
        transport: Option<Arc<dyn PeerTransport>>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let state = EngineState {
            kinds: TypeRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            tracker: TransferTracker::new(config.unclaimed_capacity),
            session: SessionStateMachine::new(config.role),
            activation_waiters: Vec::new(),
        };
        let inner = EngineInner {
            codec: config.codec(),
            router: DeliveryRouter::new(transport),
            config,
            reporter,
            state: Mutex::new(state),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn session(&self) -> SessionSnapshot {
        self.inner.state.lock().session.snapshot()
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.lock().session.subscribe()
    }

    pub fn pending_transfers(&self) -> usize {
        self.inner.state.lock().tracker.pending_len()
    }

    /// Registered listeners in `pool`, counting released ones not yet pruned.
    pub fn listener_count(&self, pool: Pool) -> usize {
        self.inner.state.lock().subscriptions.len(pool)
    }

    /// Starts session activation. Every caller waiting on an activation in
    /// flight is settled by the same completion.
    pub fn activate(&self) -> PendingActivation {
        let transport = match self.inner.router.transport() {
            Ok(transport) => Arc::clone(transport),
            Err(err) => return PendingActivation::settled(Err(err)),
        };
        let (tx, rx) = oneshot::channel();
        let should_activate = {
            let mut state = self.inner.state.lock();
            if state.session.state() == SessionState::Activated {
                let _ = tx.send(Ok(()));
                return PendingActivation { rx };
            }
            state.activation_waiters.push(tx);
            state.session.begin_activation()
        };
        if should_activate {
            log::debug!("activating peer session");
            transport.activate();
        }
        PendingActivation { rx }
    }

    pub fn register<T: SyncMessage>(&self) -> Result<KindId, SyncError> {
        self.inner.state.lock().kinds.register::<T>()
    }

    pub fn send<T: SyncMessage>(&self, message: &T) -> Result<SendReceipt, SyncError> {
        self.register::<T>()?;
        let payload = self.inner.codec.encode(message)?;
        self.send_raw(payload)
    }

    pub fn send_raw(&self, payload: RawPayload) -> Result<SendReceipt, SyncError> {
        let (transport, reachable) = {
            let state = self.inner.state.lock();
            self.inner.router.ready(&state.session)?
        };
        match router::deliver(transport.as_ref(), reachable, &payload) {
            Ok(Route::Delivered) => Ok(SendReceipt::Delivered),
            Ok(Route::Queued(id)) => Ok(SendReceipt::Sent(self.track(id, TransferKind::Durable))),
            Err(err) => Err(self.report_unhandled(err)),
        }
    }

    /// Replaces the application context seen by the peer. Only the latest
    /// context is kept by the transport.
    pub fn update_context(&self, context: RawPayload) -> Result<(), SyncError> {
        let (transport, _) = {
            let state = self.inner.state.lock();
            self.inner.router.ready(&state.session)?
        };
        router::update_context(transport.as_ref(), &context)
            .map_err(|err| self.report_unhandled(err))
    }

    pub fn transfer_file(
        &self,
        path: impl AsRef<Path>,
        metadata: Option<RawPayload>,
    ) -> Result<PendingTransfer, SyncError> {
        let (transport, _) = {
            let state = self.inner.state.lock();
            self.inner.router.ready(&state.session)?
        };
        let id = router::transfer_file(transport.as_ref(), path.as_ref(), metadata.as_ref());
        Ok(self.track(id, TransferKind::File))
    }

    /// Listens for decoded messages of kind `T` only.
    pub fn subscribe<T, F>(
        &self,
        executor: Arc<dyn Executor>,
        listener: F,
    ) -> Result<SubscriptionHandle, SyncError>
    where
        T: SyncMessage,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let kind = state.kinds.register::<T>()?;
        let typed = Arc::new(move |message: &DecodedMessage| {
            if let Some(value) = message.downcast_ref::<T>() {
                listener(value);
            }
        });
        Ok(state.subscriptions.subscribe_typed(Some(kind), executor, typed))
    }

    /// Listens for every decoded message regardless of kind.
    pub fn subscribe_all<F>(&self, executor: Arc<dyn Executor>, listener: F) -> SubscriptionHandle
    where
        F: Fn(&DecodedMessage) + Send + Sync + 'static,
    {
        self.inner.state.lock().subscriptions.subscribe_typed(None, executor, Arc::new(listener))
    }

    /// Listens for inbound payloads no registered kind could decode.
    pub fn subscribe_raw<F>(&self, executor: Arc<dyn Executor>, listener: F) -> SubscriptionHandle
    where
        F: Fn(&RawPayload) + Send + Sync + 'static,
    {
        self.inner.state.lock().subscriptions.subscribe_raw(executor, Arc::new(listener))
    }

    pub fn subscribe_context<F>(
        &self,
        executor: Arc<dyn Executor>,
        listener: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&RawPayload) + Send + Sync + 'static,
    {
        let last_context = if self.inner.config.replay_context_on_subscribe {
            self.inner
                .router
                .transport()
                .ok()
                .and_then(|transport| transport.received_application_context())
        } else {
            None
        };
        let (handle, replay) = {
            let mut state = self.inner.state.lock();
            let handle = state.subscriptions.subscribe_context(executor, Arc::new(listener));
            let replay = last_context
                .as_ref()
                .and_then(|context| state.subscriptions.replay_context(&handle, context));
            (handle, replay)
        };
        if let Some(replay) = replay {
            replay.run();
        }
        handle
    }

    pub fn subscribe_file_transfers<F>(
        &self,
        executor: Arc<dyn Executor>,
        listener: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&ReceivedFile) + Send + Sync + 'static,
    {
        self.inner.state.lock().subscriptions.subscribe_files(executor, Arc::new(listener))
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.state.lock().subscriptions.unsubscribe(handle)
    }

    /// Streams decoded messages of kind `T`.
    pub fn messages<T: SyncMessage>(&self) -> Result<MessageStream<Arc<T>>, SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock();
        let kind = state.kinds.register::<T>()?;
        let typed = Arc::new(move |message: &DecodedMessage| {
            if let Some(value) = message.downcast::<T>() {
                let _ = tx.send(value);
            }
        });
        let handle = state.subscriptions.subscribe_typed(Some(kind), Arc::new(Inline), typed);
        Ok(MessageStream::new(handle, rx))
    }

    pub fn all_messages(&self) -> MessageStream<DecodedMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe_all(Arc::new(Inline), move |message: &DecodedMessage| {
            let _ = tx.send(message.clone());
        });
        MessageStream::new(handle, rx)
    }

    pub fn raw_messages(&self) -> MessageStream<RawPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe_raw(Arc::new(Inline), move |payload: &RawPayload| {
            let _ = tx.send(payload.clone());
        });
        MessageStream::new(handle, rx)
    }

    /// Streams application contexts, starting with the last received one
    /// when replay is enabled.
    pub fn contexts(&self) -> MessageStream<RawPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe_context(Arc::new(Inline), move |context: &RawPayload| {
            let _ = tx.send(context.clone());
        });
        MessageStream::new(handle, rx)
    }

    pub fn file_transfers(&self) -> MessageStream<ReceivedFile> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe_file_transfers(Arc::new(Inline), move |file: &ReceivedFile| {
            let _ = tx.send(file.clone());
        });
        MessageStream::new(handle, rx)
    }

    /// Applies one transport notification. Returns the reply owed to the
    /// peer for realtime messages that expect one.
    pub fn handle_event(&self, event: TransportEvent) -> Option<RawPayload> {
        match event {
            TransportEvent::ActivationCompleted { state, error } => {
                self.on_activation_completed(state, error);
                None
            }
            TransportEvent::BecameInactive => {
                self.inner.state.lock().session.transition(SessionState::Inactive);
                None
            }
            TransportEvent::Deactivated => {
                self.on_deactivated();
                None
            }
            TransportEvent::ReachabilityChanged | TransportEvent::PeerStateChanged => {
                self.refresh_facets();
                None
            }
            TransportEvent::MessageReceived { payload, channel } => {
                self.on_message(&payload);
                match channel {
                    MessageChannel::Realtime { expects_reply: true } => Some(RawPayload::new()),
                    _ => None,
                }
            }
            TransportEvent::ContextReceived { context } => {
                let scheduled = self.inner.state.lock().subscriptions.dispatch_context(&context);
                run_all(scheduled);
                None
            }
            TransportEvent::FileReceived { file } => {
                let scheduled = self.inner.state.lock().subscriptions.dispatch_file(&file);
                run_all(scheduled);
                None
            }
            TransportEvent::TransferFinished { id, error } => {
                let settlement = self.inner.state.lock().tracker.resolve(id, error);
                match settlement {
                    Some(settlement) => settlement.fire(),
                    None => log::debug!("completion for {id} has no tracked transfer yet"),
                }
                None
            }
        }
    }

    fn on_activation_completed(
        &self,
        reported: ActivationState,
        error: Option<TransportError>,
    ) {
        let facets = self.read_facets();
        let (result, waiters) = {
            let mut state = self.inner.state.lock();
            let result = state.session.complete_activation(reported, error);
            if let (Ok(()), Some(facets)) = (&result, facets) {
                state.session.update_facets(facets);
            }
            (result, std::mem::take(&mut state.activation_waiters))
        };
        match &result {
            Ok(()) => log::info!("peer session activated"),
            Err(err) => log::warn!("peer session activation failed: {err}"),
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn on_deactivated(&self) {
        let reactivate = {
            let mut state = self.inner.state.lock();
            if self.inner.config.reactivate_on_deactivation {
                state.session.begin_activation()
            } else {
                state.session.transition(SessionState::Unactivated);
                false
            }
        };
        if !reactivate {
            return;
        }
        if let Ok(transport) = self.inner.router.transport() {
            log::debug!("peer session deactivated; activating again");
            transport.activate();
        }
    }

    fn read_facets(&self) -> Option<Facets> {
        let transport = self.inner.router.transport().ok()?;
        Some(Facets {
            reachable: transport.is_reachable(),
            peer_paired: transport.is_paired(),
            peer_app_installed: transport.is_app_installed(),
        })
    }

    fn refresh_facets(&self) {
        let Some(facets) = self.read_facets() else {
            return;
        };
        if self.inner.state.lock().session.update_facets(facets) {
            log::info!("peer app installed; ready for context updates");
        }
    }

    fn on_message(&self, payload: &RawPayload) {
        let kinds = self.inner.state.lock().kinds.kinds().to_vec();
        let attempt = decode_with(&kinds, payload);
        for failure in &attempt.failures {
            self.inner.reporter.report(failure);
        }
        let scheduled = {
            let mut state = self.inner.state.lock();
            match &attempt.decoded {
                Some(message) => state.subscriptions.dispatch_typed(message),
                None => state.subscriptions.dispatch_raw(payload),
            }
        };
        run_all(scheduled);
    }

    fn track(&self, id: TransferId, kind: TransferKind) -> PendingTransfer {
        let (tx, rx) = oneshot::channel();
        let reporter = Arc::clone(&self.inner.reporter);
        let completion: Completion = Box::new(move |outcome: TransferOutcome| {
            if let Err(err @ SyncError::Unhandled(_)) = &outcome {
                reporter.report(err);
            }
            let _ = tx.send(outcome);
        });
        let settlement = self.inner.state.lock().tracker.register(id, kind, completion);
        if let Some(settlement) = settlement {
            settlement.fire();
        }
        PendingTransfer { id, kind, rx }
    }

    fn report_unhandled(&self, err: SyncError) -> SyncError {
        if matches!(err, SyncError::Unhandled(_)) {
            self.inner.reporter.report(&err);
        }
        err
    }
}
