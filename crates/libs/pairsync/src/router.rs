use crate::classify::{classify, CallSite, Verdict};
use crate::error::SyncError;
use crate::message::RawPayload;
use crate::session::SessionStateMachine;
use crate::transport::{PeerTransport, TransferId};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// The peer acknowledged the realtime message.
    Delivered,
    /// The payload sits in the durable queue under this id.
    Queued(TransferId),
}

/// Picks the channel for each outbound payload. Never holds engine state
/// while talking to the transport.
pub struct DeliveryRouter {
    transport: Option<Arc<dyn PeerTransport>>,
}

impl DeliveryRouter {
    pub fn new(transport: Option<Arc<dyn PeerTransport>>) -> Self {
        let transport = transport.filter(|transport| {
            let supported = transport.is_supported();
            if !supported {
                log::info!("peer transport reports no session support on this device");
            }
            supported
        });
        Self { transport }
    }

    pub fn transport(&self) -> Result<&Arc<dyn PeerTransport>, SyncError> {
        self.transport.as_ref().ok_or(SyncError::TransportUnavailable)
    }

    /// Runs the outbound preconditions in order and returns the transport to
    /// use together with the reachability observed at the same moment.
    pub fn ready(
        &self,
        session: &SessionStateMachine,
    ) -> Result<(Arc<dyn PeerTransport>, bool), SyncError> {
        let transport = self.transport()?;
        session.check_ready()?;
        Ok((Arc::clone(transport), session.snapshot().reachable))
    }
}

pub fn deliver(
    transport: &dyn PeerTransport,
    reachable: bool,
    payload: &RawPayload,
) -> Result<Route, SyncError> {
    if !reachable {
        let id = transport.enqueue_durable(payload);
        log::debug!("peer unreachable; queued payload as {id}");
        return Ok(Route::Queued(id));
    }
    let error = match transport.send_realtime(payload) {
        Ok(_) => return Ok(Route::Delivered),
        Err(error) => error,
    };
    match classify(CallSite::Send, error.code) {
        Verdict::RetryQueue => {
            let id = transport.enqueue_durable(payload);
            log::debug!("realtime send failed ({}); queued payload as {id}", error.code);
            Ok(Route::Queued(id))
        }
        Verdict::BadPayload => Err(SyncError::BadPayload(error)),
        Verdict::Unhandled | Verdict::FailedToDeliver => Err(SyncError::Unhandled(error)),
    }
}

pub fn update_context(
    transport: &dyn PeerTransport,
    context: &RawPayload,
) -> Result<(), SyncError> {
    let Err(error) = transport.set_application_context(context) else {
        return Ok(());
    };
    match classify(CallSite::ContextUpdate, error.code) {
        Verdict::BadPayload => Err(SyncError::BadPayload(error)),
        _ => Err(SyncError::Unhandled(error)),
    }
}

pub fn transfer_file(
    transport: &dyn PeerTransport,
    path: &Path,
    metadata: Option<&RawPayload>,
) -> TransferId {
    let id = transport.transfer_file(path, metadata);
    log::debug!("started file transfer of {} as {id}", path.display());
    id
}

#[cfg(test)]
mod tests {
    use super::{deliver, update_context, DeliveryRouter, Route};
    use crate::error::SyncError;
    use crate::message::RawPayload;
    use crate::session::{Facets, PeerRole, SessionState, SessionStateMachine};
    use crate::transport::{PeerTransport, TransferId, TransportError, TransportErrorCode};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedTransport {
        supported: bool,
        realtime: Mutex<VecDeque<Result<RawPayload, TransportError>>>,
        context: Mutex<VecDeque<Result<(), TransportError>>>,
        realtime_calls: AtomicUsize,
        enqueue_calls: AtomicUsize,
        next_id: AtomicU64,
    }

    impl ScriptedTransport {
        fn supported() -> Self {
            Self { supported: true, ..Self::default() }
        }

        fn failing_realtime(code: TransportErrorCode) -> Self {
            let transport = Self::supported();
            transport
                .realtime
                .lock()
                .expect("realtime mutex poisoned")
                .push_back(Err(TransportError::from(code)));
            transport
        }
    }

    impl PeerTransport for ScriptedTransport {
        fn is_supported(&self) -> bool {
            self.supported
        }

        fn activate(&self) {}

        fn is_reachable(&self) -> bool {
            true
        }

        fn is_paired(&self) -> bool {
            true
        }

        fn is_app_installed(&self) -> bool {
            true
        }

        fn send_realtime(&self, _payload: &RawPayload) -> Result<RawPayload, TransportError> {
            self.realtime_calls.fetch_add(1, Ordering::SeqCst);
            self.realtime
                .lock()
                .expect("realtime mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| Ok(RawPayload::new()))
        }

        fn enqueue_durable(&self, _payload: &RawPayload) -> TransferId {
            self.enqueue_calls.fetch_add(1, Ordering::SeqCst);
            TransferId(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        fn transfer_file(&self, _path: &Path, _metadata: Option<&RawPayload>) -> TransferId {
            TransferId(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        fn set_application_context(&self, _context: &RawPayload) -> Result<(), TransportError> {
            self.context.lock().expect("context mutex poisoned").pop_front().unwrap_or(Ok(()))
        }

        fn received_application_context(&self) -> Option<RawPayload> {
            None
        }
    }

    #[test]
    fn unsupported_transport_is_unavailable() {
        let router = DeliveryRouter::new(Some(Arc::new(ScriptedTransport::default())));
        assert!(matches!(router.transport(), Err(SyncError::TransportUnavailable)));
        let router = DeliveryRouter::new(None);
        let session = SessionStateMachine::new(PeerRole::Companion);
        assert!(matches!(router.ready(&session), Err(SyncError::TransportUnavailable)));
    }

    #[test]
    fn ready_reports_session_precondition_before_transport_use() {
        let router = DeliveryRouter::new(Some(Arc::new(ScriptedTransport::supported())));
        let mut session = SessionStateMachine::new(PeerRole::Initiator);
        assert!(matches!(router.ready(&session), Err(SyncError::SessionNotActivated)));
        session.transition(SessionState::Activated);
        session.update_facets(Facets {
            reachable: true,
            peer_paired: true,
            peer_app_installed: true,
        });
        let (_, reachable) = router.ready(&session).expect("ready");
        assert!(reachable);
    }

    #[test]
    fn realtime_success_is_delivered() {
        let transport = ScriptedTransport::supported();
        assert_eq!(deliver(&transport, true, &RawPayload::new()), Ok(Route::Delivered));
        assert_eq!(transport.enqueue_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unreachable_peer_goes_straight_to_queue() {
        let transport = ScriptedTransport::supported();
        assert_eq!(
            deliver(&transport, false, &RawPayload::new()),
            Ok(Route::Queued(TransferId(0)))
        );
        assert_eq!(transport.realtime_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_failure_falls_back_once() {
        let transport =
            ScriptedTransport::failing_realtime(TransportErrorCode::MessageReplyTimedOut);
        assert_eq!(
            deliver(&transport, true, &RawPayload::new()),
            Ok(Route::Queued(TransferId(0)))
        );
        assert_eq!(transport.realtime_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.enqueue_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn structural_failure_never_queues() {
        let transport = ScriptedTransport::failing_realtime(TransportErrorCode::PayloadTooLarge);
        let err = deliver(&transport, true, &RawPayload::new()).expect_err("too large");
        assert!(matches!(err, SyncError::BadPayload(_)));
        assert_eq!(transport.enqueue_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn session_failure_is_unhandled() {
        let transport = ScriptedTransport::failing_realtime(TransportErrorCode::NotReachable);
        let err = deliver(&transport, true, &RawPayload::new()).expect_err("not reachable");
        assert!(matches!(err, SyncError::Unhandled(_)));
        assert_eq!(transport.enqueue_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn context_update_maps_transient_to_unhandled() {
        let transport = ScriptedTransport::supported();
        {
            let mut script = transport.context.lock().expect("context mutex poisoned");
            script.push_back(Err(TransportError::from(TransportErrorCode::DeliveryFailed)));
            script.push_back(Err(TransportError::from(
                TransportErrorCode::PayloadUnsupportedTypes,
            )));
        }
        assert!(matches!(
            update_context(&transport, &RawPayload::new()),
            Err(SyncError::Unhandled(_))
        ));
        assert!(matches!(
            update_context(&transport, &RawPayload::new()),
            Err(SyncError::BadPayload(_))
        ));
        assert_eq!(update_context(&transport, &RawPayload::new()), Ok(()));
    }
}
