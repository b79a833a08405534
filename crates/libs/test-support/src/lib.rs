mod mock_transport;
mod probe;

pub use mock_transport::MockTransport;
pub use probe::{CollectingReporter, Recorder};

use pairsync::{ActivationState, PeerTransport, SyncConfig, SyncEngine, TransportEvent};
use std::sync::{Arc, Once};

static LOGGING: Once = Once::new();

pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .is_test(true)
            .try_init();
    });
}

/// Builds an engine over `transport` and drives it through a successful
/// activation, as the transport would on a healthy pairing.
pub fn activated_engine(config: SyncConfig, transport: &Arc<MockTransport>) -> SyncEngine {
    activated_engine_with_reporter(config, transport, Arc::new(pairsync::LogErrorReporter))
}

pub fn activated_engine_with_reporter(
    config: SyncConfig,
    transport: &Arc<MockTransport>,
    reporter: Arc<dyn pairsync::ErrorReporter>,
) -> SyncEngine {
    init_logging();
    let transport: Arc<dyn PeerTransport> = transport.clone();
    let engine = SyncEngine::with_error_reporter(config, Some(transport), reporter);
    let mut activation = engine.activate();
    engine.handle_event(TransportEvent::ActivationCompleted {
        state: ActivationState::Activated,
        error: None,
    });
    match activation.try_result() {
        Some(Ok(())) => engine,
        other => panic!("mock activation did not settle cleanly: {other:?}"),
    }
}
