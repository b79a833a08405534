//! Message delivery between two paired peer devices.
//!
//! [`SyncEngine`] sends typed or raw payloads over a realtime channel when the
//! peer is reachable and falls back to a durable queue otherwise. Inbound
//! payloads are decoded against registered [`SyncMessage`] kinds and fanned
//! out to subscribers on the executors they chose, or read from a
//! [`MessageStream`].

pub mod classify;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod registry;
pub mod router;
pub mod session;
pub mod stream;
pub mod subscription;
pub mod tracker;
pub mod transport;

pub use codec::{Codec, CodecError, Compression};
pub use config::{ConfigError, SyncConfig};
pub use engine::{PendingActivation, PendingTransfer, SendReceipt, SyncEngine};
pub use error::{ErrorCategory, ErrorReporter, LogErrorReporter, SyncError};
pub use message::{RawPayload, SyncMessage};
pub use registry::{DecodedMessage, KindId};
pub use session::{PeerRole, SessionSnapshot, SessionState};
pub use stream::MessageStream;
pub use subscription::{Executor, Inline, Pool, SerialQueue, SubscriptionHandle, TokioExecutor};
pub use tracker::{TransferKind, TransferOutcome};
pub use transport::{
    ActivationState, MessageChannel, PeerTransport, ReceivedFile, TransferId, TransportError,
    TransportErrorCode, TransportEvent,
};
