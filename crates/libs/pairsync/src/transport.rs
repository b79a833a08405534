use crate::message::RawPayload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure codes a peer transport may report. The numeric form follows the
/// platform session error domain so foreign codes survive a round trip.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransportErrorCode {
    Generic,
    SessionNotSupported,
    SessionMissingDelegate,
    SessionNotActivated,
    DeviceNotPaired,
    CompanionAppNotInstalled,
    NotReachable,
    InvalidParameter,
    PayloadTooLarge,
    PayloadUnsupportedTypes,
    MessageReplyFailed,
    MessageReplyTimedOut,
    FileAccessDenied,
    DeliveryFailed,
    InsufficientSpace,
    SessionInactive,
    TransferTimedOut,
    CounterpartAppNotInstalled,
    CompanionOnlyApp,
    /// A code from the session domain this crate does not know.
    Other(i64),
    /// An error that did not originate from the session domain at all.
    Foreign,
}

impl TransportErrorCode {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            7001 => Self::Generic,
            7002 => Self::SessionNotSupported,
            7003 => Self::SessionMissingDelegate,
            7004 => Self::SessionNotActivated,
            7005 => Self::DeviceNotPaired,
            7006 => Self::CompanionAppNotInstalled,
            7007 => Self::NotReachable,
            7008 => Self::InvalidParameter,
            7009 => Self::PayloadTooLarge,
            7010 => Self::PayloadUnsupportedTypes,
            7011 => Self::MessageReplyFailed,
            7012 => Self::MessageReplyTimedOut,
            7013 => Self::FileAccessDenied,
            7014 => Self::DeliveryFailed,
            7015 => Self::InsufficientSpace,
            7016 => Self::SessionInactive,
            7017 => Self::TransferTimedOut,
            7018 => Self::CounterpartAppNotInstalled,
            7019 => Self::CompanionOnlyApp,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> Option<i64> {
        let raw = match self {
            Self::Generic => 7001,
            Self::SessionNotSupported => 7002,
            Self::SessionMissingDelegate => 7003,
            Self::SessionNotActivated => 7004,
            Self::DeviceNotPaired => 7005,
            Self::CompanionAppNotInstalled => 7006,
            Self::NotReachable => 7007,
            Self::InvalidParameter => 7008,
            Self::PayloadTooLarge => 7009,
            Self::PayloadUnsupportedTypes => 7010,
            Self::MessageReplyFailed => 7011,
            Self::MessageReplyTimedOut => 7012,
            Self::FileAccessDenied => 7013,
            Self::DeliveryFailed => 7014,
            Self::InsufficientSpace => 7015,
            Self::SessionInactive => 7016,
            Self::TransferTimedOut => 7017,
            Self::CounterpartAppNotInstalled => 7018,
            Self::CompanionOnlyApp => 7019,
            Self::Other(raw) => raw,
            Self::Foreign => return None,
        };
        Some(raw)
    }
}

impl fmt::Display for TransportErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw() {
            Some(raw) => write!(f, "{self:?}({raw})"),
            None => f.write_str("Foreign"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    pub code: TransportErrorCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn foreign(message: impl Into<String>) -> Self {
        Self::new(TransportErrorCode::Foreign, message)
    }
}

impl From<TransportErrorCode> for TransportError {
    fn from(code: TransportErrorCode) -> Self {
        Self { code, message: String::new() }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    NotActivated,
    Inactive,
    Activated,
}

/// Identifier the transport assigns to a queued or file transfer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub metadata: Option<RawPayload>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageChannel {
    Realtime { expects_reply: bool },
    Durable,
}

/// Inbound notifications a transport feeds to [`crate::SyncEngine::handle_event`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum TransportEvent {
    ActivationCompleted { state: ActivationState, error: Option<TransportError> },
    BecameInactive,
    Deactivated,
    ReachabilityChanged,
    PeerStateChanged,
    MessageReceived { payload: RawPayload, channel: MessageChannel },
    ContextReceived { context: RawPayload },
    FileReceived { file: ReceivedFile },
    TransferFinished { id: TransferId, error: Option<TransportError> },
}

/// Peer session the engine delivers through.
///
/// Implementations may emit [`TransportEvent`]s from any thread, including
/// synchronously from inside one of these calls.
pub trait PeerTransport: Send + Sync {
    fn is_supported(&self) -> bool;

    fn activate(&self);

    fn is_reachable(&self) -> bool;

    fn is_paired(&self) -> bool;

    fn is_app_installed(&self) -> bool;

    fn send_realtime(&self, payload: &RawPayload) -> Result<RawPayload, TransportError>;

    fn enqueue_durable(&self, payload: &RawPayload) -> TransferId;

    fn transfer_file(&self, path: &Path, metadata: Option<&RawPayload>) -> TransferId;

    fn set_application_context(&self, context: &RawPayload) -> Result<(), TransportError>;

    fn received_application_context(&self) -> Option<RawPayload>;
}

#[cfg(test)]
mod tests {
    use super::{TransportError, TransportErrorCode};

    #[test]
    fn raw_codes_map_both_ways() {
        for raw in 7001..=7019 {
            let code = TransportErrorCode::from_raw(raw);
            assert!(!matches!(code, TransportErrorCode::Other(_)), "{raw} should be known");
            assert_eq!(code.raw(), Some(raw));
        }
        assert_eq!(TransportErrorCode::from_raw(42), TransportErrorCode::Other(42));
        assert_eq!(TransportErrorCode::Foreign.raw(), None);
    }

    #[test]
    fn display_includes_numeric_code() {
        let err = TransportError::new(TransportErrorCode::PayloadTooLarge, "65KiB");
        assert_eq!(err.to_string(), "transport error PayloadTooLarge(7009): 65KiB");
    }
}
