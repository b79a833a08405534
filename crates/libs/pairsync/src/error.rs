use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod code {
    pub const TRANSPORT_UNAVAILABLE: &str = "SYNC_TRANSPORT_UNAVAILABLE";
    pub const SESSION_NOT_ACTIVATED: &str = "SYNC_SESSION_NOT_ACTIVATED";
    pub const PEER_NOT_PAIRED: &str = "SYNC_PEER_NOT_PAIRED";
    pub const PEER_APP_NOT_INSTALLED: &str = "SYNC_PEER_APP_NOT_INSTALLED";
    pub const ACTIVATION_FAILED: &str = "SYNC_ACTIVATION_FAILED";
    pub const ENCODING_FAILED: &str = "SYNC_PAYLOAD_ENCODING_FAILED";
    pub const COMPRESSION_FAILED: &str = "SYNC_PAYLOAD_COMPRESSION_FAILED";
    pub const DECODE_FAILED: &str = "SYNC_PAYLOAD_DECODE_FAILED";
    pub const BAD_PAYLOAD: &str = "SYNC_DELIVERY_BAD_PAYLOAD";
    pub const FAILED_TO_DELIVER: &str = "SYNC_DELIVERY_FAILED_TO_DELIVER";
    pub const FAILED_TO_SEND: &str = "SYNC_DELIVERY_FAILED_TO_SEND";
    pub const UNHANDLED: &str = "SYNC_DELIVERY_UNHANDLED";
    pub const KIND_KEY_COLLISION: &str = "SYNC_REGISTRY_KIND_KEY_COLLISION";
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub enum ErrorCategory {
    Precondition,
    Payload,
    Delivery,
    Registry,
    Session,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("no peer transport is available on this device")]
    TransportUnavailable,
    #[error("peer session is not activated")]
    SessionNotActivated,
    #[error("no peer device is paired")]
    PeerNotPaired,
    #[error("companion app is not installed on the peer")]
    PeerAppNotInstalled,
    #[error("peer session failed to activate")]
    ActivationFailed(Option<TransportError>),
    #[error("failed to encode payload: {0}")]
    EncodingFailed(String),
    #[error("failed to compress payload: {0}")]
    CompressionFailed(String),
    #[error("failed to decode payload under key {key:?}: {reason}")]
    DecodeFailed { key: String, reason: String },
    #[error("payload rejected by transport: {0}")]
    BadPayload(TransportError),
    #[error("queued transfer failed to deliver: {0}")]
    FailedToDeliver(TransportError),
    #[error("file transfer failed: {0}")]
    FailedToSend(TransportError),
    #[error("unhandled transport error: {0}")]
    Unhandled(TransportError),
    #[error("kind key {key:?} already registered by {existing}")]
    KindKeyCollision { key: String, existing: &'static str },
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransportUnavailable => code::TRANSPORT_UNAVAILABLE,
            Self::SessionNotActivated => code::SESSION_NOT_ACTIVATED,
            Self::PeerNotPaired => code::PEER_NOT_PAIRED,
            Self::PeerAppNotInstalled => code::PEER_APP_NOT_INSTALLED,
            Self::ActivationFailed(_) => code::ACTIVATION_FAILED,
            Self::EncodingFailed(_) => code::ENCODING_FAILED,
            Self::CompressionFailed(_) => code::COMPRESSION_FAILED,
            Self::DecodeFailed { .. } => code::DECODE_FAILED,
            Self::BadPayload(_) => code::BAD_PAYLOAD,
            Self::FailedToDeliver(_) => code::FAILED_TO_DELIVER,
            Self::FailedToSend(_) => code::FAILED_TO_SEND,
            Self::Unhandled(_) => code::UNHANDLED,
            Self::KindKeyCollision { .. } => code::KIND_KEY_COLLISION,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransportUnavailable
            | Self::SessionNotActivated
            | Self::PeerNotPaired
            | Self::PeerAppNotInstalled => ErrorCategory::Precondition,
            Self::ActivationFailed(_) => ErrorCategory::Session,
            Self::EncodingFailed(_)
            | Self::CompressionFailed(_)
            | Self::DecodeFailed { .. }
            | Self::BadPayload(_) => ErrorCategory::Payload,
            Self::FailedToDeliver(_) | Self::FailedToSend(_) | Self::Unhandled(_) => {
                ErrorCategory::Delivery
            }
            Self::KindKeyCollision { .. } => ErrorCategory::Registry,
        }
    }

    /// Whether resending the same payload later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FailedToDeliver(_) | Self::FailedToSend(_))
    }

    /// Whether the user can resolve the failure, e.g. by pairing a device.
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, Self::PeerNotPaired | Self::PeerAppNotInstalled)
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::BadPayload(err)
            | Self::FailedToDeliver(err)
            | Self::FailedToSend(err)
            | Self::Unhandled(err) => Some(err),
            Self::ActivationFailed(err) => err.as_ref(),
            _ => None,
        }
    }
}

/// Sink for failures nobody is awaiting directly.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &SyncError);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, error: &SyncError) {
        match error.category() {
            ErrorCategory::Payload => log::warn!("{}: {error}", error.code()),
            _ => log::error!("{}: {error}", error.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{code, ErrorCategory, SyncError};
    use crate::transport::{TransportError, TransportErrorCode};

    #[test]
    fn preconditions_are_not_retryable() {
        for err in [
            SyncError::TransportUnavailable,
            SyncError::SessionNotActivated,
            SyncError::PeerNotPaired,
            SyncError::PeerAppNotInstalled,
        ] {
            assert_eq!(err.category(), ErrorCategory::Precondition);
            assert!(!err.is_retryable());
        }
        assert!(SyncError::PeerNotPaired.is_user_actionable());
        assert!(!SyncError::SessionNotActivated.is_user_actionable());
    }

    #[test]
    fn delivery_failures_carry_transport_cause() {
        let cause = TransportError::new(TransportErrorCode::TransferTimedOut, "timed out");
        let err = SyncError::FailedToDeliver(cause.clone());
        assert_eq!(err.code(), code::FAILED_TO_DELIVER);
        assert!(err.is_retryable());
        assert_eq!(err.transport_error(), Some(&cause));
        assert_eq!(SyncError::ActivationFailed(None).transport_error(), None);
    }
}
