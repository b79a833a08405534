use crate::transport::TransportErrorCode;
use serde::{Deserialize, Serialize};

/// Where a transport failure was observed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    Send,
    ContextUpdate,
    TransferCompletion,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    BadPayload,
    Unhandled,
    RetryQueue,
    FailedToDeliver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeGroup {
    Session,
    FileAccess,
    Generic,
    Structural,
    Delivery,
    Reply,
    Unknown,
}

pub fn group_of(code: TransportErrorCode) -> CodeGroup {
    use TransportErrorCode as C;
    match code {
        C::SessionNotSupported
        | C::SessionMissingDelegate
        | C::SessionNotActivated
        | C::SessionInactive
        | C::DeviceNotPaired
        | C::CompanionAppNotInstalled
        | C::NotReachable
        | C::CounterpartAppNotInstalled
        | C::CompanionOnlyApp => CodeGroup::Session,
        C::FileAccessDenied | C::InsufficientSpace => CodeGroup::FileAccess,
        C::Generic => CodeGroup::Generic,
        C::InvalidParameter | C::PayloadTooLarge | C::PayloadUnsupportedTypes => {
            CodeGroup::Structural
        }
        C::DeliveryFailed | C::TransferTimedOut => CodeGroup::Delivery,
        C::MessageReplyTimedOut | C::MessageReplyFailed => CodeGroup::Reply,
        C::Other(_) | C::Foreign => CodeGroup::Unknown,
    }
}

const VERDICTS: &[(CodeGroup, [Verdict; 3])] = &[
    (CodeGroup::Session, [Verdict::Unhandled, Verdict::Unhandled, Verdict::Unhandled]),
    (CodeGroup::FileAccess, [Verdict::Unhandled, Verdict::Unhandled, Verdict::Unhandled]),
    (CodeGroup::Generic, [Verdict::Unhandled, Verdict::Unhandled, Verdict::Unhandled]),
    (CodeGroup::Structural, [Verdict::BadPayload, Verdict::BadPayload, Verdict::BadPayload]),
    (CodeGroup::Delivery, [Verdict::RetryQueue, Verdict::Unhandled, Verdict::FailedToDeliver]),
    (CodeGroup::Reply, [Verdict::RetryQueue, Verdict::Unhandled, Verdict::Unhandled]),
    (CodeGroup::Unknown, [Verdict::Unhandled, Verdict::Unhandled, Verdict::Unhandled]),
];

pub fn classify(site: CallSite, code: TransportErrorCode) -> Verdict {
    let group = group_of(code);
    let column = match site {
        CallSite::Send => 0,
        CallSite::ContextUpdate => 1,
        CallSite::TransferCompletion => 2,
    };
    VERDICTS
        .iter()
        .find(|(candidate, _)| *candidate == group)
        .map(|(_, verdicts)| verdicts[column])
        .unwrap_or(Verdict::Unhandled)
}
