use crate::error::SyncError;
use crate::transport::{ActivationState, TransportError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Unactivated,
    Activating,
    Activated,
    Inactive,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unactivated => "unactivated",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Inactive => "inactive",
        }
    }
}

impl From<ActivationState> for SessionState {
    fn from(state: ActivationState) -> Self {
        match state {
            ActivationState::NotActivated => Self::Unactivated,
            ActivationState::Inactive => Self::Inactive,
            ActivationState::Activated => Self::Activated,
        }
    }
}

/// Which side of the pairing this engine runs on. Only the initiator owns
/// the pairing and installation facets.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    #[default]
    Initiator,
    Companion,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub reachable: bool,
    pub peer_paired: bool,
    pub peer_app_installed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Facets {
    pub reachable: bool,
    pub peer_paired: bool,
    pub peer_app_installed: bool,
}

fn legal_next_states(state: SessionState) -> &'static [SessionState] {
    use SessionState as S;
    match state {
        S::Unactivated => &[S::Activating, S::Activated, S::Inactive],
        S::Activating => &[S::Activated, S::Inactive, S::Unactivated],
        S::Activated => &[S::Inactive, S::Unactivated, S::Activating],
        S::Inactive => &[S::Activating, S::Activated, S::Unactivated],
    }
}

pub struct SessionStateMachine {
    role: PeerRole,
    snapshot: SessionSnapshot,
    publisher: watch::Sender<SessionSnapshot>,
}

impl SessionStateMachine {
    pub fn new(role: PeerRole) -> Self {
        let snapshot = SessionSnapshot::default();
        let (publisher, _) = watch::channel(snapshot);
        Self { role, snapshot, publisher }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.publisher.subscribe()
    }

    pub fn transition(&mut self, next: SessionState) {
        let current = self.snapshot.state;
        if current == next {
            return;
        }
        if !legal_next_states(current).contains(&next) {
            log::warn!(
                "unexpected session transition {} -> {}",
                current.as_str(),
                next.as_str()
            );
        } else {
            log::debug!("session {} -> {}", current.as_str(), next.as_str());
        }
        self.snapshot.state = next;
        self.publish();
    }

    /// Moves to `Activating` unless already there. Returns whether the
    /// transport should be asked to activate.
    pub fn begin_activation(&mut self) -> bool {
        match self.snapshot.state {
            SessionState::Activating => false,
            _ => {
                self.transition(SessionState::Activating);
                true
            }
        }
    }

    /// Applies an activation completion and returns the result owed to
    /// activation waiters.
    pub fn complete_activation(
        &mut self,
        reported: ActivationState,
        error: Option<TransportError>,
    ) -> Result<(), SyncError> {
        self.transition(reported.into());
        match (error, reported) {
            (Some(error), _) => Err(SyncError::ActivationFailed(Some(error))),
            (None, ActivationState::Activated) => Ok(()),
            (None, _) => Err(SyncError::ActivationFailed(None)),
        }
    }

    /// Returns true when the peer app just became installed.
    pub fn update_facets(&mut self, facets: Facets) -> bool {
        let became_installed = facets.peer_app_installed && !self.snapshot.peer_app_installed;
        let changed = self.snapshot.reachable != facets.reachable
            || self.snapshot.peer_paired != facets.peer_paired
            || self.snapshot.peer_app_installed != facets.peer_app_installed;
        self.snapshot.reachable = facets.reachable;
        self.snapshot.peer_paired = facets.peer_paired;
        self.snapshot.peer_app_installed = facets.peer_app_installed;
        if changed {
            self.publish();
        }
        became_installed
    }

    /// Precondition check shared by every outbound operation.
    pub fn check_ready(&self) -> Result<(), SyncError> {
        if self.snapshot.state != SessionState::Activated {
            return Err(SyncError::SessionNotActivated);
        }
        if self.role == PeerRole::Initiator {
            if !self.snapshot.peer_paired {
                return Err(SyncError::PeerNotPaired);
            }
            if !self.snapshot.peer_app_installed {
                return Err(SyncError::PeerAppNotInstalled);
            }
        }
        Ok(())
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot);
    }
}
