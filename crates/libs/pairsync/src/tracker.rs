use crate::classify::{classify, CallSite, Verdict};
use crate::error::SyncError;
use crate::transport::{TransferId, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Durable,
    File,
}

pub type TransferOutcome = Result<(), SyncError>;

pub type Completion = Box<dyn FnOnce(TransferOutcome) + Send + 'static>;

struct TrackedTransfer {
    kind: TransferKind,
    completion: Completion,
}

/// A finished transfer whose completion has not run yet. Fire it after
/// releasing any lock guarding the tracker.
#[must_use]
pub struct Settlement {
    pub id: TransferId,
    pub outcome: TransferOutcome,
    completion: Completion,
}

impl Settlement {
    pub fn fire(self) {
        (self.completion)(self.outcome);
    }
}

pub fn transfer_outcome(kind: TransferKind, error: Option<TransportError>) -> TransferOutcome {
    let Some(error) = error else {
        return Ok(());
    };
    match kind {
        TransferKind::File => Err(SyncError::FailedToSend(error)),
        TransferKind::Durable => match classify(CallSite::TransferCompletion, error.code) {
            Verdict::BadPayload => Err(SyncError::BadPayload(error)),
            Verdict::FailedToDeliver | Verdict::RetryQueue => {
                Err(SyncError::FailedToDeliver(error))
            }
            Verdict::Unhandled => Err(SyncError::Unhandled(error)),
        },
    }
}

/// Correlates transfer ids with the completions awaiting them.
///
/// The transport only reveals an id when the enqueue call returns, so its
/// completion may be observed before [`TransferTracker::register`] runs.
/// Such completions are parked in a bounded FIFO until claimed. Ids that
/// already settled are remembered in a FIFO of the same bound so repeated
/// completions for them are dropped.
pub struct TransferTracker {
    pending: HashMap<TransferId, TrackedTransfer>,
    unclaimed: VecDeque<(TransferId, Option<TransportError>)>,
    settled: VecDeque<TransferId>,
    unclaimed_capacity: usize,
}

impl TransferTracker {
    pub fn new(unclaimed_capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            unclaimed: VecDeque::new(),
            settled: VecDeque::new(),
            unclaimed_capacity,
        }
    }

    pub fn register(
        &mut self,
        id: TransferId,
        kind: TransferKind,
        completion: Completion,
    ) -> Option<Settlement> {
        if let Some(index) = self.unclaimed.iter().position(|(parked, _)| *parked == id) {
            let (_, error) = self.unclaimed.remove(index)?;
            log::debug!("{id} completed before it was tracked");
            self.remember_settled(id);
            return Some(Settlement { id, outcome: transfer_outcome(kind, error), completion });
        }
        if self.pending.insert(id, TrackedTransfer { kind, completion }).is_some() {
            log::warn!("{id} registered twice; earlier completion dropped");
        }
        None
    }

    pub fn resolve(&mut self, id: TransferId, error: Option<TransportError>) -> Option<Settlement> {
        match self.pending.remove(&id) {
            Some(tracked) => {
                self.remember_settled(id);
                Some(Settlement {
                    id,
                    outcome: transfer_outcome(tracked.kind, error),
                    completion: tracked.completion,
                })
            }
            None if self.settled.contains(&id) => {
                log::debug!("repeated completion for settled {id} ignored");
                None
            }
            None => {
                self.park(id, error);
                None
            }
        }
    }

    fn remember_settled(&mut self, id: TransferId) {
        if self.unclaimed_capacity == 0 {
            return;
        }
        while self.settled.len() >= self.unclaimed_capacity {
            self.settled.pop_front();
        }
        self.settled.push_back(id);
    }

    fn park(&mut self, id: TransferId, error: Option<TransportError>) {
        if self.unclaimed_capacity == 0 {
            log::debug!("ignoring completion for untracked {id}");
            return;
        }
        if self.unclaimed.iter().any(|(parked, _)| *parked == id) {
            log::debug!("duplicate completion for {id} ignored");
            return;
        }
        while self.unclaimed.len() >= self.unclaimed_capacity {
            if let Some((evicted, _)) = self.unclaimed.pop_front() {
                log::trace!("evicting unclaimed completion for {evicted}");
            }
        }
        self.unclaimed.push_back((id, error));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn unclaimed_len(&self) -> usize {
        self.unclaimed.len()
    }
}
