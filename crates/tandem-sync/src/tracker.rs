use std::collections::HashMap;

use tracing::{debug, warn};

use tandem_types::{LocalId, Message, MessageStatus};

use crate::api::Draft;
use crate::config::FailurePolicy;
use crate::error::{ApiError, SyncError};
use crate::store::{MessageStore, Reconciled};

/// The operation behind a pending write, with what is needed to re-issue it.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Send(Draft),
}

impl WriteOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    InFlight { attempt: u32 },
    Failed { attempt: u32, error: String },
}

#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub local_id: LocalId,
    pub op: WriteOp,
    pub retry: RetryState,
}

/// What `fail` did with the optimistic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Discarded,
    MarkedFailed,
}

/// Tracks optimistic writes until the server confirms or rejects them.
/// Each local id has at most one pending write.
#[derive(Debug, Default)]
pub struct WriteTracker {
    pending: HashMap<LocalId, PendingWrite>,
}

impl WriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, local_id: LocalId) -> Option<&PendingWrite> {
        self.pending.get(&local_id)
    }

    /// True while any send is waiting for its HTTP response.
    pub fn has_sends_in_flight(&self) -> bool {
        self.pending
            .values()
            .any(|w| matches!(w.op, WriteOp::Send(_)) && matches!(w.retry, RetryState::InFlight { .. }))
    }

    /// Register a write. The caller applies the optimistic state to the store.
    pub fn begin(&mut self, local_id: LocalId, op: WriteOp) -> Result<(), SyncError> {
        if self.pending.contains_key(&local_id) {
            return Err(SyncError::InvalidState(format!(
                "{} already has a pending {}",
                local_id,
                op.kind()
            )));
        }
        debug!("Pending {} registered as {}", op.kind(), local_id);
        self.pending.insert(
            local_id,
            PendingWrite {
                local_id,
                op,
                retry: RetryState::InFlight { attempt: 1 },
            },
        );
        Ok(())
    }

    /// Clear the pending write and reconcile the store with the server copy.
    /// Returns `None` for a confirmation nobody is waiting for anymore.
    pub fn confirm(
        &mut self,
        local_id: LocalId,
        server: Message,
        store: &mut MessageStore,
    ) -> Option<Reconciled> {
        if self.pending.remove(&local_id).is_none() {
            debug!("Dropping orphaned confirmation for {}", local_id);
            return None;
        }
        Some(store.reconcile(local_id, server))
    }

    /// Resolve a failed write. The optimistic entry is never left as `sending`.
    pub fn fail(
        &mut self,
        local_id: LocalId,
        error: &ApiError,
        policy: FailurePolicy,
        store: &mut MessageStore,
    ) -> Option<FailOutcome> {
        let Some(write) = self.pending.get_mut(&local_id) else {
            debug!("Dropping orphaned failure for {}", local_id);
            return None;
        };
        let attempt = match write.retry {
            RetryState::InFlight { attempt } | RetryState::Failed { attempt, .. } => attempt,
        };
        warn!("{} {} failed (attempt {}): {}", write.op.kind(), local_id, attempt, error);

        match policy {
            FailurePolicy::Discard => {
                self.pending.remove(&local_id);
                store.remove_pending(local_id);
                Some(FailOutcome::Discarded)
            }
            FailurePolicy::MarkFailed => {
                write.retry = RetryState::Failed {
                    attempt,
                    error: error.to_string(),
                };
                store.set_pending_status(local_id, MessageStatus::Failed);
                Some(FailOutcome::MarkedFailed)
            }
        }
    }

    /// Re-arm a failed write on explicit user request and hand back the op
    /// to re-issue.
    pub fn retry(&mut self, local_id: LocalId, store: &mut MessageStore) -> Result<WriteOp, SyncError> {
        let write = self
            .pending
            .get_mut(&local_id)
            .ok_or_else(|| SyncError::InvalidState(format!("{} has no pending write", local_id)))?;
        let RetryState::Failed { attempt, .. } = write.retry else {
            return Err(SyncError::InvalidState(format!("{} is still in flight", local_id)));
        };
        write.retry = RetryState::InFlight { attempt: attempt + 1 };
        store.set_pending_status(local_id, MessageStatus::Sending);
        Ok(write.op.clone())
    }

    /// Forget every pending write. Requests already on the wire keep running;
    /// their results will find nothing to resolve.
    pub fn abandon(&mut self) -> Vec<LocalId> {
        self.pending.drain().map(|(local_id, _)| local_id).collect()
    }
}
