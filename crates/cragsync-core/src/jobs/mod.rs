//! Download job state, handles and bookkeeping.

pub mod ledger;
pub mod registry;

pub use ledger::{JobLedger, LedgerEntry};
pub use registry::{JobRegistry, Registration};

use crate::cancel::CancellationToken;
use crate::error::ErrorKind;
use crate::node::Pin;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_live(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

/// Result of the asset step for one visited node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeOutcome {
    pub pin: Pin,
    pub result: Result<(), ErrorKind>,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub id: JobId,
    pub pin: Pin,
    /// `Err` carries the first per-node failure, or `Cancelled`.
    pub result: Result<(), ErrorKind>,
    pub nodes: Vec<NodeOutcome>,
    pub bytes_done: i64,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        if self.result.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        }
    }

    /// Outcome recorded for `pin`, if it was visited.
    pub fn node(&self, pin: &Pin) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| &n.pin == pin)
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub pin: Pin,
    pub state: JobState,
    pub bytes_done: i64,
    /// `-1` while the total is unknown.
    pub bytes_total: i64,
    pub nodes_visited: usize,
    pub outcome: Option<Arc<JobOutcome>>,
}

impl JobSnapshot {
    pub fn queued(id: JobId, pin: Pin) -> Self {
        Self {
            id,
            pin,
            state: JobState::Queued,
            bytes_done: 0,
            bytes_total: -1,
            nodes_visited: 0,
            outcome: None,
        }
    }

    pub fn finished(outcome: Arc<JobOutcome>) -> Self {
        Self {
            id: outcome.id,
            pin: outcome.pin.clone(),
            state: outcome.state(),
            bytes_done: outcome.bytes_done,
            bytes_total: outcome.bytes_done,
            nodes_visited: outcome.nodes.len(),
            outcome: Some(outcome),
        }
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().and_then(|o| o.result.err())
    }
}

/// Caller-side handle to a queued or running job.
///
/// Pull with [`JobHandle::poll`], push with [`JobHandle::subscribe`], or
/// await the terminal outcome with [`JobHandle::wait`].
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    pin: Pin,
    rx: watch::Receiver<JobSnapshot>,
    cancel: CancellationToken,
    registry: Arc<JobRegistry>,
}

impl JobHandle {
    pub(crate) fn new(registration: &Registration, registry: Arc<JobRegistry>) -> Self {
        Self {
            id: registration.id,
            pin: registration.pin.clone(),
            rx: registration.tx.subscribe(),
            cancel: registration.cancel.clone(),
            registry,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pin(&self) -> &Pin {
        &self.pin
    }

    /// Latest snapshot. Observing a terminal snapshot starts its grace period.
    pub fn poll(&self) -> JobSnapshot {
        let snapshot = self.rx.borrow().clone();
        if snapshot.state.is_terminal() {
            self.registry.mark_observed(&self.pin, self.id);
        }
        snapshot
    }

    /// Receive every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.rx.clone()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome.
    pub async fn wait(&self) -> Arc<JobOutcome> {
        let mut rx = self.rx.clone();
        loop {
            let published = rx.borrow_and_update().outcome.clone();
            if let Some(outcome) = published {
                self.registry.mark_observed(&self.pin, self.id);
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Worker vanished without publishing an outcome.
                let outcome = Arc::new(JobOutcome {
                    id: self.id,
                    pin: self.pin.clone(),
                    result: Err(ErrorKind::Internal),
                    nodes: Vec::new(),
                    bytes_done: rx.borrow().bytes_done,
                });
                return outcome;
            }
        }
    }
}
