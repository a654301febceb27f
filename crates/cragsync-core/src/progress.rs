//! Progress notification collaborator.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// What a progress update is counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Bytes of a download job.
    Download,
    /// Reconcile: fetching the manifest.
    Manifest,
    /// Reconcile: listing local assets.
    Enumerate,
    /// Reconcile: comparing content hashes.
    Checksum,
    /// Reconcile: re-downloading changed assets.
    Refresh,
}

/// Fire-and-forget sink for progress updates.
pub trait ProgressSink: Send + Sync {
    fn post(&self, job_id: Uuid, phase: ProgressPhase, done: i64, total: i64);
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn post(&self, _job_id: Uuid, _phase: ProgressPhase, _done: i64, _total: i64) {}
}

/// Logs updates at DEBUG.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn post(&self, job_id: Uuid, phase: ProgressPhase, done: i64, total: i64) {
        debug!("[{}] {:?} {}/{}", job_id, phase, done, total);
    }
}

/// Records every update; handy for assertions.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(Uuid, ProgressPhase, i64, i64)>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<(Uuid, ProgressPhase, i64, i64)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn post(&self, job_id: Uuid, phase: ProgressPhase, done: i64, total: i64) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((job_id, phase, done, total));
    }
}
