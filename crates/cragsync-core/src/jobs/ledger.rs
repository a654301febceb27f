//! Durable job ledger for restart recovery.
//!
//! Keeps the last known state of every pin's most recent job in `jobs.json`.
//! Entries still Queued or Running when the process starts were interrupted
//! and can be re-enqueued with their original options.

use super::{JobId, JobState};
use crate::error::{ErrorKind, Result};
use crate::node::Pin;
use crate::orchestrator::DownloadOptions;
use crate::store::atomic::{read_json, write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A single persisted job entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub pin: Pin,
    pub job_id: JobId,
    pub state: JobState,
    pub options: DownloadOptions,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerData {
    jobs: Vec<LedgerEntry>,
}

/// Manages `jobs.json`.
#[derive(Debug)]
pub struct JobLedger {
    path: PathBuf,
    // Serializes read-modify-write cycles from concurrent jobs.
    write_lock: Mutex<()>,
}

impl JobLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert the entry for `entry.pin`.
    pub fn save(&self, entry: &LedgerEntry) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut data = self.load_data();
        match data.jobs.iter_mut().find(|j| j.pin == entry.pin) {
            Some(existing) => *existing = entry.clone(),
            None => data.jobs.push(entry.clone()),
        }
        self.write_data(&data)
    }

    /// Record a state change for an existing job.
    pub fn update(&self, pin: &Pin, job_id: JobId, state: JobState, error: Option<ErrorKind>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut data = self.load_data();
        let Some(entry) = data
            .jobs
            .iter_mut()
            .find(|j| &j.pin == pin && j.job_id == job_id)
        else {
            return Ok(());
        };
        entry.state = state;
        entry.error = error;
        entry.updated_at = Utc::now();
        self.write_data(&data)
    }

    pub fn remove(&self, pin: &Pin) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut data = self.load_data();
        let before = data.jobs.len();
        data.jobs.retain(|j| &j.pin != pin);
        if data.jobs.len() < before {
            self.write_data(&data)?;
        }
        Ok(())
    }

    pub fn load_all(&self) -> Vec<LedgerEntry> {
        self.load_data().jobs
    }

    pub fn get(&self, pin: &Pin) -> Option<LedgerEntry> {
        self.load_data().jobs.into_iter().find(|j| &j.pin == pin)
    }

    /// Jobs that never reached a terminal state.
    pub fn interrupted(&self) -> Vec<LedgerEntry> {
        self.load_all()
            .into_iter()
            .filter(|j| j.state.is_live())
            .collect()
    }

    /// Read ledger data, returning empty on any error.
    fn load_data(&self) -> LedgerData {
        match read_json::<LedgerData>(&self.path) {
            Ok(Some(data)) => data,
            Ok(None) => LedgerData::default(),
            Err(e) => {
                warn!("Failed to read job ledger at {}: {}", self.path.display(), e);
                LedgerData::default()
            }
        }
    }

    fn write_data(&self, data: &LedgerData) -> Result<()> {
        debug!("Writing {} jobs to {}", data.jobs.len(), self.path.display());
        write_json(&self.path, data)
    }
}
