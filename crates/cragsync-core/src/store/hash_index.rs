//! Source-hash index for recompressed assets.
//!
//! Stored images are re-encoded, so their bytes never match the server
//! object. The index remembers, per stored file, the hash of the source the
//! file was produced from and the hash of what was written.

use super::atomic::{read_json, write_json};
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    pub source_sha256: String,
    pub stored_sha256: String,
}

/// JSON-backed map of file name to [`HashEntry`].
#[derive(Debug)]
pub struct HashIndex {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, HashEntry>>,
    /// Held across a flush so snapshots reach disk in order.
    writer: tokio::sync::Mutex<()>,
}

impl HashIndex {
    /// Load the index at `path`, starting empty if it is missing or corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_json::<BTreeMap<String, HashEntry>>(&path) {
            Ok(Some(entries)) => entries,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read hash index at {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, file_name: &str) -> Option<HashEntry> {
        self.lock().get(file_name).cloned()
    }

    pub async fn record(&self, file_name: &str, entry: HashEntry) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot = {
            let mut entries = self.lock();
            entries.insert(file_name.to_string(), entry);
            entries.clone()
        };
        self.flush(snapshot).await
    }

    pub async fn remove(&self, file_name: &str) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot = {
            let mut entries = self.lock();
            if entries.remove(file_name).is_none() {
                return Ok(());
            }
            entries.clone()
        };
        self.flush(snapshot).await
    }

    async fn flush(&self, snapshot: BTreeMap<String, HashEntry>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_json(&path, &snapshot))
            .await
            .map_err(|e| SyncError::store(&self.path, e))?
    }

    /// Hash to compare against the server for a file whose current on-disk
    /// hash is `on_disk`.
    ///
    /// When the file is exactly what the engine wrote, the recorded source
    /// hash stands in for it; otherwise the on-disk hash is used as is.
    pub fn effective_hash(&self, file_name: &str, on_disk: &str) -> String {
        match self.get(file_name) {
            Some(entry) if entry.stored_sha256.eq_ignore_ascii_case(on_disk) => entry.source_sha256,
            _ => on_disk.to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, HashEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
