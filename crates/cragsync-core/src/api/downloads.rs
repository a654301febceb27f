//! Download, status and deletion methods.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::jobs::{JobHandle, JobSnapshot, LedgerEntry};
use crate::node::{ContentNode, NodeRef, Pin};
use crate::orchestrator::DownloadOptions;
use crate::status::DownloadStatus;
use crate::SyncEngine;

impl SyncEngine {
    /// Options built from the configured settings.
    pub fn default_options(&self) -> DownloadOptions {
        DownloadOptions::from_preferences(&self.preferences)
    }

    /// Start downloading `node` and its subtree.
    pub fn download(&self, node: &NodeRef, options: DownloadOptions) -> Result<JobHandle> {
        self.orchestrator.download(node.clone(), options)
    }

    /// Request cancellation of the live job for `pin`.
    ///
    /// Returns `false` when no job is live.
    pub fn cancel(&self, pin: &Pin) -> bool {
        self.registry.cancel(pin)
    }

    /// Live snapshot or retained terminal outcome for `pin`.
    pub fn job(&self, pin: &Pin) -> Option<JobSnapshot> {
        self.registry.snapshot(pin)
    }

    /// Snapshots of every live job, ordered by pin.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.registry.live_snapshots()
    }

    /// Jobs a previous process left queued or running.
    pub fn interrupted_jobs(&self) -> Vec<LedgerEntry> {
        self.ledger
            .interrupted()
            .into_iter()
            .filter(|entry| !self.registry.is_live(&entry.pin))
            .collect()
    }

    /// Re-enqueue every interrupted job with its original options.
    pub fn resume_interrupted(&self) -> Vec<(Pin, Result<JobHandle>)> {
        self.orchestrator.resume_interrupted()
    }

    pub async fn status(&self, node: &ContentNode) -> Result<DownloadStatus> {
        self.status.status(node).await
    }

    /// Delete everything stored for `node` and its descendants.
    pub async fn delete(&self, node: &ContentNode) -> Result<()> {
        self.inventory.delete(node).await?;
        if let Err(e) = self.ledger.remove(node.pin()) {
            tracing::warn!("Failed to drop {} from job ledger: {}", node.pin(), e);
        }
        Ok(())
    }

    /// Bytes stored for `node` and its descendants.
    pub async fn size(&self, node: &ContentNode) -> Result<u64> {
        self.inventory.size(node).await
    }

    pub fn download_date(&self, node: &ContentNode) -> Result<DateTime<Utc>> {
        self.inventory.download_date(node)
    }
}
