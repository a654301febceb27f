//! Download orchestration.
//!
//! `download(node)` claims the node's pin in the registry and spawns one
//! task per job. The task waits for an acceptable network, takes a slot from
//! the global worker pool, then walks the subtree depth-first: a parent's
//! asset is always attempted before its children, failures are recorded per
//! node and never stop the walk.

use crate::cancel::CancellationToken;
use crate::config::DownloadConfig;
use crate::error::{ErrorKind, Result, SyncError};
use crate::jobs::{
    JobHandle, JobLedger, JobOutcome, JobRegistry, JobSnapshot, JobState, LedgerEntry,
    NodeOutcome, Registration,
};
use crate::map::{spawn_region, MapRegionProvider};
use crate::network::{NetworkMonitor, NetworkPolicy};
use crate::node::{ContentRepository, Namespace, NodeRef, Pin};
use crate::progress::{ProgressPhase, ProgressSink};
use crate::settings::DownloadPreferences;
use crate::store::{AssetName, LocalAssetStore};
use crate::transfer::{Encoding, Transfer};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-request download options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Replace assets that already exist.
    pub overwrite: bool,
    /// JPEG quality, `1..=100`.
    pub image_quality: i64,
    /// Map style for offline tile regions; none skips map regions.
    pub map_style_ref: Option<String>,
    pub policy: NetworkPolicy,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            image_quality: DownloadConfig::DEFAULT_QUALITY as i64,
            map_style_ref: None,
            policy: NetworkPolicy::Any,
        }
    }
}

impl DownloadOptions {
    pub fn from_preferences(prefs: &DownloadPreferences) -> Self {
        Self {
            image_quality: prefs.image_quality as i64,
            policy: prefs.policy,
            ..Self::default()
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_quality(mut self, quality: i64) -> Self {
        self.image_quality = quality;
        self
    }

    pub fn with_map_style(mut self, style: impl Into<String>) -> Self {
        self.map_style_ref = Some(style.into());
        self
    }

    pub fn with_policy(mut self, policy: NetworkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Checked JPEG quality.
    pub fn quality(&self) -> Result<u8> {
        if (DownloadConfig::MIN_QUALITY..=DownloadConfig::MAX_QUALITY).contains(&self.image_quality) {
            Ok(self.image_quality as u8)
        } else {
            Err(SyncError::InvalidQuality {
                quality: self.image_quality,
            })
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    done: i64,
    known_total: i64,
    indeterminate: bool,
    visited: usize,
    nodes: Vec<NodeOutcome>,
    first_error: Option<ErrorKind>,
}

/// Per-job state shared by the walk.
struct JobContext {
    id: Uuid,
    pin: Pin,
    cancel: CancellationToken,
    quality: u8,
    options: DownloadOptions,
    tx: tokio::sync::watch::Sender<JobSnapshot>,
    counters: Mutex<Counters>,
    progress: Arc<dyn ProgressSink>,
}

impl JobContext {
    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: JobState) {
        self.tx.send_modify(|snapshot| snapshot.state = state);
    }

    /// Account a received chunk; `first` carries the asset's content length
    /// on its first chunk.
    fn advance(&self, len: u64, first: Option<Option<u64>>) {
        let (done, total) = {
            let mut counters = self.counters();
            counters.done += len as i64;
            match first {
                Some(Some(total)) => counters.known_total += total as i64,
                Some(None) => counters.indeterminate = true,
                None => {}
            }
            let total = if counters.indeterminate {
                -1
            } else {
                counters.known_total.max(counters.done)
            };
            (counters.done, total)
        };
        self.tx.send_modify(|snapshot| {
            snapshot.bytes_done = done;
            snapshot.bytes_total = total;
        });
        self.progress.post(self.id, ProgressPhase::Download, done, total);
    }

    fn record(&self, pin: &Pin, result: std::result::Result<(), ErrorKind>) {
        let visited = {
            let mut counters = self.counters();
            if let Err(kind) = result {
                counters.first_error.get_or_insert(kind);
            }
            counters.nodes.push(NodeOutcome {
                pin: pin.clone(),
                result,
            });
            counters.visited += 1;
            counters.visited
        };
        self.tx.send_modify(|snapshot| snapshot.nodes_visited = visited);
    }

    fn outcome(&self, result: std::result::Result<(), ErrorKind>) -> JobOutcome {
        let counters = self.counters();
        JobOutcome {
            id: self.id,
            pin: self.pin.clone(),
            result,
            nodes: counters.nodes.clone(),
            bytes_done: counters.done,
        }
    }
}

struct Worker {
    repo: Arc<ContentRepository>,
    store: Arc<LocalAssetStore>,
    transfer: Arc<Transfer>,
    registry: Arc<JobRegistry>,
    ledger: Arc<JobLedger>,
    network: Arc<NetworkMonitor>,
    progress: Arc<dyn ProgressSink>,
    maps: Option<Arc<dyn MapRegionProvider>>,
    permits: Arc<Semaphore>,
}

/// Schedules and runs download jobs.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    worker: Arc<Worker>,
}

/// Collaborators the orchestrator is built from.
pub struct OrchestratorParts {
    pub repo: Arc<ContentRepository>,
    pub store: Arc<LocalAssetStore>,
    pub transfer: Arc<Transfer>,
    pub registry: Arc<JobRegistry>,
    pub ledger: Arc<JobLedger>,
    pub network: Arc<NetworkMonitor>,
    pub progress: Arc<dyn ProgressSink>,
    pub maps: Option<Arc<dyn MapRegionProvider>>,
    pub max_concurrent_jobs: usize,
}

impl DownloadOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            worker: Arc::new(Worker {
                repo: parts.repo,
                store: parts.store,
                transfer: parts.transfer,
                registry: parts.registry,
                ledger: parts.ledger,
                network: parts.network,
                progress: parts.progress,
                maps: parts.maps,
                permits: Arc::new(Semaphore::new(parts.max_concurrent_jobs.max(1))),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.worker.registry
    }

    /// Enqueue a download of `node` and its subtree.
    ///
    /// Validation happens before any I/O: quality out of range fails with
    /// `InvalidQuality`, paths fail with `UnknownNamespace` and a pin that
    /// already has a live job fails with `AlreadyDownloading`.
    pub fn download(&self, node: NodeRef, options: DownloadOptions) -> Result<JobHandle> {
        let quality = options.quality()?;
        if node.namespace() == Namespace::Path {
            return Err(SyncError::UnknownNamespace(format!(
                "{} has no downloadable content",
                node.pin()
            )));
        }

        let registration = self.worker.registry.register(node.pin())?;
        let handle = JobHandle::new(&registration, self.worker.registry.clone());
        info!("Queued download {} for {}", registration.id, node.pin());

        let entry = LedgerEntry {
            pin: node.pin().clone(),
            job_id: registration.id,
            state: JobState::Queued,
            options: options.clone(),
            updated_at: Utc::now(),
            error: None,
        };
        if let Err(e) = self.worker.ledger.save(&entry) {
            warn!("Failed to persist job {}: {}", registration.id, e);
        }

        let worker = self.worker.clone();
        tokio::spawn(async move {
            worker.run(node, options, quality, registration).await;
        });
        Ok(handle)
    }

    /// Re-enqueue jobs a previous process left unfinished.
    ///
    /// Pins with a live job in this process are left alone.
    pub fn resume_interrupted(&self) -> Vec<(Pin, Result<JobHandle>)> {
        self.worker
            .ledger
            .interrupted()
            .into_iter()
            .filter(|entry| !self.worker.registry.is_live(&entry.pin))
            .map(|entry| {
                let result = match self.worker.repo.find(&entry.pin) {
                    Some(node) => {
                        info!("Resuming interrupted download for {}", entry.pin);
                        self.download(node, entry.options.clone())
                    }
                    None => Err(SyncError::unavailable(&entry.pin, "node not in manifest")),
                };
                (entry.pin, result)
            })
            .collect()
    }
}

impl Worker {
    async fn run(self: Arc<Self>, node: NodeRef, options: DownloadOptions, quality: u8, registration: Registration) {
        let Registration { id, pin, cancel, tx } = registration;
        let job = JobContext {
            id,
            pin: pin.clone(),
            cancel,
            quality,
            options,
            tx,
            counters: Mutex::new(Counters::default()),
            progress: self.progress.clone(),
        };

        let result = self.execute(&node, &job).await;
        let outcome = Arc::new(job.outcome(result));
        match outcome.result {
            Ok(()) => info!("Download {} for {} succeeded", id, pin),
            Err(kind) => warn!("Download {} for {} failed: {}", id, pin, kind),
        }

        if let Err(e) = self
            .ledger
            .update(&pin, id, outcome.state(), outcome.result.err())
        {
            warn!("Failed to persist job {}: {}", id, e);
        }
        // Free the pin before publishing so a waiter can immediately retry.
        self.registry.finish(outcome.clone());
        job.tx.send_replace(JobSnapshot::finished(outcome));
    }

    async fn execute(&self, node: &NodeRef, job: &JobContext) -> std::result::Result<(), ErrorKind> {
        if let Err(e) = self.network.wait_for(job.options.policy, &job.cancel).await {
            return Err(e.kind());
        }

        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker pool closed: {}", e);
                    return Err(ErrorKind::Internal);
                }
            },
            _ = job.cancel.cancelled() => return Err(ErrorKind::Cancelled),
        };

        job.set_state(JobState::Running);
        if let Err(e) = self.ledger.update(&job.pin, job.id, JobState::Running, None) {
            warn!("Failed to persist job {}: {}", job.id, e);
        }
        debug!("Download {} running for {}", job.id, job.pin);

        self.visit(node, job).await;

        if job.cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled);
        }
        match job.counters().first_error {
            Some(kind) => Err(kind),
            None => Ok(()),
        }
    }

    fn visit<'a>(&'a self, node: &'a NodeRef, job: &'a JobContext) -> BoxFuture<'a, ()> {
        async move {
            if job.cancel.is_cancelled() {
                return;
            }
            let pin = node.pin();

            let result = if node.namespace().has_asset() {
                self.asset_step(node, job).await
            } else {
                Ok(())
            };
            if let Err(e) = &result {
                warn!("{} > {}", pin, e);
            }
            if matches!(result, Err(SyncError::Cancelled)) {
                return;
            }
            job.record(pin, result.map_err(|e| e.kind()));

            if let Some(overlay) = node.overlay_ref() {
                self.overlay_step(node, overlay, job).await;
            }

            if let (Some(style), Some(maps)) = (&job.options.map_style_ref, &self.maps) {
                if node.overlay_ref().is_some() {
                    spawn_region(maps.clone(), node.clone(), style.clone(), job.cancel.child_token());
                }
            }

            if !node.namespace().has_downloadable_children() || job.cancel.is_cancelled() {
                return;
            }
            let children = match self.repo.children(node).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("{} > cannot list children: {}", pin, e);
                    job.record(pin, Err(e.kind()));
                    return;
                }
            };
            for child in children.iter() {
                if job.cancel.is_cancelled() {
                    return;
                }
                self.visit(child, job).await;
            }
        }
        .boxed()
    }

    /// Fetch and store the node's primary image.
    async fn asset_step(&self, node: &NodeRef, job: &JobContext) -> Result<()> {
        let pin = node.pin();
        let target = self.store.primary(pin);
        let reference = node
            .image_ref()
            .ok_or_else(|| SyncError::MissingRequiredField {
                record: pin.to_string(),
                field: "image".to_string(),
            })?;

        if job.options.overwrite {
            self.store.delete_asset(&target).await?;
        } else if self.store.exists_primary(pin) {
            return Err(SyncError::AlreadyDownloaded {
                pin: pin.to_string(),
            });
        }
        self.store.ensure_parent(&target).await?;

        let scale = target.variant.scale();
        if !job.options.overwrite {
            if let Some((cached, variant)) = self.store.find_cached_copy(pin, scale) {
                let encoding = Encoding {
                    quality: job.quality,
                    scale: scale / variant.scale(),
                };
                let cached_name = AssetName::image(pin, variant);
                match self
                    .transfer
                    .store_image_from_cache(&cached_name, &target, encoding)
                    .await
                {
                    Ok(stored) => {
                        debug!("{} > reused cached image {}", pin, cached.display());
                        job.advance(stored.bytes_written, Some(Some(stored.bytes_written)));
                        return Ok(());
                    }
                    Err(e) => debug!("{} > cached image unusable: {}", pin, e),
                }
            }
        }

        job.cancel.check()?;
        debug!("{} > fetching image", pin);
        let started = AtomicBool::new(false);
        let on_chunk = |len: u64, total: Option<u64>| {
            let first = !started.swap(true, Ordering::Relaxed);
            job.advance(len, first.then_some(total));
        };
        let stored = self
            .transfer
            .store_image(
                reference,
                &target,
                Encoding {
                    quality: job.quality,
                    scale,
                },
                &job.cancel,
                &on_chunk,
            )
            .await?;
        debug!(
            "{} > stored {} ({} bytes)",
            pin,
            stored.path.display(),
            stored.bytes_written
        );
        Ok(())
    }

    /// Best-effort KMZ overlay download.
    async fn overlay_step(&self, node: &NodeRef, reference: &str, job: &JobContext) {
        let pin = node.pin();
        let target = AssetName::overlay(pin);
        if !job.options.overwrite && self.store.path_for(&target).is_file() {
            return;
        }
        let started = AtomicBool::new(false);
        let on_chunk = |len: u64, total: Option<u64>| {
            let first = !started.swap(true, Ordering::Relaxed);
            job.advance(len, first.then_some(total));
        };
        match self
            .transfer
            .store_overlay(reference, &target, &job.cancel, &on_chunk)
            .await
        {
            Ok(_) => debug!("{} > stored overlay", pin),
            Err(e) => warn!("{} > overlay download failed: {}", pin, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_bounds() {
        assert!(DownloadOptions::default().with_quality(0).quality().is_err());
        assert!(DownloadOptions::default().with_quality(101).quality().is_err());
        assert_eq!(DownloadOptions::default().with_quality(1).quality().unwrap(), 1);
        assert_eq!(DownloadOptions::default().with_quality(100).quality().unwrap(), 100);
    }

    #[test]
    fn test_options_from_preferences() {
        let prefs = DownloadPreferences {
            image_quality: 60,
            policy: NetworkPolicy::WifiOnly,
        };
        let options = DownloadOptions::from_preferences(&prefs);
        assert_eq!(options.image_quality, 60);
        assert_eq!(options.policy, NetworkPolicy::WifiOnly);
        assert!(!options.overwrite);
    }

    #[test]
    fn test_options_serde() {
        let options = DownloadOptions::default()
            .with_overwrite(true)
            .with_map_style("mapbox://styles/outdoors");
        let json = serde_json::to_string(&options).unwrap();
        let back: DownloadOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
