//! Differential update of stored assets.
//!
//! Reconcile refreshes the manifest, walks every stored asset, compares its
//! content hash with the server's and re-downloads only the assets that
//! differ. Files that match are never touched.

use crate::backend::RemoteBackend;
use crate::cancel::CancellationToken;
use crate::error::{ErrorKind, Result, SyncError};
use crate::network::{NetworkMonitor, NetworkPolicy};
use crate::node::ContentRepository;
use crate::progress::{ProgressPhase, ProgressSink};
use crate::store::hashing::sha256_file_async;
use crate::store::{AssetKind, LocalAssetStore, StoredAsset};
use crate::transfer::{Encoding, Transfer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Summary of one reconcile run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub orphaned: usize,
    pub unchanged: usize,
    pub updated: usize,
    pub failures: usize,
}

/// An asset whose local content no longer matches the server.
struct Stale {
    asset: StoredAsset,
    reference: String,
    quality: u8,
}

#[derive(Default)]
struct FailureLog {
    count: usize,
    first: Option<ErrorKind>,
}

impl FailureLog {
    fn record(&mut self, asset: &StoredAsset, error: &SyncError) {
        warn!("{} > reconcile of {} failed: {}", asset.name.pin, asset.path.display(), error);
        self.count += 1;
        self.first.get_or_insert(error.kind());
    }
}

pub struct DifferentialUpdater {
    repo: Arc<ContentRepository>,
    store: Arc<LocalAssetStore>,
    transfer: Arc<Transfer>,
    backend: Arc<dyn RemoteBackend>,
    network: Arc<NetworkMonitor>,
    policy: NetworkPolicy,
    max_failures: usize,
    running: Mutex<()>,
    shutdown: CancellationToken,
}

impl DifferentialUpdater {
    pub fn new(
        repo: Arc<ContentRepository>,
        store: Arc<LocalAssetStore>,
        transfer: Arc<Transfer>,
        backend: Arc<dyn RemoteBackend>,
        network: Arc<NetworkMonitor>,
        policy: NetworkPolicy,
        max_failures: usize,
    ) -> Self {
        Self {
            repo,
            store,
            transfer,
            backend,
            network,
            policy,
            max_failures,
            running: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop any running reconcile at its next checkpoint.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Re-download every stored asset whose content changed on the server.
    ///
    /// Returns the number of assets updated.
    pub async fn reconcile(&self, progress: &dyn ProgressSink) -> Result<usize> {
        self.reconcile_report(progress).await.map(|report| report.updated)
    }

    /// Like [`DifferentialUpdater::reconcile`] with the full summary.
    ///
    /// Only one reconcile runs at a time; a second caller waits for the
    /// first to finish. Network traffic waits until the connection satisfies
    /// the configured policy. Fails with `ManifestFetchFailed` when the manifest
    /// cannot be refreshed and with `TooManyFailures` once per-asset
    /// failures exceed the configured budget.
    pub async fn reconcile_report(&self, progress: &dyn ProgressSink) -> Result<ReconcileReport> {
        let _running = self.running.lock().await;
        let run = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        info!("Reconcile {} started", run);

        self.network.wait_for(self.policy, &cancel).await?;
        progress.post(run, ProgressPhase::Manifest, 0, 1);
        let nodes = self.repo.refresh().await?;
        progress.post(run, ProgressPhase::Manifest, 1, 1);
        debug!("Reconcile {}: manifest holds {} nodes", run, nodes);

        let assets = self.store.list_assets();
        let total = assets.len() as i64;
        progress.post(run, ProgressPhase::Enumerate, total, total);

        let mut report = ReconcileReport {
            scanned: assets.len(),
            ..ReconcileReport::default()
        };
        let mut failures = FailureLog::default();
        let mut stale = Vec::new();

        for (done, asset) in assets.into_iter().enumerate() {
            cancel.check()?;
            progress.post(run, ProgressPhase::Checksum, done as i64, total);

            let Some(node) = self.repo.find(&asset.name.pin) else {
                info!("{} > no longer in manifest, skipping {}", asset.name.pin, asset.path.display());
                report.orphaned += 1;
                continue;
            };
            let reference = match asset.name.kind {
                AssetKind::Image => node.image_ref(),
                AssetKind::Overlay => node.overlay_ref(),
            };
            let Some(reference) = reference.map(str::to_string) else {
                info!("{} > asset reference removed, skipping {}", asset.name.pin, asset.path.display());
                report.orphaned += 1;
                continue;
            };

            match self.is_current(&asset, &reference).await {
                Ok(true) => report.unchanged += 1,
                Ok(false) => stale.push(Stale {
                    asset,
                    reference,
                    quality: node.namespace().image_quality(),
                }),
                Err(e) => failures.record(&asset, &e),
            }
        }
        progress.post(run, ProgressPhase::Checksum, total, total);

        let refresh_total = stale.len() as i64;
        if !stale.is_empty() {
            self.network.wait_for(self.policy, &cancel).await?;
        }
        for (done, item) in stale.into_iter().enumerate() {
            cancel.check()?;
            progress.post(run, ProgressPhase::Refresh, done as i64, refresh_total);
            match self.refresh_asset(&item, &cancel).await {
                Ok(()) => {
                    info!("{} > updated {}", item.asset.name.pin, item.asset.path.display());
                    report.updated += 1;
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => failures.record(&item.asset, &e),
            }
        }
        progress.post(run, ProgressPhase::Refresh, refresh_total, refresh_total);

        report.failures = failures.count;
        info!(
            "Reconcile {} finished: {} scanned, {} updated, {} unchanged, {} orphaned, {} failed",
            run, report.scanned, report.updated, report.unchanged, report.orphaned, report.failures
        );
        if failures.count > self.max_failures {
            return Err(SyncError::TooManyFailures {
                failures: failures.count,
                first: failures.first.unwrap_or(ErrorKind::Internal),
            });
        }
        Ok(report)
    }

    /// Whether the stored file still matches the server object.
    async fn is_current(&self, asset: &StoredAsset, reference: &str) -> Result<bool> {
        let Some(remote) = self.backend.asset_hash(reference).await? else {
            debug!("{} > server reports no hash for {}", asset.name.pin, reference);
            return Ok(true);
        };
        let on_disk = sha256_file_async(asset.path.clone()).await?;
        let key = LocalAssetStore::hash_key(asset.root, &asset.name);
        let local = self.store.hashes().effective_hash(&key, &on_disk);
        Ok(local.eq_ignore_ascii_case(&remote))
    }

    async fn refresh_asset(&self, item: &Stale, cancel: &CancellationToken) -> Result<()> {
        let name = &item.asset.name;
        let ignore = |_: u64, _: Option<u64>| {};
        match name.kind {
            AssetKind::Image => {
                let encoding = Encoding {
                    quality: item.quality,
                    scale: name.variant.scale(),
                };
                self.transfer
                    .store_image_in(item.asset.root, &item.reference, name, encoding, cancel, &ignore)
                    .await?;
            }
            AssetKind::Overlay => {
                self.transfer
                    .store_overlay_in(item.asset.root, &item.reference, name, cancel, &ignore)
                    .await?;
            }
        }
        Ok(())
    }
}
