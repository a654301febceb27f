//! Reconciliation and shutdown.

use crate::error::Result;
use crate::progress::ProgressSink;
use crate::updater::ReconcileReport;
use crate::SyncEngine;

impl SyncEngine {
    /// Re-download stored assets that changed on the server.
    ///
    /// Progress goes to the engine's sink. Returns the number of assets
    /// updated.
    pub async fn reconcile(&self) -> Result<usize> {
        self.updater.reconcile(self.progress.as_ref()).await
    }

    /// Reconcile reporting to `progress`, returning the full summary.
    pub async fn reconcile_with(&self, progress: &dyn ProgressSink) -> Result<ReconcileReport> {
        self.updater.reconcile_report(progress).await
    }

    /// Cancel every live job and any running reconcile.
    ///
    /// Jobs stop at their next checkpoint; their ledger entries record the
    /// cancellation.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down sync engine");
        self.registry.cancel_all();
        self.updater.cancel();
    }
}
