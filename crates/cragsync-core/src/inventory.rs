//! Removal and accounting of downloaded subtrees.

use crate::error::{Result, SyncError};
use crate::jobs::JobRegistry;
use crate::node::{ContentNode, ContentRepository, Pin};
use crate::store::LocalAssetStore;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Inventory {
    repo: Arc<ContentRepository>,
    store: Arc<LocalAssetStore>,
    registry: Arc<JobRegistry>,
}

impl Inventory {
    pub fn new(
        repo: Arc<ContentRepository>,
        store: Arc<LocalAssetStore>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            repo,
            store,
            registry,
        }
    }

    /// Delete every stored file of `node` and its descendants.
    ///
    /// Children go first so a node never looks downloaded while its
    /// subtree is half gone. Every node is attempted; the first failure is
    /// reported. Deleting something that is not stored succeeds.
    ///
    /// Refused with `AlreadyDownloading` while a job runs on the node, on
    /// one of its ancestors or anywhere in its subtree.
    pub async fn delete(&self, node: &ContentNode) -> Result<()> {
        if let Some(blocking) = self.overlapping_job(node.pin()) {
            return Err(SyncError::AlreadyDownloading {
                pin: blocking.to_string(),
            });
        }
        let mut first_error = None;
        self.delete_subtree(node, &mut first_error).await;
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Deleted {}", node.pin());
                Ok(())
            }
        }
    }

    fn overlapping_job(&self, pin: &Pin) -> Option<Pin> {
        let ancestors = self.repo.ancestors(pin);
        self.registry.live_pins().into_iter().find(|live| {
            live == pin || ancestors.contains(live) || self.repo.ancestors(live).contains(pin)
        })
    }

    fn delete_subtree<'a>(
        &'a self,
        node: &'a ContentNode,
        first_error: &'a mut Option<SyncError>,
    ) -> BoxFuture<'a, ()> {
        async move {
            if node.namespace().has_downloadable_children() {
                match self.repo.children(node).await {
                    Ok(children) => {
                        for child in children.iter() {
                            self.delete_subtree(child, first_error).await;
                        }
                    }
                    Err(e) => {
                        // Without the children list the subtree cannot be
                        // walked; keep the node's own files.
                        warn!("{} > {}", node.pin(), e);
                        first_error.get_or_insert(e);
                        return;
                    }
                }
            }
            if let Err(e) = self.store.delete_all(node.pin()).await {
                first_error.get_or_insert(e);
            } else {
                debug!("{} > removed local files", node.pin());
            }
        }
        .boxed()
    }

    /// Total bytes stored for `node` and its descendants.
    ///
    /// Fails with `DataUnavailable` when `node` itself is not downloaded.
    pub async fn size(&self, node: &ContentNode) -> Result<u64> {
        if node.namespace().has_asset() && !self.store.exists_primary(node.pin()) {
            return Err(SyncError::unavailable(node.pin(), "not downloaded"));
        }
        self.subtree_size(node).await
    }

    fn subtree_size<'a>(&'a self, node: &'a ContentNode) -> BoxFuture<'a, Result<u64>> {
        async move {
            let mut total = self.store.size_of(node.pin());
            if node.namespace().has_downloadable_children() {
                let children = self.repo.children(node).await?;
                for child in children.iter() {
                    total += self.subtree_size(child).await?;
                }
            }
            Ok(total)
        }
        .boxed()
    }

    /// When the primary asset of `node` was written.
    pub fn download_date(&self, node: &ContentNode) -> Result<DateTime<Utc>> {
        self.store
            .mtime_of(node.pin())
            .ok_or_else(|| SyncError::unavailable(node.pin(), "not downloaded"))
    }
}
