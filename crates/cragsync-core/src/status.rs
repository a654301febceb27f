//! Aggregated download status.
//!
//! Status is never stored. It is recomputed from the live-job registry, the
//! asset store and the status of descendants, so every result is a
//! snapshot that may be stale as soon as it is returned.

use crate::error::Result;
use crate::jobs::JobRegistry;
use crate::node::{ContentNode, ContentRepository, Namespace};
use crate::store::LocalAssetStore;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    NotDownloaded,
    Downloading,
    Downloaded,
    Partially,
}

impl DownloadStatus {
    pub fn is_downloaded(&self) -> bool {
        matches!(self, DownloadStatus::Downloaded)
    }

    /// Status of a node without an own asset, from its children alone.
    fn from_children(children: &[DownloadStatus]) -> DownloadStatus {
        if children.is_empty() || children.iter().all(|s| *s == DownloadStatus::NotDownloaded) {
            DownloadStatus::NotDownloaded
        } else if children.iter().all(DownloadStatus::is_downloaded) {
            DownloadStatus::Downloaded
        } else {
            DownloadStatus::Partially
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DownloadStatus::NotDownloaded => "not downloaded",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Partially => "partially downloaded",
        };
        f.write_str(label)
    }
}

pub struct StatusAggregator {
    repo: Arc<ContentRepository>,
    store: Arc<LocalAssetStore>,
    registry: Arc<JobRegistry>,
}

impl StatusAggregator {
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

    /// Compute the status of `node`.
    ///
    /// A live job wins. Nodes with an own asset are `NotDownloaded` without
    /// it; with it they are `Downloaded` only if every downloadable child is.
    /// Areas mirror their zones. Paths carry nothing and are never
    /// downloaded.
    pub fn status<'a>(&'a self, node: &'a ContentNode) -> BoxFuture<'a, Result<DownloadStatus>> {
        async move {
            if self.registry.is_live(node.pin()) {
                return Ok(DownloadStatus::Downloading);
            }

            match node.namespace() {
                Namespace::Path => Ok(DownloadStatus::NotDownloaded),
                Namespace::Area => {
                    let children = self.child_statuses(node).await?;
                    Ok(DownloadStatus::from_children(&children))
                }
                Namespace::Zone | Namespace::Sector => {
                    if !self.store.exists_primary(node.pin()) {
                        return Ok(DownloadStatus::NotDownloaded);
                    }
                    if !node.namespace().has_downloadable_children() {
                        return Ok(DownloadStatus::Downloaded);
                    }
                    let children = self.child_statuses(node).await?;
                    if children.iter().all(DownloadStatus::is_downloaded) {
                        Ok(DownloadStatus::Downloaded)
                    } else {
                        Ok(DownloadStatus::Partially)
                    }
                }
            }
        }
        .boxed()
    }

    async fn child_statuses(&self, node: &ContentNode) -> Result<Vec<DownloadStatus>> {
        let children = self.repo.children(node).await?;
        join_all(children.iter().map(|child| self.status(child)))
            .await
            .into_iter()
            .collect()
    }
}
