//! Map-tile region collaborator.
//!
//! Tile storage belongs to the host's map engine. The orchestrator only asks
//! for a region around a node that carries a map overlay, and never waits
//! for or fails on the answer.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::node::{ContentNode, NodeRef};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait MapRegionProvider: Send + Sync {
    /// Download the offline tile region covering `node` with `style_ref`.
    async fn download_region(
        &self,
        node: &ContentNode,
        style_ref: &str,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Run a region request in a detached task under `cancel`.
pub(crate) fn spawn_region(
    provider: Arc<dyn MapRegionProvider>,
    node: NodeRef,
    style_ref: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if cancel.is_cancelled() {
            return;
        }
        debug!("{} > requesting map region", node.pin());
        match provider.download_region(&node, &style_ref, cancel).await {
            Ok(()) => debug!("{} > map region stored", node.pin()),
            Err(e) => warn!("{} > map region download failed: {}", node.pin(), e),
        }
    })
}
