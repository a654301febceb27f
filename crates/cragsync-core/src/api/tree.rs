//! Content tree access.

use std::sync::Arc;

use crate::error::Result;
use crate::node::{ContentNode, ContentRepository, NodeRef, Pin};
use crate::SyncEngine;

impl SyncEngine {
    pub fn repository(&self) -> &Arc<ContentRepository> {
        &self.repo
    }

    /// Fetch the manifest from the server and replace the local tree.
    ///
    /// Returns the number of nodes in the new tree.
    pub async fn refresh(&self) -> Result<usize> {
        self.repo.refresh().await
    }

    pub fn find(&self, pin: &Pin) -> Option<NodeRef> {
        self.repo.find(pin)
    }

    /// Top-level areas in display order.
    pub fn roots(&self) -> Vec<NodeRef> {
        self.repo.roots()
    }

    pub async fn children(&self, node: &ContentNode) -> Result<Arc<[NodeRef]>> {
        self.repo.children(node).await
    }

    /// Nodes in the subtree of `pin`, the node itself included.
    pub fn full_count(&self, pin: &Pin) -> usize {
        self.repo.full_count(pin)
    }
}
