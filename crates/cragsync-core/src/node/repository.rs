//! Explicit repository for the content tree.
//!
//! Holds the current manifest and its lookup index, and resolves children
//! for any node: the node's own cache first, then the manifest, then the
//! remote backend. The manifest is cached on disk so the tree survives
//! restarts and offline starts.

use super::manifest::TreeIndex;
use super::{ContentNode, Manifest, NodeRef, Pin};
use crate::backend::RemoteBackend;
use crate::error::{Result, SyncError};
use crate::store::atomic::{read_json, write_json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

struct Snapshot {
    manifest: Manifest,
    index: TreeIndex,
}

/// Tree access shared by every engine component.
pub struct ContentRepository {
    snapshot: RwLock<Arc<Snapshot>>,
    backend: Option<Arc<dyn RemoteBackend>>,
    cache_path: Option<PathBuf>,
}

impl ContentRepository {
    /// Create an empty repository.
    pub fn new(backend: Option<Arc<dyn RemoteBackend>>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot {
                manifest: Manifest::default(),
                index: TreeIndex::default(),
            })),
            backend,
            cache_path: None,
        }
    }

    /// Create a repository from an already fetched manifest.
    pub fn from_manifest(manifest: Manifest, backend: Option<Arc<dyn RemoteBackend>>) -> Result<Self> {
        let repo = Self::new(backend);
        repo.swap(manifest)?;
        Ok(repo)
    }

    /// Restore the manifest cached at `path`, or start empty.
    pub fn open_cached(path: impl Into<PathBuf>, backend: Option<Arc<dyn RemoteBackend>>) -> Result<Self> {
        let path = path.into();
        let repo = match read_json::<Manifest>(&path)? {
            Some(manifest) => {
                debug!("Restoring cached manifest from {}", path.display());
                Self::from_manifest(manifest, backend)?
            }
            None => Self::new(backend),
        };
        Ok(repo.with_cache_path(path))
    }

    /// Persist every replaced manifest to `path`.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    pub fn backend(&self) -> Option<&Arc<dyn RemoteBackend>> {
        self.backend.as_ref()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn swap(&self, manifest: Manifest) -> Result<usize> {
        let index = TreeIndex::build(&manifest)?;
        let count = index.nodes.len();
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) =
            Arc::new(Snapshot { manifest, index });
        Ok(count)
    }

    /// Replace the tree with `manifest` and overwrite the local cache.
    ///
    /// Nodes handed out earlier keep their cached children; callers wanting
    /// fresh data re-resolve them with [`ContentRepository::find`].
    pub fn replace_manifest(&self, manifest: Manifest) -> Result<usize> {
        // Validate before touching the cache file.
        TreeIndex::build(&manifest)?;
        if let Some(path) = &self.cache_path {
            write_json(path, &manifest)?;
        }
        let count = self.swap(manifest)?;
        info!("Content tree replaced ({} nodes)", count);
        Ok(count)
    }

    /// Fetch the manifest from the backend and replace the local tree.
    pub async fn refresh(&self) -> Result<usize> {
        let backend = self.backend.as_ref().ok_or_else(|| SyncError::ManifestFetchFailed {
            message: "no remote backend configured".to_string(),
        })?;
        let manifest = backend.fetch_manifest().await.map_err(|e| match e {
            SyncError::ManifestFetchFailed { .. } | SyncError::MissingRequiredField { .. } => e,
            other => SyncError::ManifestFetchFailed {
                message: other.to_string(),
            },
        })?;
        self.replace_manifest(manifest)
    }

    pub fn manifest(&self) -> Manifest {
        self.current().manifest.clone()
    }

    /// Top-level nodes in display order.
    pub fn roots(&self) -> Vec<NodeRef> {
        self.current().index.roots.clone()
    }

    pub fn find(&self, pin: &Pin) -> Option<NodeRef> {
        self.current().index.nodes.get(pin).cloned()
    }

    pub fn len(&self) -> usize {
        self.current().index.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Children of `node` in display order.
    ///
    /// Fails with `DataUnavailable` when neither the manifest nor the
    /// backend can provide them.
    pub async fn children(&self, node: &ContentNode) -> Result<Arc<[NodeRef]>> {
        if let Some(children) = node.cached_children() {
            return Ok(children);
        }
        if node.namespace().child().is_none() {
            let empty: Arc<[NodeRef]> = Arc::from(Vec::<NodeRef>::new());
            node.set_children(empty.clone());
            return Ok(empty);
        }

        let indexed = self.current().index.children_of(node.pin());
        if let Some(children) = &indexed {
            if children.len() == node.children_count() {
                return Ok(cache(node, children.clone()));
            }
            debug!(
                "{} > manifest lists {} children, node reports {}",
                node.pin(),
                children.len(),
                node.children_count()
            );
        }

        let fetched = match &self.backend {
            Some(backend) => backend.fetch_children(node).await,
            None => Err(SyncError::unavailable(node.pin(), "no remote backend configured")),
        };

        match (fetched, indexed) {
            (Ok(children), _) => {
                let children = children.into_iter().map(Arc::new).collect();
                Ok(cache(node, children))
            }
            (Err(e), Some(children)) => {
                warn!("{} > using cached children, fetch failed: {}", node.pin(), e);
                Ok(cache(node, children))
            }
            (Err(e), None) => Err(SyncError::unavailable(node.pin(), e)),
        }
    }

    /// Pins above `pin` in the local tree, nearest first.
    pub fn ancestors(&self, pin: &Pin) -> Vec<Pin> {
        let snapshot = self.current();
        let mut ancestors = Vec::new();
        let mut current = snapshot.index.nodes.get(pin).cloned();
        while let Some(node) = current {
            let (Some(namespace), Some(id)) = (node.namespace().parent(), node.parent_id()) else {
                break;
            };
            let parent = Pin::new(namespace, id.clone());
            current = snapshot.index.nodes.get(&parent).cloned();
            ancestors.push(parent);
        }
        ancestors
    }

    /// Number of nodes in the subtree rooted at `pin`, the root included.
    pub fn full_count(&self, pin: &Pin) -> usize {
        let snapshot = self.current();
        if !snapshot.index.nodes.contains_key(pin) {
            return 0;
        }
        let mut count = 0;
        let mut stack = vec![pin.clone()];
        while let Some(current) = stack.pop() {
            count += 1;
            if let Some(children) = snapshot.index.children.get(&current) {
                stack.extend(children.iter().cloned());
            }
        }
        count
    }
}

fn cache(node: &ContentNode, children: Vec<NodeRef>) -> Arc<[NodeRef]> {
    let children: Arc<[NodeRef]> = Arc::from(children);
    node.set_children(children.clone());
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn manifest() -> Manifest {
        let raw = serde_json::json!({
            "Areas": { "A1": { "displayName": "Alcoi", "image": "gs://b/a1.jpg" } },
            "Zones": { "Z1": { "displayName": "Zone", "image": "gs://b/z1.jpg", "area": "A1" } },
            "Sectors": {
                "S1": { "displayName": "One", "image": "gs://b/s1.jpg", "zone": "Z1" },
                "S2": { "displayName": "Two", "image": "gs://b/s2.jpg", "zone": "Z1" }
            },
            "Paths": {}
        });
        Manifest::from_slice(raw.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_children_from_manifest() {
        let repo = ContentRepository::from_manifest(manifest(), None).unwrap();
        let zone = repo.find(&"Zone/Z1".parse().unwrap()).unwrap();
        let sectors = repo.children(&zone).await.unwrap();
        assert_eq!(sectors.len(), 2);
        assert!(zone.cached_children().is_some());
    }

    #[tokio::test]
    async fn test_unknown_node_without_backend_is_unavailable() {
        let repo = ContentRepository::new(None);
        let orphan = ContentNode::new(
            crate::node::Namespace::Zone,
            crate::node::ObjectId::new("Z9").unwrap(),
            "Orphan",
            Some(crate::node::ObjectId::new("A1").unwrap()),
            crate::node::AssetRefs {
                image: Some("gs://b/z9.jpg".into()),
                overlay: None,
            },
            4,
        )
        .unwrap();
        let err = repo.children(&orphan).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataUnavailable);
    }

    #[test]
    fn test_full_count() {
        let repo = ContentRepository::from_manifest(manifest(), None).unwrap();
        assert_eq!(repo.full_count(&"Area/A1".parse().unwrap()), 4);
        assert_eq!(repo.full_count(&"Sector/S1".parse().unwrap()), 1);
        assert_eq!(repo.full_count(&"Sector/S404".parse().unwrap()), 0);
    }

    #[test]
    fn test_manifest_cache_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");

        let repo = ContentRepository::new(None).with_cache_path(&path);
        repo.replace_manifest(manifest()).unwrap();
        assert!(path.exists());

        let restored = ContentRepository::open_cached(&path, None).unwrap();
        assert_eq!(restored.len(), 4);
        assert_eq!(restored.roots().len(), 1);
    }

    #[test]
    fn test_invalid_manifest_leaves_cache_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");
        let repo = ContentRepository::new(None).with_cache_path(&path);
        repo.replace_manifest(manifest()).unwrap();

        let broken = Manifest::from_slice(br#"{"Areas": {"A2": {}}}"#).unwrap();
        assert!(repo.replace_manifest(broken).is_err());
        assert_eq!(repo.len(), 4);
        let restored = ContentRepository::open_cached(&path, None).unwrap();
        assert_eq!(restored.len(), 4);
    }

    #[tokio::test]
    async fn test_refresh_without_backend_fails() {
        let repo = ContentRepository::new(None);
        let err = repo.refresh().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ManifestFetchFailed);
    }
}
