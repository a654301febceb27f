//! Local asset storage.
//!
//! Two roots: `data/` holds what the engine downloaded, `cache/` is a
//! preview cache shared with the UI layer that the engine only reads from.
//! Every file is addressed by [`AssetName`].

pub mod atomic;
pub mod hash_index;
pub mod hashing;
pub mod naming;

pub use hash_index::{HashEntry, HashIndex};
pub use naming::{AssetKind, AssetName, Variant};

use crate::config::PathsConfig;
use crate::error::{Result, SyncError};
use crate::node::Pin;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Which directory a stored file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRoot {
    Data,
    Cache,
}

/// A file found on disk whose name parsed as an asset.
#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub name: AssetName,
    pub path: PathBuf,
    pub root: StoreRoot,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Deterministic file store for node assets.
#[derive(Debug)]
pub struct LocalAssetStore {
    data_dir: PathBuf,
    cache_dir: PathBuf,
    preview_scale: f32,
    hashes: HashIndex,
}

impl LocalAssetStore {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        hash_index: impl Into<PathBuf>,
        preview_scale: f32,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_dir: cache_dir.into(),
            preview_scale,
            hashes: HashIndex::open(hash_index),
        }
    }

    /// Store rooted at `root` using the standard directory names.
    pub fn at_root(root: &Path, preview_scale: f32) -> Self {
        Self::new(
            root.join(PathsConfig::DATA_DIR_NAME),
            root.join(PathsConfig::CACHE_DIR_NAME),
            root.join(PathsConfig::HASH_INDEX_FILENAME),
            preview_scale,
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn preview_scale(&self) -> f32 {
        self.preview_scale
    }

    pub fn hashes(&self) -> &HashIndex {
        &self.hashes
    }

    /// Name of the file that decides whether a node counts as downloaded.
    pub fn primary(&self, pin: &Pin) -> AssetName {
        AssetName::image(pin, Variant::primary_for(pin.namespace(), self.preview_scale))
    }

    pub fn path_for(&self, name: &AssetName) -> PathBuf {
        self.path_in(StoreRoot::Data, name)
    }

    pub fn path_in(&self, root: StoreRoot, name: &AssetName) -> PathBuf {
        match root {
            StoreRoot::Data => self.data_dir.join(name.file_name()),
            StoreRoot::Cache => self.cache_dir.join(name.file_name()),
        }
    }

    /// Hash index key of `name` under `root`.
    pub fn hash_key(root: StoreRoot, name: &AssetName) -> String {
        match root {
            StoreRoot::Data => name.file_name(),
            StoreRoot::Cache => format!("{}/{}", PathsConfig::CACHE_DIR_NAME, name.file_name()),
        }
    }

    pub fn exists(&self, pin: &Pin, variant: Variant) -> bool {
        self.path_for(&AssetName::image(pin, variant)).is_file()
    }

    pub fn exists_primary(&self, pin: &Pin) -> bool {
        self.path_for(&self.primary(pin)).is_file()
    }

    /// Make sure the directory that will hold `name` exists.
    pub async fn ensure_parent(&self, name: &AssetName) -> Result<()> {
        let path = self.path_for(name);
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::CreateParentFailed {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Atomically write `bytes` as `name`, replacing any previous file.
    pub async fn write(&self, name: &AssetName, bytes: Vec<u8>) -> Result<PathBuf> {
        self.write_in(StoreRoot::Data, name, bytes).await
    }

    /// Like [`LocalAssetStore::write`] under an explicit root.
    pub async fn write_in(&self, root: StoreRoot, name: &AssetName, bytes: Vec<u8>) -> Result<PathBuf> {
        let path = self.path_in(root, name);
        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic::write_bytes(&target, &bytes))
            .await
            .map_err(|e| SyncError::store(&path, e))?
            .map_err(|e| SyncError::store(&path, e))?;
        Ok(path)
    }

    /// Remove one asset file. Absence counts as success.
    pub async fn delete_asset(&self, name: &AssetName) -> Result<()> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Deleted {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SyncError::DeleteFailed {
                    path,
                    message: e.to_string(),
                })
            }
        }
        if let Err(e) = self.hashes.remove(&name.file_name()).await {
            warn!("Failed to update hash index for {}: {}", name, e);
        }
        Ok(())
    }

    /// Delete an image variant. Returns `false` only on a filesystem error.
    pub async fn delete(&self, pin: &Pin, variant: Variant) -> bool {
        match self.delete_asset(&AssetName::image(pin, variant)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Delete every stored file of `pin`: all image variants and the overlay.
    ///
    /// Attempts every file and reports the first failure.
    pub async fn delete_all(&self, pin: &Pin) -> Result<()> {
        let mut names: Vec<AssetName> = self
            .list_root(StoreRoot::Data)
            .into_iter()
            .filter(|asset| &asset.name.pin == pin)
            .map(|asset| asset.name)
            .collect();
        names.push(self.primary(pin));

        let mut first_error = None;
        for name in names {
            if let Err(e) = self.delete_asset(&name).await {
                warn!("{} > {}", pin, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Bytes used by all stored files of `pin`.
    pub fn size_of(&self, pin: &Pin) -> u64 {
        self.list_root(StoreRoot::Data)
            .iter()
            .filter(|asset| &asset.name.pin == pin)
            .map(|asset| asset.size)
            .sum()
    }

    /// Modification time of the primary asset.
    pub fn mtime_of(&self, pin: &Pin) -> Option<DateTime<Utc>> {
        let path = self.path_for(&self.primary(pin));
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// Every recognisable asset under both roots.
    pub fn list_assets(&self) -> Vec<StoredAsset> {
        let mut assets = self.list_root(StoreRoot::Data);
        assets.extend(self.list_root(StoreRoot::Cache));
        assets
    }

    fn list_root(&self, root: StoreRoot) -> Vec<StoredAsset> {
        let dir = match root {
            StoreRoot::Data => &self.data_dir,
            StoreRoot::Cache => &self.cache_dir,
        };
        if !dir.is_dir() {
            return Vec::new();
        }

        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let file_name = entry.file_name().to_str()?;
                let name = match AssetName::parse(file_name) {
                    Ok(name) => name,
                    Err(_) => {
                        debug!("Skipping unrecognised file {}", entry.path().display());
                        return None;
                    }
                };
                let metadata = entry.metadata().ok()?;
                Some(StoredAsset {
                    name,
                    path: entry.path().to_path_buf(),
                    root,
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                })
            })
            .collect()
    }

    /// A preview-cache image of `pin` large enough to produce `scale`.
    ///
    /// Prefers the full-resolution copy, then an exact scale match.
    pub fn find_cached_copy(&self, pin: &Pin, scale: f32) -> Option<(PathBuf, Variant)> {
        let mut candidates = vec![Variant::Full];
        if scale < 1.0 {
            candidates.push(Variant::Scaled(scale));
        }
        candidates.into_iter().find_map(|variant| {
            let path = self.cache_dir.join(AssetName::image(pin, variant).file_name());
            path.is_file().then_some((path, variant))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> LocalAssetStore {
        LocalAssetStore::at_root(tmp.path(), 0.5)
    }

    fn pin(s: &str) -> Pin {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_write_then_exists() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let sector = pin("Sector/S1");

        assert!(!store.exists_primary(&sector));
        store.write(&store.primary(&sector), b"jpeg".to_vec()).await.unwrap();
        assert!(store.exists(&sector, Variant::Full));
        assert_eq!(store.size_of(&sector), 4);
        assert!(store.mtime_of(&sector).is_some());
    }

    #[tokio::test]
    async fn test_zone_primary_is_preview() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let zone = pin("Zone/Z1");

        store
            .write(&AssetName::image(&zone, Variant::Full), b"full".to_vec())
            .await
            .unwrap();
        assert!(!store.exists_primary(&zone));
        store.write(&store.primary(&zone), b"p".to_vec()).await.unwrap();
        assert!(store.exists_primary(&zone));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let sector = pin("Sector/S1");
        assert!(store.delete(&sector, Variant::Full).await);
        assert!(store.delete(&sector, Variant::Full).await);
    }

    #[tokio::test]
    async fn test_delete_all_removes_variants_and_overlay() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let zone = pin("Zone/Z1");
        let other = pin("Zone/Z2");

        store.write(&store.primary(&zone), b"a".to_vec()).await.unwrap();
        store.write(&AssetName::overlay(&zone), b"b".to_vec()).await.unwrap();
        store.write(&store.primary(&other), b"c".to_vec()).await.unwrap();

        store.delete_all(&zone).await.unwrap();
        assert_eq!(store.size_of(&zone), 0);
        assert!(store.exists_primary(&other));
        store.delete_all(&zone).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_assets_skips_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.write(&store.primary(&pin("Sector/S1")), b"x".to_vec()).await.unwrap();
        std::fs::write(store.data_dir().join("README.txt"), "hi").unwrap();
        std::fs::create_dir_all(store.cache_dir()).unwrap();
        std::fs::write(store.cache_dir().join("Zone-Z1.jpg"), "y").unwrap();

        let assets = store.list_assets();
        assert_eq!(assets.len(), 2);
        assert!(assets.iter().any(|a| a.root == StoreRoot::Cache));
    }

    #[test]
    fn test_find_cached_copy_prefers_full() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let zone = pin("Zone/Z1");
        std::fs::create_dir_all(store.cache_dir()).unwrap();
        assert!(store.find_cached_copy(&zone, 0.5).is_none());

        std::fs::write(store.cache_dir().join("Zone-Z1-scale0.5.jpg"), "s").unwrap();
        let (_, variant) = store.find_cached_copy(&zone, 0.5).unwrap();
        assert_eq!(variant, Variant::Scaled(0.5));
        assert!(store.find_cached_copy(&zone, 1.0).is_none());

        std::fs::write(store.cache_dir().join("Zone-Z1.jpg"), "f").unwrap();
        let (_, variant) = store.find_cached_copy(&zone, 0.5).unwrap();
        assert_eq!(variant, Variant::Full);
    }
}
