//! Builder for configuring SyncEngine initialization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::RemoteBackend;
use crate::config::{DownloadConfig, EngineConfig, PathsConfig};
use crate::error::{Result, SyncError};
use crate::inventory::Inventory;
use crate::jobs::{JobLedger, JobRegistry};
use crate::map::MapRegionProvider;
use crate::network::{NetworkMonitor, NetworkState};
use crate::node::{ContentRepository, Manifest};
use crate::orchestrator::{DownloadOrchestrator, OrchestratorParts};
use crate::progress::{ProgressSink, TracingProgress};
use crate::settings::{DownloadPreferences, SettingsProvider};
use crate::status::StatusAggregator;
use crate::store::LocalAssetStore;
use crate::transfer::Transfer;
use crate::updater::DifferentialUpdater;
use crate::SyncEngine;

/// Builder for configuring SyncEngine initialization.
///
/// # Example
///
/// ```rust,ignore
/// use cragsync_core::SyncEngine;
///
/// let engine = SyncEngine::builder("./offline", backend)
///     .auto_create_dirs(true)
///     .with_settings(settings)
///     .build()?;
/// ```
pub struct SyncEngineBuilder {
    root: PathBuf,
    backend: Arc<dyn RemoteBackend>,
    auto_create_dirs: bool,
    config: EngineConfig,
    settings: Option<Arc<dyn SettingsProvider>>,
    progress: Option<Arc<dyn ProgressSink>>,
    maps: Option<Arc<dyn MapRegionProvider>>,
    network: Option<Arc<NetworkMonitor>>,
    manifest: Option<Manifest>,
}

impl SyncEngineBuilder {
    /// Create a new builder with the engine root directory.
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn RemoteBackend>) -> Self {
        Self {
            root: root.into(),
            backend,
            auto_create_dirs: false,
            config: EngineConfig::default(),
            settings: None,
            progress: None,
            maps: None,
            network: None,
            manifest: None,
        }
    }

    /// Auto-create required directories if they don't exist.
    ///
    /// When enabled, the builder creates the root plus `data/` and `cache/`.
    ///
    /// Default: `false` (the root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Settings used to derive default download preferences.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Progress sink for jobs and reconcile runs.
    ///
    /// Default: [`TracingProgress`]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Enable offline map regions for downloads that carry a style.
    pub fn with_map_provider(mut self, maps: Arc<dyn MapRegionProvider>) -> Self {
        self.maps = Some(maps);
        self
    }

    /// Share a network monitor with the host.
    ///
    /// Default: a monitor that reports an unmetered connection.
    pub fn with_network_monitor(mut self, network: Arc<NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    /// Seed the tree with `manifest`, replacing any cached one.
    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Create the required directory structure.
    fn create_directory_structure(root: &Path) -> Result<()> {
        let dirs = [
            root.to_path_buf(),
            root.join(PathsConfig::DATA_DIR_NAME),
            root.join(PathsConfig::CACHE_DIR_NAME),
        ];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| SyncError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.clone()),
                    source: Some(e),
                })?;
            }
        }

        Ok(())
    }

    /// Build the SyncEngine instance.
    pub fn build(self) -> Result<SyncEngine> {
        self.config.validate()?;
        if self.auto_create_dirs {
            Self::create_directory_structure(&self.root)?;
        } else if !self.root.exists() {
            return Err(SyncError::Config {
                message: format!("Engine root does not exist: {}", self.root.display()),
            });
        }

        let config = self.config;
        let repo = ContentRepository::open_cached(
            self.root.join(PathsConfig::MANIFEST_FILENAME),
            Some(self.backend.clone()),
        )?;
        if let Some(manifest) = self.manifest {
            repo.replace_manifest(manifest)?;
        }
        let repo = Arc::new(repo);

        let store = Arc::new(LocalAssetStore::at_root(&self.root, config.preview_scale));
        let registry = Arc::new(JobRegistry::new(
            config.outcome_grace,
            DownloadConfig::MAX_RETAINED_OUTCOMES,
        ));
        let ledger = Arc::new(JobLedger::new(self.root.join(PathsConfig::JOB_LEDGER_FILENAME)));
        let transfer = Arc::new(Transfer::new(
            self.backend.clone(),
            store.clone(),
            config.fetch_timeout,
        ));
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(NetworkMonitor::new(NetworkState::default())));
        let progress = self
            .progress
            .unwrap_or_else(|| Arc::new(TracingProgress));
        let preferences = match &self.settings {
            Some(settings) => DownloadPreferences::load(settings.as_ref()),
            None => DownloadPreferences::default(),
        };

        let orchestrator = DownloadOrchestrator::new(OrchestratorParts {
            repo: repo.clone(),
            store: store.clone(),
            transfer: transfer.clone(),
            registry: registry.clone(),
            ledger: ledger.clone(),
            network: network.clone(),
            progress: progress.clone(),
            maps: self.maps,
            max_concurrent_jobs: config.max_concurrent_jobs,
        });
        let status = StatusAggregator::new(repo.clone(), store.clone(), registry.clone());
        let inventory = Inventory::new(repo.clone(), store.clone(), registry.clone());
        let updater = DifferentialUpdater::new(
            repo.clone(),
            store.clone(),
            transfer,
            self.backend,
            network.clone(),
            preferences.policy,
            config.max_reconcile_failures,
        );

        let interrupted = ledger.interrupted().len();
        if interrupted > 0 {
            tracing::info!("{} interrupted downloads can be resumed", interrupted);
        }
        tracing::info!(
            "Sync engine ready at {} ({} nodes cached)",
            self.root.display(),
            repo.len()
        );

        Ok(SyncEngine {
            root: self.root,
            config,
            preferences,
            repo,
            store,
            registry,
            ledger,
            network,
            progress,
            orchestrator,
            status,
            inventory,
            updater,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AssetStream;
    use crate::node::ContentNode;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Offline;

    #[async_trait]
    impl RemoteBackend for Offline {
        async fn fetch_manifest(&self) -> Result<Manifest> {
            Err(SyncError::ManifestFetchFailed {
                message: "offline".into(),
            })
        }

        async fn fetch_children(&self, node: &ContentNode) -> Result<Vec<ContentNode>> {
            Err(SyncError::unavailable(node.pin(), "offline"))
        }

        async fn open_asset(&self, reference: &str) -> Result<AssetStream> {
            Err(SyncError::fetch(reference, "offline"))
        }

        async fn asset_hash(&self, _reference: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let result = SyncEngineBuilder::new(tmp.path().join("missing"), Arc::new(Offline)).build();
        assert!(matches!(result, Err(SyncError::Config { .. })));
    }

    #[test]
    fn test_invalid_preview_scale_is_config_error() {
        let tmp = TempDir::new().unwrap();
        for scale in [1.0, 0.0] {
            let result = SyncEngineBuilder::new(tmp.path(), Arc::new(Offline))
                .with_config(EngineConfig::default().with_preview_scale(scale))
                .build();
            assert!(matches!(result, Err(SyncError::Config { .. })));
        }
        assert!(!tmp.path().join(PathsConfig::MANIFEST_FILENAME).exists());
    }

    #[test]
    fn test_auto_create_dirs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("engine");
        let engine = SyncEngineBuilder::new(&root, Arc::new(Offline))
            .auto_create_dirs(true)
            .build()
            .unwrap();
        assert!(root.join(PathsConfig::DATA_DIR_NAME).is_dir());
        assert!(root.join(PathsConfig::CACHE_DIR_NAME).is_dir());
        assert_eq!(engine.root(), root.as_path());
    }
}
