//! Cragsync Core - offline synchronization engine for climbing topos.
//!
//! Mirrors the Area → Zone → Sector → Path content tree of a remote backend
//! into local storage: recursive subtree downloads with single-flight job
//! tracking, aggregated download status, deletion and hash-based
//! reconciliation against server changes.
//!
//! # Example
//!
//! ```rust,ignore
//! use cragsync_core::{DownloadOptions, HttpBackend, SyncEngine};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> cragsync_core::Result<()> {
//!     let backend = HttpBackend::new(
//!         "https://api.example.com/",
//!         "https://storage.example.com/",
//!         Duration::from_secs(30),
//!     )?;
//!     let engine = SyncEngine::builder("/path/to/cragsync", Arc::new(backend))
//!         .auto_create_dirs(true)
//!         .build()?;
//!     engine.refresh().await?;
//!
//!     let zone = engine.find(&"Zone/abc123".parse()?).expect("zone exists");
//!     let job = engine.download(&zone, engine.default_options())?;
//!     let outcome = job.wait().await;
//!     println!("{} -> {:?}", zone.pin(), outcome.result);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cancel;
pub mod config;
pub mod error;
pub mod inventory;
pub mod jobs;
pub mod map;
pub mod network;
pub mod node;
pub mod orchestrator;
pub mod progress;
pub mod settings;
pub mod status;
pub mod store;
pub mod transfer;
pub mod updater;

mod api;

// Re-export commonly used types
pub use backend::{AssetStream, HttpBackend, RemoteBackend};
pub use cancel::{CancellationToken, CancelledError};
pub use config::EngineConfig;
pub use error::{ErrorKind, Result, SyncError};
pub use jobs::{JobHandle, JobId, JobOutcome, JobSnapshot, JobState, LedgerEntry, NodeOutcome};
pub use map::MapRegionProvider;
pub use network::{NetworkMonitor, NetworkPolicy, NetworkState};
pub use node::{
    AssetRefs, ContentNode, ContentRepository, Manifest, ManifestRecord, Namespace, NodeRef,
    ObjectId, Pin,
};
pub use orchestrator::DownloadOptions;
pub use progress::{NullProgress, ProgressPhase, ProgressSink, RecordingProgress, TracingProgress};
pub use settings::{DownloadPreferences, JsonSettings, MemorySettings, SettingsProvider};
pub use status::DownloadStatus;
pub use store::{AssetKind, AssetName, LocalAssetStore, StoreRoot, StoredAsset, Variant};
pub use updater::ReconcileReport;

// Re-export builder from api module
pub use api::SyncEngineBuilder;

use inventory::Inventory;
use jobs::{JobLedger, JobRegistry};
use orchestrator::DownloadOrchestrator;
use status::StatusAggregator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use updater::DifferentialUpdater;

/// Main entry point of the engine.
///
/// Owns one instance of every component and wires them to the same
/// repository, asset store and job registry. The methods live in the
/// `api` submodules, grouped by concern.
pub struct SyncEngine {
    root: PathBuf,
    config: EngineConfig,
    preferences: DownloadPreferences,
    repo: Arc<ContentRepository>,
    store: Arc<LocalAssetStore>,
    registry: Arc<JobRegistry>,
    ledger: Arc<JobLedger>,
    network: Arc<NetworkMonitor>,
    progress: Arc<dyn ProgressSink>,
    orchestrator: DownloadOrchestrator,
    status: StatusAggregator,
    inventory: Inventory,
    updater: DifferentialUpdater,
}

impl SyncEngine {
    /// Create a builder rooted at `root` talking to `backend`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let engine = SyncEngine::builder("./offline", backend)
    ///     .auto_create_dirs(true)
    ///     .with_config(EngineConfig::default().with_max_concurrent_jobs(2))
    ///     .build()?;
    /// ```
    pub fn builder(root: impl Into<PathBuf>, backend: Arc<dyn RemoteBackend>) -> SyncEngineBuilder {
        SyncEngineBuilder::new(root, backend)
    }

    /// Engine root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Download preferences read from settings at build time.
    pub fn preferences(&self) -> &DownloadPreferences {
        &self.preferences
    }

    pub fn store(&self) -> &Arc<LocalAssetStore> {
        &self.store
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }
}
