//! Centralized configuration for the sync engine.
//!
//! Constant tables hold fixed protocol values and defaults; [`EngineConfig`]
//! carries the knobs a host application may tune at runtime.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "cragsync/0.6";
    /// Response header carrying the hex SHA-256 of a stored object.
    pub const CONTENT_HASH_HEADER: &'static str = "x-content-sha256";
    pub const STORAGE_SCHEME: &'static str = "gs";
}

/// Download defaults and limits.
pub struct DownloadConfig;

impl DownloadConfig {
    pub const DEFAULT_QUALITY: u8 = 85;
    pub const MIN_QUALITY: i64 = 1;
    pub const MAX_QUALITY: i64 = 100;
    pub const PREVIEW_SCALE: f32 = 0.5;
    pub const MAX_CONCURRENT_JOBS: usize = 3;
    pub const OUTCOME_GRACE: Duration = Duration::from_secs(60);
    /// Upper bound on retained terminal outcomes.
    pub const MAX_RETAINED_OUTCOMES: usize = 256;
}

/// Reconcile limits.
pub struct ReconcileConfig;

impl ReconcileConfig {
    pub const MAX_FAILURES: usize = 5;
}

/// Directory and file names under the engine root.
pub struct PathsConfig;

impl PathsConfig {
    pub const DATA_DIR_NAME: &'static str = "data";
    pub const CACHE_DIR_NAME: &'static str = "cache";
    pub const MANIFEST_FILENAME: &'static str = "manifest.json";
    pub const JOB_LEDGER_FILENAME: &'static str = "jobs.json";
    pub const HASH_INDEX_FILENAME: &'static str = "asset-hashes.json";
    pub const TEMP_SUFFIX: &'static str = ".part";
}

/// Settings keys read through the settings provider.
pub struct SettingsKeys;

impl SettingsKeys {
    pub const DOWNLOAD_QUALITY: &'static str = "download.quality";
    pub const WIFI_ONLY: &'static str = "download.wifi_only";
    pub const ALLOW_ROAMING: &'static str = "download.allow_roaming";
}

/// Runtime engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of jobs executing at once.
    pub max_concurrent_jobs: usize,
    /// Timeout applied to every network fetch.
    pub fetch_timeout: Duration,
    /// How long an observed terminal outcome stays queryable.
    pub outcome_grace: Duration,
    /// Reconcile fails once more than this many assets failed.
    pub max_reconcile_failures: usize,
    /// Scale of the preview variant stored for zones.
    pub preview_scale: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DownloadConfig::MAX_CONCURRENT_JOBS,
            fetch_timeout: NetworkConfig::FETCH_TIMEOUT,
            outcome_grace: DownloadConfig::OUTCOME_GRACE,
            max_reconcile_failures: ReconcileConfig::MAX_FAILURES,
            preview_scale: DownloadConfig::PREVIEW_SCALE,
        }
    }
}

impl EngineConfig {
    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_outcome_grace(mut self, grace: Duration) -> Self {
        self.outcome_grace = grace;
        self
    }

    pub fn with_max_reconcile_failures(mut self, failures: usize) -> Self {
        self.max_reconcile_failures = failures;
        self
    }

    pub fn with_preview_scale(mut self, scale: f32) -> Self {
        self.preview_scale = scale;
        self
    }

    /// Reject values the store cannot work with.
    ///
    /// The preview must be strictly smaller than the full image, otherwise
    /// its file name would parse back as the full-resolution variant.
    pub fn validate(&self) -> Result<()> {
        if !(self.preview_scale > 0.0 && self.preview_scale < 1.0) {
            return Err(SyncError::Config {
                message: format!(
                    "preview_scale must be between 0 and 1 (exclusive), got {}",
                    self.preview_scale
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_jobs, DownloadConfig::MAX_CONCURRENT_JOBS);
        assert_eq!(config.fetch_timeout, NetworkConfig::FETCH_TIMEOUT);
        assert_eq!(config.max_reconcile_failures, ReconcileConfig::MAX_FAILURES);
    }

    #[test]
    fn test_concurrency_never_zero() {
        let config = EngineConfig::default().with_max_concurrent_jobs(0);
        assert_eq!(config.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_preview_scale_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        for scale in [0.0, -0.5, 1.0, 2.0, f32::NAN] {
            let config = EngineConfig::default().with_preview_scale(scale);
            assert!(config.validate().is_err(), "scale {} accepted", scale);
        }
    }

    #[test]
    fn test_quality_bounds() {
        assert!(DownloadConfig::MIN_QUALITY <= DownloadConfig::DEFAULT_QUALITY as i64);
        assert!(DownloadConfig::DEFAULT_QUALITY as i64 <= DownloadConfig::MAX_QUALITY);
    }
}
