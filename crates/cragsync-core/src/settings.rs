//! Read-only settings collaborator.
//!
//! The host owns preference storage; the engine only reads download quality
//! and the network constraint through [`SettingsProvider`].

use crate::config::{DownloadConfig, SettingsKeys};
use crate::error::Result;
use crate::network::NetworkPolicy;
use crate::store::atomic::read_json;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::warn;

pub trait SettingsProvider: Send + Sync {
    /// Raw value for `key`, if set.
    fn get(&self, key: &str) -> Option<Value>;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }
}

/// In-memory settings, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }
}

impl SettingsProvider for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

/// Settings loaded once from a flat JSON object.
#[derive(Debug, Default)]
pub struct JsonSettings {
    values: Map<String, Value>,
}

impl JsonSettings {
    /// Load settings from `path`; a missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        let values = read_json::<Map<String, Value>>(path)?.unwrap_or_default();
        Ok(Self { values })
    }
}

impl SettingsProvider for JsonSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}

/// Download preferences derived from settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPreferences {
    pub image_quality: u8,
    pub policy: NetworkPolicy,
}

impl Default for DownloadPreferences {
    fn default() -> Self {
        Self {
            image_quality: DownloadConfig::DEFAULT_QUALITY,
            policy: NetworkPolicy::NoRoaming,
        }
    }
}

impl DownloadPreferences {
    /// Wi-Fi only wins over roaming; roaming must be opted into.
    pub fn load(settings: &dyn SettingsProvider) -> Self {
        let raw_quality = settings.get_i64(
            SettingsKeys::DOWNLOAD_QUALITY,
            DownloadConfig::DEFAULT_QUALITY as i64,
        );
        let image_quality =
            if (DownloadConfig::MIN_QUALITY..=DownloadConfig::MAX_QUALITY).contains(&raw_quality) {
                raw_quality as u8
            } else {
                warn!(
                    "Ignoring out-of-range download quality {}, using {}",
                    raw_quality,
                    DownloadConfig::DEFAULT_QUALITY
                );
                DownloadConfig::DEFAULT_QUALITY
            };

        let policy = if settings.get_bool(SettingsKeys::WIFI_ONLY, false) {
            NetworkPolicy::WifiOnly
        } else if !settings.get_bool(SettingsKeys::ALLOW_ROAMING, false) {
            NetworkPolicy::NoRoaming
        } else {
            NetworkPolicy::Any
        };

        Self {
            image_quality,
            policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let prefs = DownloadPreferences::load(&MemorySettings::new());
        assert_eq!(prefs, DownloadPreferences::default());
    }

    #[test]
    fn test_policy_mapping() {
        let settings = MemorySettings::new();
        settings.set(SettingsKeys::ALLOW_ROAMING, true);
        assert_eq!(DownloadPreferences::load(&settings).policy, NetworkPolicy::Any);

        settings.set(SettingsKeys::WIFI_ONLY, true);
        assert_eq!(DownloadPreferences::load(&settings).policy, NetworkPolicy::WifiOnly);
    }

    #[test]
    fn test_quality_out_of_range_falls_back() {
        let settings = MemorySettings::new();
        settings.set(SettingsKeys::DOWNLOAD_QUALITY, 250);
        assert_eq!(
            DownloadPreferences::load(&settings).image_quality,
            DownloadConfig::DEFAULT_QUALITY
        );
        settings.set(SettingsKeys::DOWNLOAD_QUALITY, 40);
        assert_eq!(DownloadPreferences::load(&settings).image_quality, 40);
    }

    #[test]
    fn test_json_settings() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"download.wifi_only": true, "download.quality": 60}"#).unwrap();

        let settings = JsonSettings::load(&path).unwrap();
        let prefs = DownloadPreferences::load(&settings);
        assert_eq!(prefs.policy, NetworkPolicy::WifiOnly);
        assert_eq!(prefs.image_quality, 60);

        let empty = JsonSettings::load(&tmp.path().join("missing.json")).unwrap();
        assert!(empty.get("download.quality").is_none());
    }
}
