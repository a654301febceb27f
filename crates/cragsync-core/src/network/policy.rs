//! Connectivity state and download network policies.

use crate::cancel::CancellationToken;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::watch;
use tracing::debug;

/// Which connections a job may run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetworkPolicy {
    /// Unmetered connections only.
    WifiOnly,
    /// Any connection that is not roaming.
    NoRoaming,
    #[default]
    Any,
}

impl NetworkPolicy {
    pub fn allows(&self, state: &NetworkState) -> bool {
        state.connected
            && match self {
                NetworkPolicy::WifiOnly => !state.metered,
                NetworkPolicy::NoRoaming => !state.roaming,
                NetworkPolicy::Any => true,
            }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkPolicy::WifiOnly => "wifi-only",
            NetworkPolicy::NoRoaming => "no-roaming",
            NetworkPolicy::Any => "any",
        }
    }
}

impl FromStr for NetworkPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "wifi-only" | "wifi" => Ok(NetworkPolicy::WifiOnly),
            "no-roaming" => Ok(NetworkPolicy::NoRoaming),
            "any" => Ok(NetworkPolicy::Any),
            other => Err(SyncError::Config {
                message: format!("Unknown network policy: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the device's connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub metered: bool,
    pub roaming: bool,
    pub connected: bool,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            metered: false,
            roaming: false,
            connected: true,
        }
    }
}

impl NetworkState {
    pub fn offline() -> Self {
        Self {
            metered: false,
            roaming: false,
            connected: false,
        }
    }
}

/// Current connectivity plus change notifications.
///
/// The host pushes updates with [`NetworkMonitor::update`]; queued jobs wait
/// on [`NetworkMonitor::wait_for`] until their policy is satisfied.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkState::default())
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }

    /// Publish a connectivity change.
    pub fn update(&self, state: NetworkState) {
        debug!(
            "Network state changed: connected={} metered={} roaming={}",
            state.connected, state.metered, state.roaming
        );
        self.tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    /// Suspend until `policy` is satisfied or `cancel` fires.
    pub async fn wait_for(&self, policy: NetworkPolicy, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            cancel.check()?;
            if policy.allows(&rx.borrow_and_update()) {
                return Ok(());
            }
            debug!("Waiting for network matching policy '{}'", policy);
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(SyncError::Config {
                            message: "network monitor dropped".to_string(),
                        });
                    }
                }
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            }
        }
    }
}
