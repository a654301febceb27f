//! Error types for the sync engine.
//!
//! Every failure carries an [`ErrorKind`] from a small, closed taxonomy. Job
//! outcomes and reconcile results only expose the kind; the full
//! [`SyncError`] (with path and message context) is logged where it happens.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Stable failure classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingRequiredField,
    AlreadyDownloading,
    AlreadyDownloaded,
    InvalidQuality,
    DeleteFailed,
    CreateParentFailed,
    FetchFailed,
    DecodeFailed,
    StoreFailed,
    UnknownNamespace,
    ManifestFetchFailed,
    DataUnavailable,
    /// The job or reconcile run was cancelled through its token.
    Cancelled,
    /// Engine misconfiguration or a lost worker task.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingRequiredField => "missing_required_field",
            ErrorKind::AlreadyDownloading => "already_downloading",
            ErrorKind::AlreadyDownloaded => "already_downloaded",
            ErrorKind::InvalidQuality => "invalid_quality",
            ErrorKind::DeleteFailed => "delete_failed",
            ErrorKind::CreateParentFailed => "create_parent_failed",
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::DecodeFailed => "decode_failed",
            ErrorKind::StoreFailed => "store_failed",
            ErrorKind::UnknownNamespace => "unknown_namespace",
            ErrorKind::ManifestFetchFailed => "manifest_fetch_failed",
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Request-level kinds abort the whole operation; the others are
    /// recorded against a single node and processing continues.
    pub fn is_request_level(&self) -> bool {
        matches!(
            self,
            ErrorKind::MissingRequiredField
                | ErrorKind::InvalidQuality
                | ErrorKind::AlreadyDownloading
                | ErrorKind::UnknownNamespace
                | ErrorKind::ManifestFetchFailed
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    // Manifest and tree errors
    #[error("Missing required field '{field}' on {record}")]
    MissingRequiredField { record: String, field: String },

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Manifest fetch failed: {message}")]
    ManifestFetchFailed { message: String },

    #[error("Data unavailable for {pin}: {message}")]
    DataUnavailable { pin: String, message: String },

    // Request validation
    #[error("A download is already running for {pin}")]
    AlreadyDownloading { pin: String },

    #[error("Asset already downloaded for {pin}")]
    AlreadyDownloaded { pin: String },

    #[error("Image quality {quality} is outside 1..=100")]
    InvalidQuality { quality: i64 },

    // Per-node transfer errors
    #[error("Failed to delete {path:?}: {message}")]
    DeleteFailed { path: PathBuf, message: String },

    #[error("Failed to create parent directory {path:?}: {message}")]
    CreateParentFailed { path: PathBuf, message: String },

    #[error("Fetch failed for {reference}: {message}")]
    FetchFailed { reference: String, message: String },

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to decode {reference}: {message}")]
    DecodeFailed { reference: String, message: String },

    #[error("Failed to store {path:?}: {message}")]
    StoreFailed { path: PathBuf, message: String },

    // Reconcile
    #[error("Reconcile gave up after {failures} failures (first: {first})")]
    TooManyFailures { failures: usize, first: ErrorKind },

    #[error("Operation was cancelled")]
    Cancelled,

    // Local persistence
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let reference = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        SyncError::FetchFailed {
            reference,
            message: err.to_string(),
        }
    }
}

impl SyncError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SyncError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn fetch(reference: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::FetchFailed {
            reference: reference.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(reference: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::DecodeFailed {
            reference: reference.into(),
            message: message.to_string(),
        }
    }

    pub fn store(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        SyncError::StoreFailed {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn unavailable(pin: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        SyncError::DataUnavailable {
            pin: pin.to_string(),
            message: message.to_string(),
        }
    }

    /// Map this error onto the reported taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MissingRequiredField { .. } => ErrorKind::MissingRequiredField,
            SyncError::UnknownNamespace(_) => ErrorKind::UnknownNamespace,
            SyncError::ManifestFetchFailed { .. } => ErrorKind::ManifestFetchFailed,
            SyncError::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            SyncError::AlreadyDownloading { .. } => ErrorKind::AlreadyDownloading,
            SyncError::AlreadyDownloaded { .. } => ErrorKind::AlreadyDownloaded,
            SyncError::InvalidQuality { .. } => ErrorKind::InvalidQuality,
            SyncError::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            SyncError::CreateParentFailed { .. } => ErrorKind::CreateParentFailed,
            SyncError::FetchFailed { .. } | SyncError::Timeout(_) => ErrorKind::FetchFailed,
            SyncError::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            SyncError::StoreFailed { .. } | SyncError::Io { .. } | SyncError::Json { .. } => {
                ErrorKind::StoreFailed
            }
            SyncError::TooManyFailures { first, .. } => *first,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Config { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error aborts the enclosing operation outright.
    pub fn is_request_level(&self) -> bool {
        self.kind().is_request_level()
    }
}
