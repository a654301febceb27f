//! Atomic file writes.
//!
//! Data goes to a temp file in the target's directory, is flushed and
//! synced, then renamed over the target. Readers see either the old file or
//! the complete new one.

use crate::{Result, SyncError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::io_with_path(e, path)),
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| SyncError::io_with_path(e, path))?;

    let data: T = serde_json::from_str(&contents).map_err(|e| SyncError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let serialized = serde_json::to_vec_pretty(data).map_err(|e| SyncError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;
    write_bytes(path, &serialized)
}

/// Write raw bytes atomically, creating the parent directory if needed.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| SyncError::Io {
        message: "Target has no parent directory".to_string(),
        path: Some(path.to_path_buf()),
        source: None,
    })?;
    std::fs::create_dir_all(parent).map_err(|e| SyncError::io_with_path(e, parent))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| SyncError::io_with_path(e, parent))?;
    temp.write_all(bytes)
        .map_err(|e| SyncError::io_with_path(e, temp.path()))?;
    temp.flush()
        .map_err(|e| SyncError::io_with_path(e, temp.path()))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| SyncError::io_with_path(e, temp.path()))?;

    temp.persist(path)
        .map_err(|e| SyncError::io_with_path(e.error, path))?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("sample.json");
        let data = Sample {
            name: "zone".into(),
            count: 3,
        };

        write_json(&path, &data).unwrap();
        let loaded: Sample = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_read_missing_returns_none() {
        let tmp = TempDir::new().unwrap();
        let loaded: Option<Sample> = read_json(&tmp.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("asset.jpg");
        write_bytes(&path, b"first").unwrap();
        write_bytes(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_corrupt_json_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_json::<Sample>(&path).is_err());
    }
}
