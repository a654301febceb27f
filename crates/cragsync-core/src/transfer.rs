//! Asset persistence primitive shared by downloads and reconcile.
//!
//! fetch → decode → recompress → atomic store, with each stage mapped onto
//! its own error kind (`FetchFailed`, `DecodeFailed`, `StoreFailed`).

use crate::backend::RemoteBackend;
use crate::cancel::CancellationToken;
use crate::error::{Result, SyncError};
use crate::store::hashing::sha256_bytes;
use crate::store::{AssetName, HashEntry, LocalAssetStore, StoreRoot};
use futures::StreamExt;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageFormat};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Called after every received chunk with `(chunk_len, content_length)`.
pub type ChunkCallback<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Result of a successful store.
#[derive(Debug, Clone)]
pub struct Stored {
    pub path: PathBuf,
    pub bytes_fetched: u64,
    pub bytes_written: u64,
}

/// Image encoding parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Encoding {
    pub quality: u8,
    /// Resize factor relative to the decoded source.
    pub scale: f32,
}

pub struct Transfer {
    backend: Arc<dyn RemoteBackend>,
    store: Arc<LocalAssetStore>,
    fetch_timeout: Duration,
}

impl Transfer {
    pub fn new(backend: Arc<dyn RemoteBackend>, store: Arc<LocalAssetStore>, fetch_timeout: Duration) -> Self {
        Self {
            backend,
            store,
            fetch_timeout,
        }
    }

    pub fn store(&self) -> &Arc<LocalAssetStore> {
        &self.store
    }

    /// Download the full body of `reference`.
    pub async fn fetch(
        &self,
        reference: &str,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<Vec<u8>> {
        cancel.check()?;
        let mut stream = timeout(self.fetch_timeout, self.backend.open_asset(reference))
            .await
            .map_err(|_| SyncError::Timeout(self.fetch_timeout))??;

        let mut body = Vec::with_capacity(stream.total.unwrap_or(0) as usize);
        loop {
            cancel.check()?;
            let next = timeout(self.fetch_timeout, stream.chunks.next())
                .await
                .map_err(|_| SyncError::Timeout(self.fetch_timeout))?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| match e {
                SyncError::FetchFailed { .. } | SyncError::Timeout(_) => e,
                other => SyncError::fetch(reference, other),
            })?;
            on_chunk(chunk.len() as u64, stream.total);
            body.extend_from_slice(&chunk);
        }
        debug!("Fetched {} bytes from {}", body.len(), reference);
        Ok(body)
    }

    /// Fetch an image, recompress it and store it as `target`.
    pub async fn store_image(
        &self,
        reference: &str,
        target: &AssetName,
        encoding: Encoding,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<Stored> {
        self.store_image_in(StoreRoot::Data, reference, target, encoding, cancel, on_chunk)
            .await
    }

    /// [`Transfer::store_image`] under an explicit store root.
    pub async fn store_image_in(
        &self,
        root: StoreRoot,
        reference: &str,
        target: &AssetName,
        encoding: Encoding,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<Stored> {
        let raw = self.fetch(reference, cancel, on_chunk).await?;
        let source_sha256 = sha256_bytes(&raw);
        let fetched = raw.len() as u64;

        let reference_owned = reference.to_string();
        let encoded = tokio::task::spawn_blocking(move || transcode_image(&raw, encoding))
            .await
            .map_err(|e| SyncError::decode(reference, e))?
            .map_err(|e| SyncError::decode(reference_owned, e))?;

        cancel.check()?;
        self.persist(root, target, encoded, Some(source_sha256), fetched)
            .await
    }

    /// Produce `target` from a preview-cache copy instead of the network.
    ///
    /// The cache file is treated as the server object it was fetched as, so
    /// its source hash carries over to `target` and reconcile can still
    /// tell whether the server changed.
    pub async fn store_image_from_cache(
        &self,
        cached: &AssetName,
        target: &AssetName,
        encoding: Encoding,
    ) -> Result<Stored> {
        let source = self.store.path_in(StoreRoot::Cache, cached);
        let raw = tokio::fs::read(&source)
            .await
            .map_err(|e| SyncError::io_with_path(e, &source))?;
        let cache_key = LocalAssetStore::hash_key(StoreRoot::Cache, cached);
        let source_sha256 = self
            .store
            .hashes()
            .effective_hash(&cache_key, &sha256_bytes(&raw));

        let label = source.display().to_string();
        let encoded = tokio::task::spawn_blocking(move || transcode_image(&raw, encoding))
            .await
            .map_err(|e| SyncError::decode(label.clone(), e))?
            .map_err(|e| SyncError::decode(label, e))?;
        self.persist(StoreRoot::Data, target, encoded, Some(source_sha256), 0)
            .await
    }

    /// Fetch a KMZ overlay, check it is a real archive, and store it.
    pub async fn store_overlay(
        &self,
        reference: &str,
        target: &AssetName,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<Stored> {
        self.store_overlay_in(StoreRoot::Data, reference, target, cancel, on_chunk)
            .await
    }

    pub async fn store_overlay_in(
        &self,
        root: StoreRoot,
        reference: &str,
        target: &AssetName,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<Stored> {
        let raw = self.fetch(reference, cancel, on_chunk).await?;
        validate_kmz(&raw).map_err(|e| SyncError::decode(reference, e))?;
        let source_sha256 = sha256_bytes(&raw);
        let fetched = raw.len() as u64;
        self.persist(root, target, raw, Some(source_sha256), fetched)
            .await
    }

    async fn persist(
        &self,
        root: StoreRoot,
        target: &AssetName,
        bytes: Vec<u8>,
        source_sha256: Option<String>,
        bytes_fetched: u64,
    ) -> Result<Stored> {
        let stored_sha256 = sha256_bytes(&bytes);
        let bytes_written = bytes.len() as u64;
        let path = self.store.write_in(root, target, bytes).await?;

        let file_name = LocalAssetStore::hash_key(root, target);
        let recorded = match source_sha256 {
            Some(source_sha256) => {
                self.store
                    .hashes()
                    .record(
                        &file_name,
                        HashEntry {
                            source_sha256,
                            stored_sha256,
                        },
                    )
                    .await
            }
            None => self.store.hashes().remove(&file_name).await,
        };
        if let Err(e) = recorded {
            warn!("Failed to update hash index for {}: {}", file_name, e);
        }

        Ok(Stored {
            path,
            bytes_fetched,
            bytes_written,
        })
    }
}

/// Decode `raw`, resize by `encoding.scale` and re-encode as JPEG.
///
/// A JPEG source kept at full size and quality 100 is stored untouched.
pub fn transcode_image(raw: &[u8], encoding: Encoding) -> std::result::Result<Vec<u8>, String> {
    let format = image::guess_format(raw).map_err(|e| format!("unknown image format: {}", e))?;
    let decoded = image::load_from_memory_with_format(raw, format)
        .map_err(|e| format!("decode failed: {}", e))?;

    if format == ImageFormat::Jpeg && encoding.quality >= 100 && encoding.scale >= 1.0 {
        return Ok(raw.to_vec());
    }

    let resized = if encoding.scale < 1.0 {
        let width = ((decoded.width() as f32) * encoding.scale).round().max(1.0) as u32;
        let height = ((decoded.height() as f32) * encoding.scale).round().max(1.0) as u32;
        decoded.resize_exact(width, height, FilterType::Triangle)
    } else {
        decoded
    };

    let rgb = resized.to_rgb8();
    let mut encoded = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, encoding.quality.clamp(1, 100));
        encoder
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            .map_err(|e| format!("encode failed: {}", e))?;
    }

    if encoded.is_empty() {
        return Err("encoder produced empty payload".to_string());
    }
    Ok(encoded)
}

/// A KMZ is a zip archive with at least one `.kml` document.
pub fn validate_kmz(raw: &[u8]) -> std::result::Result<(), String> {
    let archive = zip::ZipArchive::new(Cursor::new(raw)).map_err(|e| format!("not a KMZ archive: {}", e))?;
    if archive
        .file_names()
        .any(|name| name.to_ascii_lowercase().ends_with(".kml"))
    {
        Ok(())
    } else {
        Err("KMZ archive contains no .kml document".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Write;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = ImageBuffer::from_pixel(width, height, Rgb([120u8, 80, 200]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_transcode_scales_and_encodes_jpeg() {
        let encoded = transcode_image(
            &png(40, 20),
            Encoding {
                quality: 80,
                scale: 0.5,
            },
        )
        .unwrap();
        assert_eq!(image::guess_format(&encoded).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[test]
    fn test_transcode_rejects_garbage() {
        let err = transcode_image(
            b"definitely not an image",
            Encoding {
                quality: 80,
                scale: 1.0,
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_jpeg_passthrough_at_full_quality() {
        let jpeg = transcode_image(
            &png(8, 8),
            Encoding {
                quality: 90,
                scale: 1.0,
            },
        )
        .unwrap();
        let again = transcode_image(
            &jpeg,
            Encoding {
                quality: 100,
                scale: 1.0,
            },
        )
        .unwrap();
        assert_eq!(again, jpeg);
    }

    #[test]
    fn test_validate_kmz() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("doc.kml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"<kml/>").unwrap();
            writer.finish().unwrap();
        }
        assert!(validate_kmz(buffer.get_ref()).is_ok());
        assert!(validate_kmz(b"PK but not really").is_err());
    }
}
