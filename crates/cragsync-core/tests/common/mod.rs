//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cragsync_core::backend::AssetStream;
use cragsync_core::store::hashing::sha256_bytes;
use cragsync_core::{
    ContentNode, EngineConfig, Manifest, ManifestRecord, Namespace, NullProgress, Pin,
    RemoteBackend, Result, SyncEngine, SyncError,
};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::watch;

/// In-memory backend with programmable failures.
pub struct FakeBackend {
    manifest: Mutex<Manifest>,
    assets: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    manifest_down: Mutex<bool>,
    opened: Mutex<Vec<String>>,
    pub hash_calls: AtomicUsize,
    pub children_calls: AtomicUsize,
    paused: watch::Sender<bool>,
}

impl FakeBackend {
    pub fn new(manifest: Manifest) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            manifest: Mutex::new(manifest),
            assets: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            manifest_down: Mutex::new(false),
            opened: Mutex::new(Vec::new()),
            hash_calls: AtomicUsize::new(0),
            children_calls: AtomicUsize::new(0),
            paused,
        }
    }

    pub fn set_asset(&self, reference: &str, bytes: Vec<u8>) {
        self.assets.lock().unwrap().insert(reference.to_string(), bytes);
    }

    /// Make every fetch of `reference` fail with a network error.
    pub fn fail(&self, reference: &str) {
        self.failing.lock().unwrap().insert(reference.to_string());
    }

    pub fn heal(&self, reference: &str) {
        self.failing.lock().unwrap().remove(reference);
    }

    pub fn set_manifest_down(&self, down: bool) {
        *self.manifest_down.lock().unwrap() = down;
    }

    /// Hold every asset fetch until [`FakeBackend::resume`].
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn clear_opened(&self) {
        self.opened.lock().unwrap().clear();
    }
}

#[async_trait]
impl RemoteBackend for FakeBackend {
    async fn fetch_manifest(&self) -> Result<Manifest> {
        if *self.manifest_down.lock().unwrap() {
            return Err(SyncError::ManifestFetchFailed {
                message: "server unreachable".into(),
            });
        }
        Ok(self.manifest.lock().unwrap().clone())
    }

    async fn fetch_children(&self, node: &ContentNode) -> Result<Vec<ContentNode>> {
        self.children_calls.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::unavailable(node.pin(), "children endpoint disabled"))
    }

    async fn open_asset(&self, reference: &str) -> Result<AssetStream> {
        let mut rx = self.paused.subscribe();
        let _ = rx.wait_for(|paused| !*paused).await;

        self.opened.lock().unwrap().push(reference.to_string());
        if self.failing.lock().unwrap().contains(reference) {
            return Err(SyncError::fetch(reference, "simulated network error"));
        }
        let bytes = self
            .assets
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| SyncError::fetch(reference, "404 Not Found"))?;

        let total = bytes.len() as u64;
        let chunks: Vec<Result<Bytes>> = bytes
            .chunks(512)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(AssetStream {
            total: Some(total),
            chunks: Box::pin(futures::stream::iter(chunks)),
        })
    }

    async fn asset_hash(&self, reference: &str) -> Result<Option<String>> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(reference) {
            return Err(SyncError::fetch(reference, "simulated network error"));
        }
        Ok(self.assets.lock().unwrap().get(reference).map(|b| sha256_bytes(b)))
    }
}

pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = ImageBuffer::from_pixel(width, height, Rgb([shade, 90, 160]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn kmz() -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file("doc.kml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<kml><Document/></kml>").unwrap();
        writer.finish().unwrap();
    }
    buffer.into_inner()
}

pub fn image_ref(id: &str) -> String {
    format!("gs://topos/{}.png", id)
}

pub fn kmz_ref(id: &str) -> String {
    format!("gs://topos/{}.kmz", id)
}

fn record(name: &str, image: Option<String>) -> ManifestRecord {
    ManifestRecord {
        display_name: Some(name.to_string()),
        image,
        ..ManifestRecord::default()
    }
}

/// `A1 → Z1 → {S1 → {P1}, S2}` plus an empty area `A2`.
pub fn sample_manifest() -> Manifest {
    let mut manifest = Manifest::default();
    manifest
        .insert(Namespace::Area, "A1", record("Frankenjura", Some(image_ref("A1"))))
        .unwrap();
    manifest
        .insert(Namespace::Area, "A2", record("Elbsandstein", Some(image_ref("A2"))))
        .unwrap();
    manifest
        .insert(
            Namespace::Zone,
            "Z1",
            ManifestRecord {
                area: Some("A1".into()),
                kmz: Some(kmz_ref("Z1")),
                ..record("Pegnitztal", Some(image_ref("Z1")))
            },
        )
        .unwrap();
    for (id, name) in [("S1", "Bärenschlucht"), ("S2", "Weißenstein")] {
        manifest
            .insert(
                Namespace::Sector,
                id,
                ManifestRecord {
                    zone: Some("Z1".into()),
                    ..record(name, Some(image_ref(id)))
                },
            )
            .unwrap();
    }
    manifest
        .insert(
            Namespace::Path,
            "P1",
            ManifestRecord {
                sector: Some("S1".into()),
                ..record("Action Directe", None)
            },
        )
        .unwrap();
    manifest
}

pub fn backend_with_assets(manifest: Manifest) -> Arc<FakeBackend> {
    let backend = Arc::new(FakeBackend::new(manifest));
    for (i, id) in ["A1", "A2", "Z1", "S1", "S2"].iter().enumerate() {
        backend.set_asset(&image_ref(id), png(64, 48, 40 + i as u8 * 30));
    }
    backend.set_asset(&kmz_ref("Z1"), kmz());
    backend
}

pub struct Fixture {
    pub tmp: TempDir,
    pub backend: Arc<FakeBackend>,
    pub engine: SyncEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let backend = backend_with_assets(sample_manifest());
        let engine = SyncEngine::builder(tmp.path(), backend.clone())
            .auto_create_dirs(true)
            .with_config(config)
            .with_progress(Arc::new(NullProgress))
            .with_manifest(sample_manifest())
            .build()
            .unwrap();
        Self {
            tmp,
            backend,
            engine,
        }
    }

    pub fn node(&self, pin: &str) -> Arc<ContentNode> {
        let pin: Pin = pin.parse().unwrap();
        self.engine.find(&pin).unwrap()
    }

    pub fn pin(&self, pin: &str) -> Pin {
        pin.parse().unwrap()
    }
}
