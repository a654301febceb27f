//! REST backend over HTTP.
//!
//! Endpoints:
//! - `GET {api}/manifest` returns the full manifest.
//! - `GET {api}/{ParentTable}/{id}/{ChildTable}` returns the children of one
//!   node as an ordered `id -> record` object; records may carry a
//!   `childrenCount`.
//! - Asset references are either `http(s)` URLs or `gs://bucket/path`
//!   storage locators, resolved against the storage base URL.
//! - `HEAD` on an asset URL exposes its SHA-256 in `X-Content-SHA256`.

use super::{AssetStream, RemoteBackend};
use crate::config::NetworkConfig;
use crate::error::{Result, SyncError};
use crate::network::{extract_domain, HttpClient};
use crate::node::{ContentNode, Manifest, ManifestRecord};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct ChildRecord {
    #[serde(flatten)]
    record: ManifestRecord,
    #[serde(rename = "childrenCount", default)]
    children_count: usize,
}

/// [`RemoteBackend`] talking to the content REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: HttpClient,
    api_base: Url,
    storage_base: Url,
}

impl HttpBackend {
    pub fn new(api_base: &str, storage_base: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: HttpClient::with_timeout(timeout)?,
            api_base: parse_base(api_base)?,
            storage_base: parse_base(storage_base)?,
        })
    }

    /// Resolve an opaque asset reference to a fetchable URL.
    pub fn resolve(&self, reference: &str) -> Result<Url> {
        let url = Url::parse(reference).map_err(|e| SyncError::fetch(reference, e))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme if scheme == NetworkConfig::STORAGE_SCHEME => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| SyncError::fetch(reference, "storage reference without bucket"))?;
                let path = url
                    .path()
                    .trim_start_matches('/')
                    .split('/')
                    .map(|segment| {
                        let decoded = urlencoding::decode(segment)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| segment.to_string());
                        urlencoding::encode(&decoded).into_owned()
                    })
                    .collect::<Vec<_>>()
                    .join("/");
                self.storage_base
                    .join(&format!("{}/{}", urlencoding::encode(bucket), path))
                    .map_err(|e| SyncError::fetch(reference, e))
            }
            other => Err(SyncError::fetch(
                reference,
                format!("unsupported reference scheme '{}'", other),
            )),
        }
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path)
            .map_err(|e| SyncError::Config {
                message: format!("Invalid API path {}: {}", path, e),
            })
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    // A trailing slash makes `join` append rather than replace the last segment.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized).map_err(|e| SyncError::Config {
        message: format!("Invalid base URL {}: {}", raw, e),
    })
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn fetch_manifest(&self) -> Result<Manifest> {
        let url = self.api_url("manifest")?;
        let failed = |e: SyncError| SyncError::ManifestFetchFailed {
            message: e.to_string(),
        };
        let response = self.client.get(url.as_str()).await.map_err(failed)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| failed(SyncError::from(e)))?;
        debug!(
            "Fetched manifest from {} ({} bytes)",
            extract_domain(url.as_str()),
            body.len()
        );
        Manifest::from_slice(&body)
    }

    async fn fetch_children(&self, node: &ContentNode) -> Result<Vec<ContentNode>> {
        let Some(child_ns) = node.namespace().child() else {
            return Ok(Vec::new());
        };
        let url = self.api_url(&format!(
            "{}/{}/{}",
            node.namespace().table_name(),
            urlencoding::encode(node.object_id().as_str()),
            child_ns.table_name()
        ))?;
        let response = self.client.get(url.as_str()).await?;
        let table: Map<String, Value> = response.json().await?;

        let mut children = Vec::with_capacity(table.len());
        for (id, raw) in table {
            let child: ChildRecord = serde_json::from_value(raw).map_err(|e| {
                SyncError::MissingRequiredField {
                    record: format!("{}/{}", child_ns, id),
                    field: e.to_string(),
                }
            })?;
            children.push(child.record.to_node(child_ns, &id, child.children_count)?);
        }
        debug!("{} > fetched {} children", node.pin(), children.len());
        Ok(children)
    }

    async fn open_asset(&self, reference: &str) -> Result<AssetStream> {
        let url = self.resolve(reference)?;
        let response = self.client.get(url.as_str()).await?;
        let total = response.content_length();
        let reference = reference.to_string();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| SyncError::fetch(reference.clone(), e)))
            .boxed();
        Ok(AssetStream { total, chunks })
    }

    async fn asset_hash(&self, reference: &str) -> Result<Option<String>> {
        let url = self.resolve(reference)?;
        let response = self.client.head(url.as_str()).await?;
        let hash = response
            .headers()
            .get(NetworkConfig::CONTENT_HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_lowercase());
        if hash.is_none() {
            warn!("No content hash reported for {}", reference);
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new(
            "https://api.example.com/v1",
            "https://storage.example.com",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_storage_reference() {
        let url = backend().resolve("gs://climbing/images/Zone 1.jpg").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.example.com/climbing/images/Zone%201.jpg"
        );
    }

    #[test]
    fn test_resolve_http_reference_passthrough() {
        let url = backend().resolve("https://cdn.example.com/a.jpg").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/a.jpg");
    }

    #[test]
    fn test_resolve_unknown_scheme() {
        let err = backend().resolve("ftp://host/a.jpg").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FetchFailed);
    }

    #[test]
    fn test_api_url_keeps_base_path() {
        let url = backend().api_url("Zones/Z1/Sectors").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/Zones/Z1/Sectors");
    }
}
