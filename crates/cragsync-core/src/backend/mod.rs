//! Remote data source contract.
//!
//! The engine only needs four things from the server: the manifest, the
//! children of a node, a byte stream for an asset reference and that
//! asset's content hash.

mod http;

pub use http::HttpBackend;

use crate::error::Result;
use crate::node::{ContentNode, Manifest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Streamed asset body.
pub struct AssetStream {
    /// Content length when the server reports one.
    pub total: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for AssetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Fetch the complete manifest.
    async fn fetch_manifest(&self) -> Result<Manifest>;

    /// Fetch the children of `node` in display order.
    async fn fetch_children(&self, node: &ContentNode) -> Result<Vec<ContentNode>>;

    /// Open a byte stream for an asset reference.
    async fn open_asset(&self, reference: &str) -> Result<AssetStream>;

    /// Lowercase hex SHA-256 of the remote object, if the server knows it.
    async fn asset_hash(&self, reference: &str) -> Result<Option<String>>;
}
