//! Content tree model.
//!
//! One [`ContentNode`] type tagged by [`Namespace`] describes every level of
//! the Area → Zone → Sector → Path hierarchy. Identity is the
//! `(namespace, object_id)` pair, rendered as a [`Pin`].

pub mod manifest;
pub mod repository;

pub use manifest::{Manifest, ManifestRecord};
pub use repository::ContentRepository;

use crate::error::{Result, SyncError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Shared handle to a node.
pub type NodeRef = Arc<ContentNode>;

/// Level of a node in the content tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    Area,
    Zone,
    Sector,
    Path,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Area,
        Namespace::Zone,
        Namespace::Sector,
        Namespace::Path,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Area => "Area",
            Namespace::Zone => "Zone",
            Namespace::Sector => "Sector",
            Namespace::Path => "Path",
        }
    }

    /// Name of the manifest table and remote collection for this level.
    pub fn table_name(&self) -> &'static str {
        match self {
            Namespace::Area => "Areas",
            Namespace::Zone => "Zones",
            Namespace::Sector => "Sectors",
            Namespace::Path => "Paths",
        }
    }

    /// Record field that references a parent of this namespace.
    pub fn reference_field(&self) -> &'static str {
        match self {
            Namespace::Area => "area",
            Namespace::Zone => "zone",
            Namespace::Sector => "sector",
            Namespace::Path => "path",
        }
    }

    pub fn parent(&self) -> Option<Namespace> {
        match self {
            Namespace::Area => None,
            Namespace::Zone => Some(Namespace::Area),
            Namespace::Sector => Some(Namespace::Zone),
            Namespace::Path => Some(Namespace::Sector),
        }
    }

    pub fn child(&self) -> Option<Namespace> {
        match self {
            Namespace::Area => Some(Namespace::Zone),
            Namespace::Zone => Some(Namespace::Sector),
            Namespace::Sector => Some(Namespace::Path),
            Namespace::Path => None,
        }
    }

    /// Whether nodes of this level store an image asset of their own.
    pub fn has_asset(&self) -> bool {
        matches!(self, Namespace::Zone | Namespace::Sector)
    }

    /// Whether a download of this level descends into its children.
    pub fn has_downloadable_children(&self) -> bool {
        matches!(self, Namespace::Area | Namespace::Zone)
    }

    /// Whether the manifest must provide an image reference.
    pub fn requires_image(&self) -> bool {
        !matches!(self, Namespace::Path)
    }

    /// Recompression quality used when the updater refreshes an asset.
    pub fn image_quality(&self) -> u8 {
        match self {
            Namespace::Area | Namespace::Zone => 30,
            Namespace::Sector | Namespace::Path => 85,
        }
    }

    pub fn from_table_name(table: &str) -> Option<Namespace> {
        Namespace::ALL.into_iter().find(|ns| ns.table_name() == table)
    }
}

impl FromStr for Namespace {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SyncError::UnknownNamespace(s.to_string()))
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server object identifier.
///
/// Restricted to ASCII alphanumerics so that asset file names stay
/// unambiguous to parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    pub const MAX_LEN: usize = 64;

    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= Self::MAX_LEN
            && id.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(SyncError::MissingRequiredField {
                record: format!("object '{}'", id),
                field: "objectId".to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ObjectId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Stable key `"<namespace>/<objectId>"` correlating a node with its job and
/// its files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pin {
    namespace: Namespace,
    object_id: ObjectId,
}

impl Pin {
    pub fn new(namespace: Namespace, object_id: ObjectId) -> Self {
        Self {
            namespace,
            object_id,
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }
}

impl std::fmt::Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.object_id)
    }
}

impl FromStr for Pin {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let (ns, id) = s
            .split_once('/')
            .ok_or_else(|| SyncError::UnknownNamespace(s.to_string()))?;
        Ok(Pin::new(ns.parse()?, ObjectId::new(id)?))
    }
}

impl Serialize for Pin {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque remote locators for a node's assets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRefs {
    pub image: Option<String>,
    pub overlay: Option<String>,
}

/// One element of the content tree.
///
/// Equality and hashing only look at the pin, so a stale cached copy and a
/// freshly fetched copy of the same node compare equal.
#[derive(Debug)]
pub struct ContentNode {
    pin: Pin,
    display_name: String,
    parent_id: Option<ObjectId>,
    assets: AssetRefs,
    children_count: usize,
    children: RwLock<Option<Arc<[NodeRef]>>>,
}

impl ContentNode {
    pub fn new(
        namespace: Namespace,
        object_id: ObjectId,
        display_name: impl Into<String>,
        parent_id: Option<ObjectId>,
        assets: AssetRefs,
        children_count: usize,
    ) -> Result<Self> {
        let pin = Pin::new(namespace, object_id);
        if namespace.requires_image() && assets.image.is_none() {
            return Err(SyncError::MissingRequiredField {
                record: pin.to_string(),
                field: "image".to_string(),
            });
        }
        if namespace.parent().is_some() && parent_id.is_none() {
            return Err(SyncError::MissingRequiredField {
                record: pin.to_string(),
                field: namespace
                    .parent()
                    .map(|p| p.reference_field())
                    .unwrap_or("parent")
                    .to_string(),
            });
        }
        Ok(Self {
            pin,
            display_name: display_name.into(),
            parent_id,
            assets,
            children_count,
            children: RwLock::new(None),
        })
    }

    pub fn pin(&self) -> &Pin {
        &self.pin
    }

    pub fn namespace(&self) -> Namespace {
        self.pin.namespace
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.pin.object_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn parent_id(&self) -> Option<&ObjectId> {
        self.parent_id.as_ref()
    }

    pub fn assets(&self) -> &AssetRefs {
        &self.assets
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.assets.image.as_deref()
    }

    pub fn overlay_ref(&self) -> Option<&str> {
        self.assets.overlay.as_deref()
    }

    /// Server-reported number of children.
    pub fn children_count(&self) -> usize {
        self.children_count
    }

    /// Previously fetched children, if any.
    pub fn cached_children(&self) -> Option<Arc<[NodeRef]>> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_children(&self, children: Arc<[NodeRef]>) {
        *self.children.write().unwrap_or_else(|e| e.into_inner()) = Some(children);
    }

    /// Drop the cached children so the next lookup fetches them again.
    pub fn evict_children(&self) {
        *self.children.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl PartialEq for ContentNode {
    fn eq(&self, other: &Self) -> bool {
        self.pin == other.pin
    }
}

impl Eq for ContentNode {}

impl Hash for ContentNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pin.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn zone(id: &str, name: &str) -> ContentNode {
        ContentNode::new(
            Namespace::Zone,
            ObjectId::new(id).unwrap(),
            name,
            Some(ObjectId::new("A1").unwrap()),
            AssetRefs {
                image: Some(format!("gs://bucket/{}.jpg", id)),
                overlay: None,
            },
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_namespace_hierarchy() {
        assert_eq!(Namespace::Area.child(), Some(Namespace::Zone));
        assert_eq!(Namespace::Path.child(), None);
        assert_eq!(Namespace::Sector.parent(), Some(Namespace::Zone));
        assert!(Namespace::Zone.has_asset());
        assert!(!Namespace::Area.has_asset());
        assert!(Namespace::Zone.has_downloadable_children());
        assert!(!Namespace::Sector.has_downloadable_children());
    }

    #[test]
    fn test_namespace_parse() {
        assert_eq!("Sector".parse::<Namespace>().unwrap(), Namespace::Sector);
        assert_eq!("zone".parse::<Namespace>().unwrap(), Namespace::Zone);
        assert_eq!(Namespace::from_table_name("Paths"), Some(Namespace::Path));
        let err = "Crag".parse::<Namespace>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownNamespace);
    }

    #[test]
    fn test_object_id_validation() {
        assert!(ObjectId::new("PL5j43cBRP7F24ecXGOR").is_ok());
        assert!(ObjectId::new("").is_err());
        assert!(ObjectId::new("has-dash").is_err());
        assert!(ObjectId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_pin_format_and_parse() {
        let pin: Pin = "Zone/Z1".parse().unwrap();
        assert_eq!(pin.namespace(), Namespace::Zone);
        assert_eq!(pin.object_id().as_str(), "Z1");
        assert_eq!(pin.to_string(), "Zone/Z1");
        assert!("Z1".parse::<Pin>().is_err());
    }

    #[test]
    fn test_identity_ignores_mutable_fields() {
        let stale = zone("Z1", "Old name");
        let fresh = zone("Z1", "New name");
        assert_eq!(stale, fresh);

        let mut set = HashSet::new();
        set.insert(stale.pin().clone());
        assert!(set.contains(fresh.pin()));
    }

    #[test]
    fn test_missing_image_rejected() {
        let err = ContentNode::new(
            Namespace::Sector,
            ObjectId::new("S1").unwrap(),
            "Sector",
            Some(ObjectId::new("Z1").unwrap()),
            AssetRefs::default(),
            0,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingRequiredField);
    }

    #[test]
    fn test_children_cache_evict() {
        let node = zone("Z1", "Zone");
        assert!(node.cached_children().is_none());
        node.set_children(Arc::from(Vec::<NodeRef>::new()));
        assert!(node.cached_children().is_some());
        node.evict_children();
        assert!(node.cached_children().is_none());
    }
}
