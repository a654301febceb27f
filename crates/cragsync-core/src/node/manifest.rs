//! Server manifest: the authoritative description of the content tree.
//!
//! The wire shape is one JSON object per namespace table (`"Areas"`,
//! `"Zones"`, `"Sectors"`, `"Paths"`), each mapping object id to a record.
//! Record order inside a table is the server's display order and is kept.

use super::{AssetRefs, ContentNode, Namespace, NodeRef, ObjectId, Pin};
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A single manifest record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kmz: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

impl ManifestRecord {
    /// Parent id for a record living in `namespace`.
    pub fn parent_id(&self, namespace: Namespace) -> Option<&str> {
        match namespace.parent()? {
            Namespace::Area => self.area.as_deref(),
            Namespace::Zone => self.zone.as_deref(),
            Namespace::Sector => self.sector.as_deref(),
            Namespace::Path => None,
        }
    }

    /// Build a node from this record, validating required fields.
    pub fn to_node(
        &self,
        namespace: Namespace,
        object_id: &str,
        children_count: usize,
    ) -> Result<ContentNode> {
        let object_id = ObjectId::new(object_id)?;
        let display_name = self.display_name.clone().ok_or_else(|| {
            SyncError::MissingRequiredField {
                record: format!("{}/{}", namespace, object_id),
                field: "displayName".to_string(),
            }
        })?;
        let parent_id = self.parent_id(namespace).map(ObjectId::new).transpose()?;
        ContentNode::new(
            namespace,
            object_id,
            display_name,
            parent_id,
            AssetRefs {
                image: self.image.clone(),
                overlay: self.kmz.clone(),
            },
            children_count,
        )
    }
}

/// The full tree description as served by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    tables: Map<String, Value>,
}

impl Manifest {
    /// Parse a manifest fetched from the server.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            SyncError::ManifestFetchFailed {
                message: format!("invalid manifest JSON: {}", e),
            }
        })?;
        match value {
            Value::Object(tables) => Ok(Self { tables }),
            other => Err(SyncError::ManifestFetchFailed {
                message: format!("manifest root must be an object, got {}", json_type(&other)),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Insert or replace a record, appending new ids at the end of the table.
    pub fn insert(&mut self, namespace: Namespace, object_id: &str, record: ManifestRecord) -> Result<()> {
        let table = self
            .tables
            .entry(namespace.table_name())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(table) = table else {
            return Err(SyncError::ManifestFetchFailed {
                message: format!("table {} is not an object", namespace.table_name()),
            });
        };
        table.insert(object_id.to_string(), serde_json::to_value(record)?);
        Ok(())
    }

    /// Records of one namespace in display order.
    pub fn records(&self, namespace: Namespace) -> Result<Vec<(String, ManifestRecord)>> {
        let Some(table) = self.tables.get(namespace.table_name()) else {
            return Ok(Vec::new());
        };
        let Value::Object(table) = table else {
            return Err(SyncError::ManifestFetchFailed {
                message: format!("table {} is not an object", namespace.table_name()),
            });
        };
        table
            .iter()
            .map(|(id, raw)| -> Result<(String, ManifestRecord)> {
                let record = serde_json::from_value::<ManifestRecord>(raw.clone()).map_err(|e| {
                    SyncError::MissingRequiredField {
                        record: format!("{}/{}", namespace, id),
                        field: e.to_string(),
                    }
                })?;
                Ok((id.clone(), record))
            })
            .collect()
    }

    /// Look up a single record.
    pub fn record(&self, pin: &Pin) -> Option<ManifestRecord> {
        let table = self.tables.get(pin.namespace().table_name())?.as_object()?;
        let raw = table.get(pin.object_id().as_str())?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Table names the engine does not understand.
    pub fn unknown_tables(&self) -> Vec<&str> {
        self.tables
            .keys()
            .filter(|k| Namespace::from_table_name(k).is_none())
            .map(String::as_str)
            .collect()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Node lookup tables derived from a manifest.
#[derive(Debug, Default)]
pub(crate) struct TreeIndex {
    pub nodes: HashMap<Pin, NodeRef>,
    pub children: HashMap<Pin, Vec<Pin>>,
    pub roots: Vec<NodeRef>,
}

impl TreeIndex {
    /// Decode every table, leaves first so each parent knows its child count.
    pub fn build(manifest: &Manifest) -> Result<Self> {
        for table in manifest.unknown_tables() {
            warn!("Ignoring unknown manifest table '{}'", table);
        }

        let mut index = TreeIndex::default();
        let mut counts: HashMap<(Namespace, String), usize> = HashMap::new();

        for namespace in Namespace::ALL.into_iter().rev() {
            let records = manifest.records(namespace)?;
            for (id, record) in &records {
                if let (Some(parent_ns), Some(parent_id)) =
                    (namespace.parent(), record.parent_id(namespace))
                {
                    *counts.entry((parent_ns, parent_id.to_string())).or_default() += 1;
                }
                let children_count = counts.get(&(namespace, id.clone())).copied().unwrap_or(0);
                let node = Arc::new(record.to_node(namespace, id, children_count)?);
                index.nodes.insert(node.pin().clone(), node);
            }
        }

        // Link in display order, roots first.
        for namespace in Namespace::ALL {
            for (id, record) in manifest.records(namespace)? {
                let pin = Pin::new(namespace, ObjectId::new(&id)?);
                let Some(node) = index.nodes.get(&pin).cloned() else {
                    continue;
                };
                match (namespace.parent(), record.parent_id(namespace)) {
                    (None, _) => index.roots.push(node),
                    (Some(parent_ns), Some(parent_id)) => {
                        let parent = Pin::new(parent_ns, ObjectId::new(parent_id)?);
                        if !index.nodes.contains_key(&parent) {
                            debug!("{} references missing parent {}", pin, parent);
                        }
                        index.children.entry(parent).or_default().push(pin);
                    }
                    (Some(_), None) => {}
                }
            }
        }

        debug!(
            "Indexed {} nodes ({} roots) from manifest",
            index.nodes.len(),
            index.roots.len()
        );
        Ok(index)
    }

    pub fn children_of(&self, pin: &Pin) -> Option<Vec<NodeRef>> {
        if !self.nodes.contains_key(pin) {
            return None;
        }
        let pins = self.children.get(pin).map(Vec::as_slice).unwrap_or(&[]);
        Some(
            pins.iter()
                .filter_map(|p| self.nodes.get(p).cloned())
                .collect(),
        )
    }
}
