//! Stream catalog
//!
//! The catalog lists every stream with its schema and metadata. A stream is
//! selected when the metadata entry with an empty breadcrumb carries
//! `"selected": true`; older catalogs that set `selected` directly on the
//! schema are honoured as well.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::schema::{self, SchemaError};
use crate::streams::{all_streams, StreamDescriptor};

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Catalog file could not be read
    #[error("IO error reading {path}: {message}")]
    IoError {
        /// Path that failed
        path: String,
        /// Underlying error
        message: String,
    },

    /// Catalog is not valid JSON or has the wrong shape
    #[error("invalid catalog: {0}")]
    ParseError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Embedded schemas could not be loaded
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// One metadata entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Path into the schema; empty for the stream itself
    pub breadcrumb: Vec<String>,
    /// Metadata values
    pub metadata: Map<String, Value>,
}

/// One stream in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stream id
    pub tap_stream_id: String,
    /// Stream name
    pub stream: String,
    /// Primary key fields
    #[serde(default)]
    pub key_properties: Vec<String>,
    /// JSON schema
    pub schema: Value,
    /// Metadata entries
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl CatalogEntry {
    fn stream_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|entry| entry.breadcrumb.is_empty())
            .map(|entry| &entry.metadata)
    }

    /// Whether the stream is selected for sync
    pub fn is_selected(&self) -> bool {
        match self.stream_metadata().and_then(|m| m.get("selected")) {
            Some(selected) => selected.as_bool().unwrap_or(false),
            None => self
                .schema
                .get("selected")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    /// Mark the stream selected or not
    pub fn set_selected(&mut self, selected: bool) {
        if let Some(entry) = self.metadata.iter_mut().find(|e| e.breadcrumb.is_empty()) {
            entry.metadata.insert("selected".to_string(), Value::Bool(selected));
        } else {
            let mut metadata = Map::new();
            metadata.insert("selected".to_string(), Value::Bool(selected));
            self.metadata.push(MetadataEntry {
                breadcrumb: Vec::new(),
                metadata,
            });
        }
    }
}

/// Stream catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Streams in catalog order
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|e| CatalogError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Parse a catalog document
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(json).map_err(|e| CatalogError::ParseError(e.to_string()))
    }

    /// Pretty-printed catalog
    pub fn to_json(&self) -> Result<String, CatalogError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CatalogError::SerializationError(e.to_string()))
    }

    /// Entry for a stream id
    pub fn get_stream(&self, stream: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|entry| entry.tap_stream_id == stream)
    }

    /// Mutable entry for a stream id
    pub fn get_stream_mut(&mut self, stream: &str) -> Option<&mut CatalogEntry> {
        self.streams
            .iter_mut()
            .find(|entry| entry.tap_stream_id == stream)
    }

    /// Ids of selected streams, in catalog order
    pub fn selected_streams(&self) -> Vec<String> {
        self.streams
            .iter()
            .filter(|entry| entry.is_selected())
            .map(|entry| entry.tap_stream_id.clone())
            .collect()
    }

    /// Whether a stream is present and selected
    pub fn is_selected(&self, stream: &str) -> bool {
        self.get_stream(stream).is_some_and(CatalogEntry::is_selected)
    }

    /// Schema for a stream, if present
    pub fn schema(&self, stream: &str) -> Option<&Value> {
        self.get_stream(stream).map(|entry| &entry.schema)
    }

    /// Key properties for a stream, if present
    pub fn key_properties(&self, stream: &str) -> Option<&[String]> {
        self.get_stream(stream)
            .map(|entry| entry.key_properties.as_slice())
    }

    /// Select every stream; used by tests and ad-hoc runs
    pub fn select_all(mut self) -> Self {
        for entry in &mut self.streams {
            entry.set_selected(true);
        }
        self
    }
}

/// Build the catalog from the embedded schemas
pub fn discover() -> Result<Catalog, CatalogError> {
    let mut streams = Vec::with_capacity(all_streams().len());
    for descriptor in all_streams() {
        if let Some(schema) = schema::embedded(descriptor.id)? {
            streams.push(discover_entry(descriptor, schema));
        }
    }
    Ok(Catalog { streams })
}

fn discover_entry(descriptor: &StreamDescriptor, schema: &Value) -> CatalogEntry {
    let key_properties = descriptor.key_properties();
    let replication_keys: Vec<&str> = descriptor.bookmark_field.into_iter().collect();

    let mut stream_metadata = Map::new();
    stream_metadata.insert("table-key-properties".to_string(), json!(key_properties));
    stream_metadata.insert(
        "forced-replication-method".to_string(),
        json!(descriptor.replication_method.as_str()),
    );
    if !replication_keys.is_empty() {
        stream_metadata.insert("valid-replication-keys".to_string(), json!(replication_keys));
    }
    stream_metadata.insert("inclusion".to_string(), json!("available"));

    let mut metadata = vec![MetadataEntry {
        breadcrumb: Vec::new(),
        metadata: stream_metadata,
    }];

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for field in properties.keys() {
            let automatic = key_properties.iter().any(|k| k == field)
                || replication_keys.contains(&field.as_str());
            let mut field_metadata = Map::new();
            field_metadata.insert(
                "inclusion".to_string(),
                json!(if automatic { "automatic" } else { "available" }),
            );
            metadata.push(MetadataEntry {
                breadcrumb: vec!["properties".to_string(), field.clone()],
                metadata: field_metadata,
            });
        }
    }

    CatalogEntry {
        tap_stream_id: descriptor.id.to_string(),
        stream: descriptor.id.to_string(),
        key_properties,
        schema: schema.clone(),
        metadata,
    }
}
