//! Stream definitions and dispatch
//!
//! A stream is a static [`StreamDescriptor`]: where its data lives, how the
//! response is shaped, and a set of [`Capability`] tags. Behaviour lives in
//! the strategy modules; [`sync_stream`] picks the strategy from the tags.
//!
//! Streams are declared in sync order. `reviews` harvests consumer ids into
//! the run cache before `consumers` reads them.

use serde_json::Value;
use tracing::debug;

use crate::context::RunContext;
use crate::metrics::StreamMetrics;
use crate::sync::{SyncError, SyncResult};
use crate::transform::transform_all;

pub mod business_unit;
pub mod consumers;
pub mod incremental;
pub mod paginate;

/// Field injected into business-unit scoped records
pub const BUSINESS_UNIT_ID_FIELD: &str = "business_unit_id";

/// How a stream replicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMethod {
    /// Every run re-reads everything
    FullTable,
    /// Runs resume from a bookmark
    Incremental,
}

impl ReplicationMethod {
    /// Catalog spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationMethod::FullTable => "FULL_TABLE",
            ReplicationMethod::Incremental => "INCREMENTAL",
        }
    }
}

/// Where the records sit in a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A list, either under `key` or as the whole body
    Collection {
        /// Field holding the list, `None` for a bare array
        key: Option<&'static str>,
    },
    /// The whole body is one record
    Singleton,
}

impl ResponseShape {
    /// Extract the records from a raw response
    pub fn records(&self, response: Value) -> Vec<Value> {
        match (self, response) {
            (ResponseShape::Collection { key: Some(key) }, Value::Object(mut body)) => {
                match body.remove(*key) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                }
            }
            (ResponseShape::Collection { key: Some(_) }, _) => Vec::new(),
            (ResponseShape::Collection { key: None }, Value::Array(items)) => items,
            (ResponseShape::Collection { key: None }, Value::Null) => Vec::new(),
            (ResponseShape::Collection { key: None }, other) => vec![other],
            (ResponseShape::Singleton, response) if is_empty_response(&response) => Vec::new(),
            (ResponseShape::Singleton, response) => vec![response],
        }
    }
}

fn is_empty_response(response: &Value) -> bool {
    match response {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Behaviour tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Walks `page`/`perPage` until a short page
    Paginated,
    /// Runs once per resolved business unit
    BusinessUnitScoped,
    /// Harvests consumer ids into the run cache
    PopulatesCache,
    /// Reads consumer ids from the run cache
    ConsumesCache,
    /// Filters by and advances a per-business-unit bookmark
    Incremental,
}

/// Static description of a stream
#[derive(Debug)]
pub struct StreamDescriptor {
    /// Stream id
    pub id: &'static str,
    /// Path template
    pub path: &'static str,
    /// Primary key fields
    pub key_properties: &'static [&'static str],
    /// Replication method
    pub replication_method: ReplicationMethod,
    /// Field tracked for the bookmark
    pub bookmark_field: Option<&'static str>,
    /// Needs a bearer token
    pub requires_authentication: bool,
    /// Response shape
    pub shape: ResponseShape,
    /// Behaviour tags
    pub capabilities: &'static [Capability],
}

impl StreamDescriptor {
    /// Whether the stream has a capability
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Owned key property names
    pub fn key_properties(&self) -> Vec<String> {
        self.key_properties.iter().map(|k| k.to_string()).collect()
    }

    /// Extract the records from a raw response
    pub fn format_response(&self, response: Value) -> Vec<Value> {
        self.shape.records(response)
    }
}

/// Business unit profile
pub const BUSINESS_UNITS: StreamDescriptor = StreamDescriptor {
    id: "business_units",
    path: "/business-units/:business_unit_id/profileinfo",
    key_properties: &["id"],
    replication_method: ReplicationMethod::FullTable,
    bookmark_field: None,
    requires_authentication: false,
    shape: ResponseShape::Singleton,
    capabilities: &[Capability::BusinessUnitScoped],
};

/// Public reviews
pub const REVIEWS: StreamDescriptor = StreamDescriptor {
    id: "reviews",
    path: "/business-units/:business_unit_id/reviews",
    key_properties: &["business_unit_id", "id"],
    replication_method: ReplicationMethod::FullTable,
    bookmark_field: None,
    requires_authentication: false,
    shape: ResponseShape::Collection {
        key: Some("reviews"),
    },
    capabilities: &[
        Capability::Paginated,
        Capability::BusinessUnitScoped,
        Capability::PopulatesCache,
    ],
};

/// Profiles of consumers who reviewed
pub const CONSUMERS: StreamDescriptor = StreamDescriptor {
    id: "consumers",
    path: "/consumers/{consumerId}/profile",
    key_properties: &["id"],
    replication_method: ReplicationMethod::FullTable,
    bookmark_field: None,
    requires_authentication: false,
    shape: ResponseShape::Singleton,
    capabilities: &[Capability::ConsumesCache],
};

/// Private reviews, incremental on `createdAt`
pub const PRIVATE_REVIEWS: StreamDescriptor = StreamDescriptor {
    id: "private_reviews",
    path: "/private/business-units/:business_unit_id/reviews",
    key_properties: &["id"],
    replication_method: ReplicationMethod::Incremental,
    bookmark_field: Some("createdAt"),
    requires_authentication: true,
    shape: ResponseShape::Collection {
        key: Some("reviews"),
    },
    capabilities: &[
        Capability::Paginated,
        Capability::BusinessUnitScoped,
        Capability::Incremental,
    ],
};

static STREAMS: [StreamDescriptor; 4] = [BUSINESS_UNITS, REVIEWS, CONSUMERS, PRIVATE_REVIEWS];

/// Every stream, in sync order
pub fn all_streams() -> &'static [StreamDescriptor] {
    &STREAMS
}

/// Look up a stream by id
pub fn find_stream(id: &str) -> Option<&'static StreamDescriptor> {
    STREAMS.iter().find(|descriptor| descriptor.id == id)
}

/// Set `business_unit_id` on an object record
pub(crate) fn inject_business_unit_id(record: &mut Value, business_unit_id: &str) {
    if let Value::Object(map) = record {
        map.insert(
            BUSINESS_UNIT_ID_FIELD.to_string(),
            Value::String(business_unit_id.to_string()),
        );
    }
}

/// Transform a batch against the stream schema, write it and count it
pub(crate) fn emit(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    raw_records: Vec<Value>,
    metrics: &mut StreamMetrics,
) -> SyncResult<Vec<Value>> {
    let schema = ctx.schema_for(descriptor.id)?;
    let records = transform_all(raw_records, schema).map_err(|source| SyncError::Transform {
        stream: descriptor.id.to_string(),
        source,
    })?;
    ctx.write_records(descriptor.id, &records)?;
    metrics.increment(records.len());
    Ok(records)
}

/// Sync one stream; returns the number of records emitted
pub async fn sync_stream(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
) -> SyncResult<u64> {
    if descriptor.requires_authentication {
        ctx.client.ensure_auth(&ctx.config).await?;
    }

    let mut metrics = StreamMetrics::start(descriptor.id);
    let result = if descriptor.has(Capability::ConsumesCache) {
        consumers::sync(ctx, descriptor, &mut metrics).await
    } else if descriptor.has(Capability::BusinessUnitScoped) {
        business_unit::sync(ctx, descriptor, &mut metrics).await
    } else {
        debug!(stream = descriptor.id, "Stream has no sync strategy");
        Err(SyncError::UnknownStream(descriptor.id.to_string()))
    };

    match result {
        Ok(()) => {
            metrics.finish();
            Ok(metrics.records())
        }
        Err(e) => {
            metrics.record_failure(&e.to_string());
            Err(e)
        }
    }
}
