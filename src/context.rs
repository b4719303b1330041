//! Per-run context shared by every stream
//!
//! One [`RunContext`] is built per invocation and handed by `&mut` to each
//! stream in turn. The [`SyncCache`] lives only as long as the context and is
//! never persisted.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::TapConfig;
use crate::http::ApiClient;
use crate::output::RecordSink;
use crate::schema;
use crate::state::{StateDocument, StateStore};
use crate::streams::business_unit;
use crate::sync::{SyncError, SyncResult};

/// In-memory cross-stream cache
#[derive(Debug, Default)]
pub struct SyncCache {
    business_unit_ids: Option<Vec<String>>,
    consumer_ids: Option<HashMap<String, BTreeSet<String>>>,
}

impl SyncCache {
    /// Resolved business unit ids, in configured order
    pub fn business_unit_ids(&self) -> &[String] {
        self.business_unit_ids.as_deref().unwrap_or_default()
    }

    /// Whether business units were resolved in this run
    pub fn business_units_resolved(&self) -> bool {
        self.business_unit_ids.is_some()
    }

    /// Store the resolved business unit ids
    pub fn set_business_unit_ids(&mut self, ids: Vec<String>) {
        self.business_unit_ids = Some(ids);
    }

    /// Drop any consumer ids harvested earlier in this run
    pub fn reset_consumer_ids(&mut self) {
        self.consumer_ids = Some(HashMap::new());
    }

    /// Whether a harvesting stream ran in this invocation
    pub fn consumer_ids_populated(&self) -> bool {
        self.consumer_ids.is_some()
    }

    /// Add harvested ids for a business unit, creating its entry if needed
    pub fn add_consumer_ids<I>(&mut self, business_unit_id: &str, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.consumer_ids
            .get_or_insert_with(HashMap::new)
            .entry(business_unit_id.to_string())
            .or_default()
            .extend(ids);
    }

    /// Deduplicated consumer ids harvested for a business unit
    pub fn consumer_ids(&self, business_unit_id: &str) -> Option<&BTreeSet<String>> {
        self.consumer_ids
            .as_ref()
            .and_then(|ids| ids.get(business_unit_id))
    }
}

/// Everything a stream needs during one run
pub struct RunContext<'a> {
    /// Immutable configuration
    pub config: TapConfig,
    /// Mutable state document
    pub state: StateDocument,
    /// API client; holds the bearer token once obtained
    pub client: ApiClient,
    /// Stream selection and schemas
    pub catalog: Catalog,
    /// Cross-stream cache
    pub cache: SyncCache,
    sink: &'a mut dyn RecordSink,
    state_store: &'a mut dyn StateStore,
}

impl<'a> RunContext<'a> {
    /// Assemble a context
    pub fn new(
        config: TapConfig,
        state: StateDocument,
        client: ApiClient,
        catalog: Catalog,
        sink: &'a mut dyn RecordSink,
        state_store: &'a mut dyn StateStore,
    ) -> Self {
        Self {
            config,
            state,
            client,
            catalog,
            cache: SyncCache::default(),
            sink,
            state_store,
        }
    }

    /// Schema for a stream: the catalog's copy, else the embedded one
    pub fn schema_for(&self, stream: &str) -> SyncResult<&Value> {
        if let Some(schema) = self.catalog.schema(stream) {
            return Ok(schema);
        }
        schema::embedded(stream)?.ok_or_else(|| SyncError::UnknownStream(stream.to_string()))
    }

    /// Declare a stream's schema on the sink
    pub fn write_schema(&mut self, stream: &str, key_properties: &[String]) -> SyncResult<()> {
        let schema = self.schema_for(stream)?.clone();
        self.sink.write_schema(stream, &schema, key_properties)?;
        Ok(())
    }

    /// Emit a transformed batch
    pub fn write_records(&mut self, stream: &str, records: &[Value]) -> SyncResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.sink.write_records(stream, records)?;
        Ok(())
    }

    /// Durably persist the current state
    pub fn checkpoint(&mut self) -> SyncResult<()> {
        self.state_store.persist(&self.state)?;
        Ok(())
    }

    /// Normalize `business_unit_id` / `business_units` into resolved ids
    ///
    /// Runs at most once per context; later calls are no-ops.
    pub async fn resolve_business_units(&mut self) -> SyncResult<&[String]> {
        if !self.cache.business_units_resolved() {
            let ids = business_unit::resolve_business_unit_ids(self).await?;
            info!(business_unit_ids = ?ids, "Resolved business units");
            self.cache.set_business_unit_ids(ids);
        }
        Ok(self.cache.business_unit_ids())
    }
}
