//! Consumer profiles for the ids harvested by `reviews`
//!
//! Profiles are fetched one per request by default, or in chunks through the
//! bulk endpoint when `consumer_fetch_mode` is `bulk`. Either way every
//! profile carries the business unit it was harvested under.
//!
//! The cache only lives for one invocation. A run that resumes at
//! `consumers` skips `reviews`, so nothing was harvested: the stream emits no
//! profiles, warns, and completes. Those profiles are fetched on the next full
//! run.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{emit, inject_business_unit_id, StreamDescriptor, REVIEWS};
use crate::config::ConsumerFetchMode;
use crate::context::RunContext;
use crate::metrics::StreamMetrics;
use crate::sync::SyncResult;

/// Placeholder for the consumer id in the profile path
pub const CONSUMER_ID_PLACEHOLDER: &str = "{consumerId}";

/// Bulk profile endpoint
pub const BULK_PROFILE_PATH: &str = "/consumers/profile/bulk";

/// Maximum ids per bulk request
pub const BULK_CHUNK_SIZE: usize = 1000;

/// Fetch and emit profiles for every cached consumer id
pub async fn sync(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    metrics: &mut StreamMetrics,
) -> SyncResult<()> {
    if !ctx.cache.consumer_ids_populated() {
        if ctx.catalog.is_selected(REVIEWS.id) {
            warn!(
                stream = descriptor.id,
                "Resumed at consumers; reviews did not run, so consumer profiles for this run were not fetched"
            );
        } else {
            warn!(
                stream = descriptor.id,
                "No consumer ids cached in this run; select reviews to sync consumers"
            );
        }
        return Ok(());
    }

    let business_unit_ids = ctx.cache.business_unit_ids().to_vec();
    for business_unit_id in &business_unit_ids {
        let consumer_ids: Vec<String> = ctx
            .cache
            .consumer_ids(business_unit_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        info!(
            stream = descriptor.id,
            business_unit_id = %business_unit_id,
            consumers = consumer_ids.len(),
            mode = ?ctx.config.consumer_fetch_mode,
            "Sync business unit"
        );

        match ctx.config.consumer_fetch_mode {
            ConsumerFetchMode::Individual => {
                fetch_individual(ctx, descriptor, business_unit_id, &consumer_ids, metrics).await?
            }
            ConsumerFetchMode::Bulk => {
                fetch_bulk(ctx, descriptor, business_unit_id, &consumer_ids, metrics).await?
            }
        }
    }
    Ok(())
}

async fn fetch_individual(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    business_unit_id: &str,
    consumer_ids: &[String],
    metrics: &mut StreamMetrics,
) -> SyncResult<()> {
    let total = consumer_ids.len();
    for (index, consumer_id) in consumer_ids.iter().enumerate() {
        debug!(
            stream = descriptor.id,
            consumer_id = %consumer_id,
            "Fetching consumer {} of {}",
            index + 1,
            total
        );
        let path = descriptor.path.replace(CONSUMER_ID_PLACEHOLDER, consumer_id);
        let response = ctx.client.get(&path, &[], descriptor.id).await?;

        let mut records = descriptor.format_response(response);
        for record in &mut records {
            inject_business_unit_id(record, business_unit_id);
        }
        emit(ctx, descriptor, records, metrics)?;
    }
    Ok(())
}

async fn fetch_bulk(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    business_unit_id: &str,
    consumer_ids: &[String],
    metrics: &mut StreamMetrics,
) -> SyncResult<()> {
    for (index, chunk) in consumer_ids.chunks(BULK_CHUNK_SIZE).enumerate() {
        debug!(
            stream = descriptor.id,
            business_unit_id,
            chunk = index + 1,
            size = chunk.len(),
            "Fetching consumer profiles in bulk"
        );
        let response = ctx
            .client
            .post(BULK_PROFILE_PATH, json!({ "consumerIds": chunk }), descriptor.id)
            .await?;

        let (records, missing) = bulk_records(response, chunk, business_unit_id);
        if !missing.is_empty() {
            warn!(
                stream = descriptor.id,
                business_unit_id,
                missing = missing.len(),
                "Bulk response omitted consumer profiles"
            );
            debug!(stream = descriptor.id, missing_ids = ?missing, "Omitted consumer ids");
        }
        emit(ctx, descriptor, records, metrics)?;
    }
    Ok(())
}

/// Profiles keyed by consumer id; accepts `{"consumers": {...}}` or a bare map
fn profiles_by_id(response: Value) -> Map<String, Value> {
    match response {
        Value::Object(mut body) => match body.remove("consumers") {
            Some(Value::Object(consumers)) => consumers,
            Some(other) => {
                body.insert("consumers".to_string(), other);
                body
            }
            None => body,
        },
        _ => Map::new(),
    }
}

/// Records in request order, plus the requested ids the response left out
fn bulk_records<'a>(
    response: Value,
    requested: &'a [String],
    business_unit_id: &str,
) -> (Vec<Value>, Vec<&'a str>) {
    let mut profiles = profiles_by_id(response);
    let mut records = Vec::with_capacity(requested.len());
    let mut missing = Vec::new();

    for consumer_id in requested {
        match profiles.remove(consumer_id) {
            Some(Value::Object(mut profile)) => {
                profile
                    .entry("id")
                    .or_insert_with(|| Value::String(consumer_id.clone()));
                let mut record = Value::Object(profile);
                inject_business_unit_id(&mut record, business_unit_id);
                records.push(record);
            }
            _ => missing.push(consumer_id.as_str()),
        }
    }
    (records, missing)
}
