//! Business-unit scoping
//!
//! Scoped streams run once per resolved business unit, in configured order.
//! Units are configured either by id (`business_unit_id`) or by name
//! (`business_units`); names are resolved through `/business-units/find`.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::info;

use super::paginate::paginate;
use super::{emit, incremental, Capability, StreamDescriptor, BUSINESS_UNITS};
use crate::context::RunContext;
use crate::http::render_path;
use crate::metrics::StreamMetrics;
use crate::sync::{SyncError, SyncResult};
use crate::transform::transform_all;

/// Name lookup endpoint
pub const FIND_PATH: &str = "/business-units/find";

/// Resolve the configured business units to ids, in configured order
///
/// A non-empty `business_units` list wins over `business_unit_id`. A name
/// that resolves to nothing, or to a record without an id, is fatal.
pub async fn resolve_business_unit_ids(ctx: &RunContext<'_>) -> SyncResult<Vec<String>> {
    let Some(names) = ctx.config.business_unit_names() else {
        return Ok(ctx.config.business_unit_id.iter().cloned().collect());
    };

    let schema = ctx.schema_for(BUSINESS_UNITS.id)?;
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        info!(business_unit = %name, "Resolving business unit");
        let response = ctx
            .client
            .get(FIND_PATH, &[("name", name.clone())], BUSINESS_UNITS.id)
            .await?;

        let records = transform_all(BUSINESS_UNITS.format_response(response), schema).map_err(
            |source| SyncError::Transform {
                stream: BUSINESS_UNITS.id.to_string(),
                source,
            },
        )?;

        let id = records
            .first()
            .and_then(|record| record.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::BusinessUnitNotFound(name.clone()))?;
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Consumer ids referenced by a batch of reviews; absent ids are skipped
pub fn consumer_ids(records: &[Value]) -> impl Iterator<Item = String> + '_ {
    records.iter().filter_map(|record| {
        record
            .get("consumer")
            .and_then(|consumer| consumer.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// Run a scoped stream for every resolved business unit
pub async fn sync(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    metrics: &mut StreamMetrics,
) -> SyncResult<()> {
    if descriptor.has(Capability::PopulatesCache) {
        ctx.cache.reset_consumer_ids();
    }

    let business_unit_ids = ctx.resolve_business_units().await?.to_vec();
    for business_unit_id in &business_unit_ids {
        info!(stream = descriptor.id, business_unit_id = %business_unit_id, "Sync business unit");
        sync_business_unit(ctx, descriptor, business_unit_id, metrics).await?;
    }
    Ok(())
}

async fn sync_business_unit(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    business_unit_id: &str,
    metrics: &mut StreamMetrics,
) -> SyncResult<()> {
    let path = render_path(descriptor.path, business_unit_id);

    if descriptor.has(Capability::Incremental) {
        return incremental::sync_business_unit(ctx, descriptor, business_unit_id, &path, metrics)
            .await;
    }

    if descriptor.has(Capability::Paginated) {
        let mut harvested = BTreeSet::new();
        let populates_cache = descriptor.has(Capability::PopulatesCache);
        let summary = paginate(
            ctx,
            descriptor,
            &path,
            Some(business_unit_id),
            &[],
            metrics,
            |batch| {
                if populates_cache {
                    harvested.extend(consumer_ids(batch));
                }
            },
        )
        .await?;
        info!(
            stream = descriptor.id,
            business_unit_id,
            pages = summary.pages,
            records = summary.records,
            "Business unit synced"
        );

        if populates_cache {
            info!(
                stream = descriptor.id,
                business_unit_id,
                consumers = harvested.len(),
                "Cached consumer ids"
            );
            ctx.cache.add_consumer_ids(business_unit_id, harvested);
        }
        return Ok(());
    }

    let response = ctx.client.get(&path, &[], descriptor.id).await?;
    let records = descriptor.format_response(response);
    if records.is_empty() {
        return Err(SyncError::BusinessUnitNotFound(business_unit_id.to_string()));
    }
    emit(ctx, descriptor, records, metrics)?;
    Ok(())
}
