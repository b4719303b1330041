//! Page-number pagination
//!
//! Pages are requested from 1 upward, oldest first, until a page comes back
//! with fewer than [`PAGE_SIZE`] records. A full final page costs exactly one
//! extra request. When the API refuses a page beyond the caller's access tier
//! the transport answers with an empty array, which ends the loop.

use serde_json::Value;
use tracing::info;

use super::{emit, inject_business_unit_id, StreamDescriptor};
use crate::context::RunContext;
use crate::metrics::StreamMetrics;
use crate::sync::SyncResult;

/// Records requested per page
pub const PAGE_SIZE: usize = 100;

/// Sort order for every paginated request
pub const ORDER_BY: &str = "createdat.asc";

/// Outcome of a pagination run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PaginationSummary {
    /// Requests made
    pub pages: u32,
    /// Records emitted
    pub records: usize,
}

/// Query parameters for one page
pub fn page_params<'a>(page: u32, extra: &[(&'a str, String)]) -> Vec<(&'a str, String)> {
    let mut params = vec![
        ("page", page.to_string()),
        ("perPage", PAGE_SIZE.to_string()),
        ("orderBy", ORDER_BY.to_string()),
    ];
    params.extend(extra.iter().cloned());
    params
}

/// Walk every page of `path`, emitting each batch and handing it to `on_batch`
///
/// `business_unit_id`, when given, is injected into every record before the
/// transform.
pub async fn paginate<F>(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    path: &str,
    business_unit_id: Option<&str>,
    extra_params: &[(&str, String)],
    metrics: &mut StreamMetrics,
    mut on_batch: F,
) -> SyncResult<PaginationSummary>
where
    F: FnMut(&[Value]),
{
    let mut summary = PaginationSummary::default();
    let mut page = 1u32;

    loop {
        info!(
            stream = descriptor.id,
            business_unit_id = business_unit_id.unwrap_or_default(),
            page,
            "Fetching page"
        );

        let params = page_params(page, extra_params);
        let response = ctx.client.get(path, &params, descriptor.id).await?;

        let mut raw_records = descriptor.format_response(response);
        if let Some(business_unit_id) = business_unit_id {
            for record in &mut raw_records {
                inject_business_unit_id(record, business_unit_id);
            }
        }

        let records = emit(ctx, descriptor, raw_records, metrics)?;
        on_batch(&records);

        summary.pages += 1;
        summary.records += records.len();

        if records.len() < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    Ok(summary)
}
