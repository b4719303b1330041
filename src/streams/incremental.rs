//! Per-business-unit bookmarks for incremental streams
//!
//! Each business unit keeps its own high-water mark under
//! `buid(<id>)_lastCreatedAt`. A run asks for records strictly after the
//! stored mark (mark + 1 ms), falls back to `start_date`, and otherwise reads
//! everything. After the last page the greatest observed value is written
//! back and checkpointed, unless the stored mark is already at or past it.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::paginate::{paginate, PaginationSummary};
use super::StreamDescriptor;
use crate::context::RunContext;
use crate::metrics::StreamMetrics;
use crate::state::{StateDocument, StateError};
use crate::sync::SyncResult;
use crate::transform::{display_datetime, format_datetime, parse_datetime};

/// Query parameter carrying the lower bound
pub const START_DATE_TIME_PARAM: &str = "startDateTime";

/// State key for a business unit's bookmark
pub fn bookmark_key(business_unit_id: &str) -> String {
    format!("buid({business_unit_id})_lastCreatedAt")
}

/// Stored bookmark for a business unit, parsed
pub fn stored_bookmark(
    state: &StateDocument,
    stream: &str,
    business_unit_id: &str,
) -> Result<Option<DateTime<Utc>>, StateError> {
    let key = bookmark_key(business_unit_id);
    state
        .bookmark(stream, &key)
        .map(|raw| {
            parse_datetime(raw).ok_or_else(|| StateError::InvalidBookmark {
                stream: stream.to_string(),
                key: key.clone(),
                value: raw.to_string(),
            })
        })
        .transpose()
}

/// Lower bound for the next request: bookmark + 1 ms, else `start_date`
pub fn start_date_time(
    ctx: &RunContext<'_>,
    stream: &str,
    business_unit_id: &str,
) -> SyncResult<Option<DateTime<Utc>>> {
    if let Some(bookmark) = stored_bookmark(&ctx.state, stream, business_unit_id)? {
        return Ok(Some(bookmark + Duration::milliseconds(1)));
    }
    Ok(ctx.config.start_date()?)
}

/// Tracks the greatest bookmark value seen across emitted records
#[derive(Debug)]
pub struct BookmarkTracker {
    field: &'static str,
    max: Option<DateTime<Utc>>,
}

impl BookmarkTracker {
    /// Tracker for `field`
    pub fn new(field: &'static str) -> Self {
        Self { field, max: None }
    }

    /// Record one value. Updates max if larger.
    pub fn observe(&mut self, value: DateTime<Utc>) {
        match &self.max {
            Some(current) if value <= *current => {}
            _ => self.max = Some(value),
        }
    }

    /// Record every parseable value of the tracked field in a batch
    ///
    /// Missing, null and unparseable values are skipped.
    pub fn observe_records(&mut self, records: &[Value]) {
        for record in records {
            if let Some(value) = record
                .get(self.field)
                .and_then(Value::as_str)
                .and_then(parse_datetime)
            {
                self.observe(value);
            }
        }
    }

    /// Greatest value observed
    pub fn max(&self) -> Option<DateTime<Utc>> {
        self.max
    }
}

/// Write `max` as the business unit's bookmark if it moves the mark forward
///
/// Returns whether the bookmark was written.
pub fn commit_bookmark(
    ctx: &mut RunContext<'_>,
    stream: &str,
    business_unit_id: &str,
    max: DateTime<Utc>,
) -> SyncResult<bool> {
    if let Some(stored) = stored_bookmark(&ctx.state, stream, business_unit_id)? {
        if max <= stored {
            debug!(
                stream,
                business_unit_id,
                stored = %display_datetime(&stored),
                observed = %display_datetime(&max),
                "Bookmark not advanced"
            );
            return Ok(false);
        }
    }

    ctx.state
        .set_bookmark(stream, &bookmark_key(business_unit_id), format_datetime(&max));
    ctx.checkpoint()?;
    info!(
        stream,
        business_unit_id,
        bookmark = %display_datetime(&max),
        "Bookmark updated"
    );
    Ok(true)
}

/// Incremental sync of one business unit
pub async fn sync_business_unit(
    ctx: &mut RunContext<'_>,
    descriptor: &StreamDescriptor,
    business_unit_id: &str,
    path: &str,
    metrics: &mut StreamMetrics,
) -> SyncResult<()> {
    let mut extra_params = Vec::new();
    if let Some(start) = start_date_time(ctx, descriptor.id, business_unit_id)? {
        debug!(
            stream = descriptor.id,
            business_unit_id,
            start = %display_datetime(&start),
            "Requesting records after bookmark"
        );
        extra_params.push((START_DATE_TIME_PARAM, format_datetime(&start)));
    }

    let Some(field) = descriptor.bookmark_field else {
        let summary =
            paginate(ctx, descriptor, path, Some(business_unit_id), &extra_params, metrics, |_| {})
                .await?;
        log_summary(descriptor, business_unit_id, summary);
        return Ok(());
    };

    let mut tracker = BookmarkTracker::new(field);
    let summary = paginate(
        ctx,
        descriptor,
        path,
        Some(business_unit_id),
        &extra_params,
        metrics,
        |batch| tracker.observe_records(batch),
    )
    .await?;
    log_summary(descriptor, business_unit_id, summary);

    if let Some(max) = tracker.max() {
        commit_bookmark(ctx, descriptor.id, business_unit_id, max)?;
    }
    Ok(())
}

fn log_summary(descriptor: &StreamDescriptor, business_unit_id: &str, summary: PaginationSummary) {
    info!(
        stream = descriptor.id,
        business_unit_id,
        pages = summary.pages,
        records = summary.records,
        "Business unit synced"
    );
}
