//! Sync orchestration
//!
//! Streams run in declaration order. Before each selected stream starts,
//! `currently_syncing` is set and checkpointed; an interrupted run therefore
//! resumes at the stream it was in, skipping the ones before it. The marker is
//! cleared and checkpointed once the last stream finishes.

use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::context::RunContext;
use crate::http::TransportError;
use crate::output::OutputError;
use crate::schema::SchemaError;
use crate::state::StateError;
use crate::streams::{all_streams, sync_stream, StreamDescriptor};
use crate::transform::TransformError;

/// Sync errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// HTTP layer failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A record did not fit its stream schema
    #[error("transform failed for stream {stream}: {source}")]
    Transform {
        /// Stream id
        stream: String,
        /// Underlying mismatch
        #[source]
        source: TransformError,
    },

    /// State could not be read or checkpointed
    #[error(transparent)]
    State(#[from] StateError),

    /// Record sink failure
    #[error(transparent)]
    Output(#[from] OutputError),

    /// Embedded schemas could not be loaded
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Configuration value unusable at sync time
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configured business unit could not be found
    #[error("Business Unit {0} was not found")]
    BusinessUnitNotFound(String),

    /// Stream has no schema or strategy
    #[error("unknown stream: {0}")]
    UnknownStream(String),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Records emitted by one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Stream id
    pub stream: &'static str,
    /// Records emitted
    pub records: u64,
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Streams synced, in order
    pub streams: Vec<StreamSummary>,
}

impl SyncSummary {
    /// Records emitted by a stream, if it ran
    pub fn records(&self, stream: &str) -> Option<u64> {
        self.streams
            .iter()
            .find(|summary| summary.stream == stream)
            .map(|summary| summary.records)
    }

    /// Records emitted across all streams
    pub fn total_records(&self) -> u64 {
        self.streams.iter().map(|summary| summary.records).sum()
    }

    /// Ids of the streams that ran
    pub fn stream_ids(&self) -> Vec<&'static str> {
        self.streams.iter().map(|summary| summary.stream).collect()
    }
}

/// Index to resume from, given the stored `currently_syncing`
///
/// An id that names no stream restarts from the beginning.
pub fn resume_index(currently_syncing: Option<&str>, streams: &[StreamDescriptor]) -> usize {
    let Some(stream) = currently_syncing else {
        return 0;
    };
    match streams.iter().position(|descriptor| descriptor.id == stream) {
        Some(index) => index,
        None => {
            warn!(currently_syncing = stream, "Unknown stream in state, starting from the beginning");
            0
        }
    }
}

/// Run every selected stream
pub async fn sync(ctx: &mut RunContext<'_>) -> SyncResult<SyncSummary> {
    let selected = ctx.catalog.selected_streams();
    info!(
        currently_syncing = ?ctx.state.currently_syncing(),
        selected_streams = ?selected,
        "Starting sync"
    );

    let mut summary = SyncSummary::default();
    if selected.is_empty() {
        warn!("No streams selected");
        return Ok(summary);
    }

    let streams = all_streams();
    let start = resume_index(ctx.state.currently_syncing(), streams);
    if start > 0 {
        info!(resume_from = streams[start].id, "Resuming interrupted sync");
    }

    ctx.resolve_business_units().await?;

    for descriptor in &streams[start..] {
        if !selected.iter().any(|id| id == descriptor.id) {
            debug!(stream = descriptor.id, "Stream not selected, skipping");
            continue;
        }

        info!(stream = descriptor.id, "START Syncing");
        ctx.state.set_currently_syncing(Some(descriptor.id));
        ctx.checkpoint()?;

        let key_properties = ctx
            .catalog
            .key_properties(descriptor.id)
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| descriptor.key_properties());
        ctx.write_schema(descriptor.id, &key_properties)?;

        let records = sync_stream(ctx, descriptor).await?;
        info!(stream = descriptor.id, records, "FINISHED Syncing");
        summary.streams.push(StreamSummary {
            stream: descriptor.id,
            records,
        });
    }

    ctx.state.set_currently_syncing(None);
    ctx.checkpoint()?;
    info!(total_records = summary.total_records(), "Sync complete");
    Ok(summary)
}
