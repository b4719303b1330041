//! # tap-trustpilot
//!
//! Extracts business units, reviews, consumer profiles and private reviews
//! from the Trustpilot REST API and emits them as Singer messages on stdout,
//! with enough state to resume an interrupted run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tap_trustpilot::catalog::discover;
//! use tap_trustpilot::context::RunContext;
//! use tap_trustpilot::http::{ApiClient, ReqwestSender};
//! use tap_trustpilot::output::SingerWriter;
//! use tap_trustpilot::state::StateDocument;
//! use tap_trustpilot::{sync, TapConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TapConfig::new("api-key", "bu-id");
//! let client = ApiClient::new(&config, Arc::new(ReqwestSender::new()?));
//! let catalog = discover()?.select_all();
//!
//! let mut sink = SingerWriter::stdout();
//! let mut state_out = SingerWriter::stdout();
//! let mut ctx = RunContext::new(
//!     config,
//!     StateDocument::new(),
//!     client,
//!     catalog,
//!     &mut sink,
//!     &mut state_out,
//! );
//! let summary = sync(&mut ctx).await?;
//! println!("{} records", summary.total_records());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`http`] - API client: auth, retry/backoff, pagination-limit handling
//! - [`transform`] - Schema-driven record normalization
//! - [`context`] - Per-run context and cross-stream cache
//! - [`streams`] - Stream descriptors and sync strategies
//! - [`sync`] - Stream ordering, resume and checkpoints
//! - [`catalog`], [`schema`] - Discovery and stream selection
//! - [`state`], [`output`] - Checkpoint stores and the Singer writer

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Stream catalog and discovery
pub mod catalog;

/// CLI command implementations
pub mod cli;

/// Tap configuration
pub mod config;

/// Per-run context
pub mod context;

/// API client
pub mod http;

/// Run metrics
pub mod metrics;

/// Singer message output
pub mod output;

/// Embedded stream schemas
pub mod schema;

/// Sync state and checkpoint stores
pub mod state;

/// Stream definitions and sync strategies
pub mod streams;

/// Sync orchestration
pub mod sync;

/// Record normalization
pub mod transform;

pub use config::TapConfig;
pub use sync::{sync, SyncError, SyncSummary};
