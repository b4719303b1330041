//! CLI error types and conversions

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::http::TransportError;
use crate::state::StateError;
use crate::sync::SyncError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Config error
    #[error("config error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Catalog error
    #[error("catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    /// State error
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    /// HTTP client could not be built
    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Sync error
    #[error("sync error: {0}")]
    SyncError(#[from] SyncError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output could not be written
    #[error("output error: {0}")]
    OutputError(String),
}
