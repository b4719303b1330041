//! Command line interface
//!
//! ```text
//! tap-trustpilot --config config.json --discover > catalog.json
//! tap-trustpilot --config config.json --catalog catalog.json [--state state.json]
//! ```

pub mod error;

pub use error::CliError;

use clap::Parser;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::catalog::{self, Catalog};
use crate::config::TapConfig;
use crate::context::RunContext;
use crate::http::{ApiClient, ReqwestSender, RequestSender};
use crate::output::{SingerWriter, StateStores};
use crate::state::{FileStateStore, StateDocument};
use crate::sync::{sync, SyncSummary};

/// Review platform tap
#[derive(Parser, Debug)]
#[command(name = "tap-trustpilot")]
#[command(about = "Extract business units, reviews and consumers as a Singer stream", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file
    #[arg(long)]
    pub config: PathBuf,

    /// State file from a previous run
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Catalog file with the selected streams
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Print the catalog and exit
    #[arg(long, default_value_t = false)]
    pub discover: bool,

    /// Also checkpoint state to this file (atomic replace)
    ///
    /// Read at startup when `--state` is not given, so a crashed run resumes
    /// where it stopped.
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Run discovery or sync
    pub async fn execute(&self) -> Result<(), CliError> {
        let config = TapConfig::load(&self.config)?;

        if self.discover {
            return write_catalog(&catalog::discover()?, std::io::stdout().lock());
        }

        let catalog_path = self.catalog.as_deref().ok_or_else(|| {
            CliError::InvalidArgument("--catalog is required unless --discover is set".to_string())
        })?;
        let catalog = Catalog::load(catalog_path)?;
        let state = self.load_state()?;
        let sender: Arc<dyn RequestSender> = Arc::new(ReqwestSender::new()?);

        let summary = self.run_sync(config, catalog, state, sender).await?;
        info!(
            streams = ?summary.stream_ids(),
            records = summary.total_records(),
            "Run finished"
        );
        Ok(())
    }

    /// Sync with records and state on stdout, plus the optional state file
    pub async fn run_sync(
        &self,
        config: TapConfig,
        catalog: Catalog,
        state: StateDocument,
        sender: Arc<dyn RequestSender>,
    ) -> Result<SyncSummary, CliError> {
        let client = ApiClient::new(&config, sender);
        let mut sink = SingerWriter::stdout();
        let mut stores = StateStores::new().with(SingerWriter::stdout());
        if let Some(path) = &self.state_file {
            stores = stores.with(FileStateStore::new(path));
        }

        let mut ctx = RunContext::new(config, state, client, catalog, &mut sink, &mut stores);
        Ok(sync(&mut ctx).await?)
    }

    /// Incoming state: `--state`, else `--state-file`, else empty
    pub fn load_state(&self) -> Result<StateDocument, CliError> {
        if let Some(path) = &self.state {
            return read_state(path);
        }
        match &self.state_file {
            Some(path) => Ok(FileStateStore::new(path).load()?),
            None => Ok(StateDocument::new()),
        }
    }
}

fn read_state(path: &Path) -> Result<StateDocument, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliError::InvalidArgument(format!("Failed to read state {}: {e}", path.display()))
    })?;
    Ok(StateDocument::from_json(&contents)?)
}

fn write_catalog<W: Write>(catalog: &Catalog, mut out: W) -> Result<(), CliError> {
    let json = catalog.to_json()?;
    writeln!(out, "{json}").map_err(|e| CliError::OutputError(e.to_string()))?;
    out.flush().map_err(|e| CliError::OutputError(e.to_string()))
}
