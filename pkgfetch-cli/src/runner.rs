//! Shared setup for commands that use the download engine.
//!
//! `CliRunner` loads the configuration file, starts logging and owns the
//! Tokio runtime. Commands build their [`DownloadManager`] through it so
//! every command sees the same data directory and catalog.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pkgfetch::catalog::{Catalog, StaticCatalog};
use pkgfetch::config::{ConfigFile, EngineConfig};
use pkgfetch::logging::{init_logging, WorkerGuard, DEFAULT_LOG_FILE};
use pkgfetch::DownloadManager;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CliError;

/// Name of the default catalog file in the data directory.
pub const CATALOG_FILE: &str = "catalog.json";

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub verbose: bool,
    pub data_dir: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
}

/// Catalog file to use: the explicit path, else `<data dir>/catalog.json`.
pub fn catalog_path(explicit: Option<&Path>, data_dir: &Path) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(CATALOG_FILE))
}

/// Load the catalog file. Without `required`, a missing file yields an
/// empty catalog so commands that only touch saved tasks still work.
fn load_catalog(path: &Path, required: bool) -> Result<Arc<dyn Catalog>, CliError> {
    if !path.exists() {
        if required {
            return Err(CliError::Config(format!(
                "No catalog at {}. Pass --catalog <file>.",
                path.display()
            )));
        }
        return Ok(Arc::new(StaticCatalog::new()));
    }
    Ok(Arc::new(StaticCatalog::load(path)?))
}

pub struct CliRunner {
    engine_config: EngineConfig,
    catalog_path: PathBuf,
    runtime: Runtime,
    _log_guard: WorkerGuard,
}

impl CliRunner {
    pub fn new(options: &GlobalOptions) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let engine_config = match &options.data_dir {
            Some(dir) => config.to_engine_config_in(dir),
            None => config.to_engine_config(),
        };
        let log_guard = init_logging(
            &engine_config.data_dir.join("logs"),
            DEFAULT_LOG_FILE,
            options.verbose,
        )?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            catalog_path: catalog_path(options.catalog.as_deref(), &engine_config.data_dir),
            engine_config,
            runtime,
            _log_guard: log_guard,
        })
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = pkgfetch::VERSION,
            command,
            data_dir = %self.engine_config.data_dir.display(),
            "pkgfetch starting"
        );
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Build the engine and load saved tasks. Must run inside
    /// [`block_on`](Self::block_on).
    pub async fn manager(&self, catalog_required: bool) -> Result<DownloadManager, CliError> {
        let catalog = load_catalog(&self.catalog_path, catalog_required)?;
        let manager = DownloadManager::new(self.engine_config.clone(), catalog)?;
        manager.load_saved_tasks().await?;
        Ok(manager)
    }

    /// Token cancelled on Ctrl+C.
    pub fn interrupt(&self) -> Result<CancellationToken, CliError> {
        let token = CancellationToken::new();
        let handler_token = token.clone();
        ctrlc::set_handler(move || handler_token.cancel())
            .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
        Ok(token)
    }
}
