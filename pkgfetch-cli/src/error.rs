//! CLI error type and exit codes.

use pkgfetch::config::ConfigError;
use pkgfetch::DownloadError;
use thiserror::Error;

/// Errors surfaced to the user by a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("startup failed: {0}")]
    Startup(#[from] std::io::Error),

    #[error("no task matches '{0}'. Use 'pkgfetch list' to see task ids.")]
    NoSuchTask(String),

    #[error("'{prefix}' matches {count} tasks; use more characters of the id")]
    AmbiguousTask { prefix: String, count: usize },

    #[error("{0} task(s) did not complete")]
    TasksFailed(usize),

    #[error("interrupted; continue with 'pkgfetch resume'")]
    Interrupted,
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::ConfigFile(_) => 2,
            Self::NoSuchTask(_) | Self::AmbiguousTask { .. } => 3,
            Self::Interrupted => 130,
            Self::Download(_) | Self::Startup(_) | Self::TasksFailed(_) => 1,
        }
    }
}
