//! Logging setup.
//!
//! Installs a `tracing` subscriber writing to a log file (non-blocking) and,
//! when verbose, to stderr. The filter honours `RUST_LOG`; otherwise it
//! defaults to `pkgfetch=info`, or `pkgfetch=debug` when verbose.

use std::path::Path;

use time::macros::format_description;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub use tracing_appender::non_blocking::WorkerGuard;

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "pkgfetch.log";

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "pkgfetch=debug,pkgfetch_cli=debug"
    } else {
        "pkgfetch=info,pkgfetch_cli=info"
    }
}

/// Initialize logging to `<dir>/<file>`, mirrored to stderr when `verbose`.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the lifetime of the process. Calling this twice leaves the first
/// subscriber in place.
pub fn init_logging(dir: &Path, file: &str, verbose: bool) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, file);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(timer.clone())
        .with_target(true);
    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(timer)
            .with_target(false)
            .compact()
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_directive() {
        assert!(default_directive(false).contains("pkgfetch=info"));
        assert!(default_directive(true).contains("pkgfetch=debug"));
    }

    #[test]
    fn test_init_creates_log_dir() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        let guard = init_logging(&log_dir, DEFAULT_LOG_FILE, false).unwrap();
        tracing::info!("logging initialized");
        drop(guard);
        assert!(log_dir.is_dir());
    }
}
