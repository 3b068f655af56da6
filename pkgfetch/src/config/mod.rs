//! Engine configuration.
//!
//! [`EngineConfig`] is the immutable settings object handed to
//! [`crate::engine::DownloadManager`]. It is usually produced from the
//! user's INI file via [`ConfigFile::to_engine_config`], but can be built
//! directly for embedding and tests:
//!
//! ```ignore
//! use pkgfetch::config::EngineConfig;
//!
//! let config = EngineConfig::new("/var/lib/pkgfetch")
//!     .with_max_concurrent_downloads(2)
//!     .with_cdn_base("https://cdn.example.com");
//! ```

mod file;
mod keys;

pub use file::{config_file_path, ConfigError, ConfigFile, DownloadSection, NetworkSection};
pub use keys::ConfigKey;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::{
    PlanOptions, DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_INTERVAL, DEFAULT_SPEED_SAMPLE_INTERVAL,
    DEFAULT_TIMEOUT_SECS,
};
use crate::registry::DEFAULT_GC_INTERVAL;
use crate::retry::{RetryPolicy, DEFAULT_FATAL_HTTP_STATUSES};

/// Default number of tasks transferring at the same time.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Bounds for the concurrent task limit.
pub const MIN_CONCURRENT_DOWNLOADS: usize = 1;
pub const MAX_CONCURRENT_DOWNLOADS: usize = 10;

/// Default language of new tasks.
pub const DEFAULT_LANGUAGE: &str = "en_US";

/// User agent sent with every request unless overridden.
pub const DEFAULT_USER_AGENT: &str = "Creative Cloud";

/// Default CDN base URL for relative package paths.
pub const DEFAULT_CDN_BASE: &str = "https://ccmdls.adobe.com";

/// Name of the tasks directory below the data directory.
pub const TASKS_DIR_NAME: &str = "tasks";

/// Name of the chunk state directory below the data directory.
pub const CHUNK_STATES_DIR_NAME: &str = "chunkStates";

/// Default application data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("pkgfetch"))
        .unwrap_or_else(|| PathBuf::from(".pkgfetch"))
}

/// Default directory new tasks download into.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// Settings of the download engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Application data directory; holds `tasks/` and `chunkStates/`.
    pub data_dir: PathBuf,
    /// Parent directory of new task directories.
    pub download_dir: PathBuf,
    pub language: String,
    pub apple_silicon: bool,
    /// Host OS version used for `[OSVersion]` package conditions.
    pub os_version: Option<f64>,
    /// Always within `1..=10`.
    pub max_concurrent_downloads: usize,
    pub chunk_size: u64,
    /// Objects larger than this are split into chunks.
    pub chunk_threshold: u64,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// HTTP statuses that fail a task instead of being retried.
    pub fatal_http_statuses: Vec<u16>,
    pub progress_interval: Duration,
    pub speed_sample_interval: Duration,
    pub cdn_base: String,
    pub headers: Vec<(String, String)>,
    pub gc_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(default_data_dir())
    }
}

impl EngineConfig {
    /// Default settings storing state under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            download_dir: default_download_dir(),
            language: DEFAULT_LANGUAGE.to_string(),
            apple_silicon: cfg!(target_arch = "aarch64"),
            os_version: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_threshold: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_policy: RetryPolicy::default(),
            fatal_http_statuses: DEFAULT_FATAL_HTTP_STATUSES.to_vec(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            speed_sample_interval: DEFAULT_SPEED_SAMPLE_INTERVAL,
            cdn_base: DEFAULT_CDN_BASE.to_string(),
            headers: vec![("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string())],
            gc_interval: DEFAULT_GC_INTERVAL,
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_apple_silicon(mut self, apple_silicon: bool) -> Self {
        self.apple_silicon = apple_silicon;
        self
    }

    pub fn with_os_version(mut self, version: Option<f64>) -> Self {
        self.os_version = version;
        self
    }

    /// Set the concurrent task limit, clamped to `1..=10`.
    pub fn with_max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.max_concurrent_downloads = limit.clamp(MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS);
        self
    }

    /// Set the chunk size. The split threshold follows it.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_threshold = chunk_size;
        self
    }

    pub fn with_chunk_threshold(mut self, threshold: u64) -> Self {
        self.chunk_threshold = threshold;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_fatal_http_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.fatal_http_statuses = statuses;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_speed_sample_interval(mut self, interval: Duration) -> Self {
        self.speed_sample_interval = interval;
        self
    }

    pub fn with_cdn_base(mut self, cdn: impl Into<String>) -> Self {
        self.cdn_base = cdn.into();
        self
    }

    /// Add or replace a request header (names compare case-insensitively).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join(TASKS_DIR_NAME)
    }

    pub fn chunk_states_dir(&self) -> PathBuf {
        self.data_dir.join(CHUNK_STATES_DIR_NAME)
    }

    /// Directory a new task for `product_id` downloads into.
    pub fn task_dir(&self, product_id: &str, version: &str) -> PathBuf {
        task_dir_in(&self.download_dir, product_id, version)
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            chunk_size: self.chunk_size,
            threshold: self.chunk_threshold,
        }
    }
}

/// `<parent>/<product>_<version>`.
pub fn task_dir_in(parent: &Path, product_id: &str, version: &str) -> PathBuf {
    parent.join(format!("{}_{}", product_id, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new("/data");
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_policy.max_retries(), 3);
        assert_eq!(config.fatal_http_statuses, vec![400, 401, 403, 404, 410]);
        assert_eq!(config.tasks_dir(), PathBuf::from("/data/tasks"));
        assert_eq!(config.chunk_states_dir(), PathBuf::from("/data/chunkStates"));
        assert_eq!(
            config.headers,
            vec![("User-Agent".to_string(), "Creative Cloud".to_string())]
        );
    }

    #[test]
    fn test_concurrency_is_clamped() {
        assert_eq!(EngineConfig::new("/d").with_max_concurrent_downloads(0).max_concurrent_downloads, 1);
        assert_eq!(EngineConfig::new("/d").with_max_concurrent_downloads(50).max_concurrent_downloads, 10);
        assert_eq!(EngineConfig::new("/d").with_max_concurrent_downloads(4).max_concurrent_downloads, 4);
    }

    #[test]
    fn test_header_replaced_case_insensitively() {
        let config = EngineConfig::new("/d").with_header("user-agent", "test/1.0");
        assert_eq!(config.headers, vec![("user-agent".to_string(), "test/1.0".to_string())]);
    }

    #[test]
    fn test_chunk_size_moves_threshold() {
        let config = EngineConfig::new("/d").with_chunk_size(4096);
        assert_eq!(config.plan_options(), PlanOptions { chunk_size: 4096, threshold: 4096 });
        let config = config.with_chunk_threshold(10_000);
        assert_eq!(config.plan_options().threshold, 10_000);
    }

    #[test]
    fn test_task_dir() {
        let config = EngineConfig::new("/d").with_download_dir("/downloads");
        assert_eq!(config.task_dir("PHSP", "25.0"), PathBuf::from("/downloads/PHSP_25.0"));
    }
}
