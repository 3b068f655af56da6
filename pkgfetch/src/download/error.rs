//! Error types for the download engine.
//!
//! Every failure produced while planning, fetching, verifying or persisting a
//! transfer is a [`DownloadError`]. Each variant belongs to one failure family
//! and carries a stable numeric code (see [`DownloadError::code`]) so persisted
//! task files and logs stay comparable across releases.
//!
//! Deciding whether a failure is worth retrying is not done here; see
//! [`crate::retry::classify`].

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Base codes of each failure family.
pub mod codes {
    /// Connection loss, timeouts, unreachable servers.
    pub const CONNECTIVITY: i32 = 1000;
    /// Malformed URLs or requests.
    pub const REQUEST: i32 = 2000;
    /// Invalid or corrupted response data.
    pub const DATA: i32 = 3000;
    /// HTTP status failures; the status code is added to the base.
    pub const HTTP: i32 = 4000;
    /// Download lifecycle (cancellation).
    pub const DOWNLOAD: i32 = 5000;
    /// Local storage failures.
    pub const FILESYSTEM: i32 = 6000;
    /// Engine and collaborator failures.
    pub const APPLICATION: i32 = 7000;
}

/// ENOSPC / ERROR_DISK_FULL.
#[cfg(windows)]
const STORAGE_FULL_OS_ERROR: i32 = 112;
#[cfg(not(windows))]
const STORAGE_FULL_OS_ERROR: i32 = 28;

/// Errors that can occur in the download engine.
#[derive(Debug, Error)]
pub enum DownloadError {
    // -- connectivity --
    /// Lower-level transport failure, passed through unchanged.
    #[error("network error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// No data arrived within the request timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// The response body ended before the requested range was complete.
    #[error("transfer from {url} ended early: received {received} of {expected} bytes")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },

    // -- request --
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // -- data --
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Content hash of a chunk did not match the integrity manifest.
    #[error("hash mismatch for {what}: expected {expected}, got {actual}")]
    HashMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {path}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Whole-file verification of a finished package failed.
    #[error("integrity check failed for {path}: {reason}")]
    IntegrityFailed { path: PathBuf, reason: String },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    // -- http --
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    // -- lifecycle --
    /// The transfer was stopped through its cancellation handle.
    #[error("download cancelled")]
    Cancelled,

    // -- filesystem --
    #[error("insufficient storage space at {path}")]
    InsufficientStorage { path: PathBuf },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("file already exists: {path}")]
    FileExists { path: PathBuf },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // -- application --
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("cannot {action} a task that is {status}")]
    InvalidTransition { action: String, status: String },
}

/// Result type for download engine operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

impl DownloadError {
    /// Map an I/O error on `path` into the matching storage variant.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.raw_os_error() == Some(STORAGE_FULL_OS_ERROR) {
            return Self::InsufficientStorage { path };
        }
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::NotFound => Self::FileNotFound { path },
            io::ErrorKind::AlreadyExists => Self::FileExists { path },
            _ => Self::Io { path, source },
        }
    }

    /// Wrap a transport error for `url`.
    ///
    /// Builder errors are request errors, everything else is passed through
    /// as [`DownloadError::Transport`] for classification.
    pub fn transport(url: &str, source: reqwest::Error) -> Self {
        if source.is_builder() {
            return Self::InvalidRequest(format!("{}: {}", url, source));
        }
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// Build a timeout error for `url`.
    pub fn timeout(url: &str, timeout: Duration) -> Self {
        Self::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Build a parse error.
    pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable numeric code: family base plus a per-variant offset.
    pub fn code(&self) -> i32 {
        use codes::*;
        match self {
            Self::Transport { source, .. } => {
                if source.is_timeout() {
                    CONNECTIVITY + 2
                } else if source.is_connect() {
                    CONNECTIVITY + 3
                } else {
                    CONNECTIVITY + 1
                }
            }
            Self::Timeout { .. } => CONNECTIVITY + 2,
            Self::Truncated { .. } => CONNECTIVITY + 4,
            Self::InvalidUrl(_) => REQUEST + 1,
            Self::InvalidRequest(_) => REQUEST + 2,
            Self::InvalidData(_) => DATA + 1,
            Self::HashMismatch { .. } => DATA + 2,
            Self::SizeMismatch { .. } => DATA + 3,
            Self::IntegrityFailed { .. } => DATA + 4,
            Self::Parse { .. } => DATA + 5,
            Self::Http { status, .. } => HTTP + i32::from(*status),
            Self::Cancelled => DOWNLOAD + 1,
            Self::InsufficientStorage { .. } => FILESYSTEM + 1,
            Self::PermissionDenied { .. } => FILESYSTEM + 2,
            Self::FileExists { .. } => FILESYSTEM + 3,
            Self::FileNotFound { .. } => FILESYSTEM + 4,
            Self::Io { .. } => FILESYSTEM + 5,
            Self::Catalog(_) => APPLICATION + 1,
            Self::Config(_) => APPLICATION + 2,
            Self::TaskNotFound(_) => APPLICATION + 3,
            Self::InvalidTransition { .. } => APPLICATION + 4,
        }
    }

    /// Returns true if this error came from the cancellation handle.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse("JSON", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mapping_by_kind() {
        let err = DownloadError::io(
            "/tmp/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, DownloadError::PermissionDenied { .. }));

        let err = DownloadError::io("/tmp/x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, DownloadError::FileNotFound { .. }));

        let err = DownloadError::io("/tmp/x", io::Error::other("boom"));
        assert!(matches!(err, DownloadError::Io { .. }));
    }

    #[test]
    fn test_io_mapping_storage_full() {
        let err = DownloadError::io("/tmp/x", io::Error::from_raw_os_error(STORAGE_FULL_OS_ERROR));
        assert!(matches!(err, DownloadError::InsufficientStorage { .. }));
        assert_eq!(err.code(), codes::FILESYSTEM + 1);
    }

    #[test]
    fn test_http_code_includes_status() {
        let err = DownloadError::Http {
            status: 503,
            url: "http://example.com/a".to_string(),
        };
        assert_eq!(err.code(), 4503);
        assert_eq!(err.to_string(), "HTTP 503 for http://example.com/a");
    }

    #[test]
    fn test_codes_grouped_by_family() {
        assert_eq!(DownloadError::Cancelled.code(), 5001);
        assert_eq!(DownloadError::InvalidUrl("x".into()).code(), 2001);
        assert_eq!(
            DownloadError::timeout("http://h/x", Duration::from_secs(300)).code(),
            1002
        );
        assert_eq!(DownloadError::TaskNotFound("t".into()).code(), 7003);
    }

    #[test]
    fn test_json_error_becomes_parse() {
        let err: DownloadError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, DownloadError::Parse { .. }));
    }
}
