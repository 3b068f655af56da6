//! Failure classification and retry policy.
//!
//! Every retry decision in the engine goes through this module. Transfers
//! never retry on their own: a failed package bubbles its [`DownloadError`]
//! up to the task runner, which calls [`classify`] and consults the task's
//! [`RetryPolicy`].
//!
//! # Classification
//!
//! | Family        | Recoverable | Notes                                         |
//! |---------------|-------------|-----------------------------------------------|
//! | connectivity  | yes         | transport errors, timeouts, truncated bodies  |
//! | HTTP status   | yes         | except the configured fatal statuses          |
//! | chunk data    | yes         | hash/size mismatch re-plans the package       |
//! | integrity     | no          | whole-file verification failed                |
//! | request/parse | no          |                                               |
//! | storage       | no          | disk full, permissions, missing files         |
//! | lifecycle     | no          | cancelled by the user                         |

use std::time::Duration;

use crate::download::DownloadError;

/// Default number of automatic retries per task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retries.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 3;

/// Default cap on any single retry delay.
pub const DEFAULT_MAX_RETRY_DELAY_SECS: u64 = 60;

/// HTTP statuses that fail a task without retrying: the object is gone or
/// the request will never be accepted.
pub const DEFAULT_FATAL_HTTP_STATUSES: &[u16] = &[400, 401, 403, 404, 410];

/// Outcome of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Message shown to the user.
    pub message: String,
    pub recoverable: bool,
    /// Chunk progress of the package must be discarded before retrying.
    pub replan: bool,
    pub code: i32,
}

/// Classify a failure as recoverable or terminal, treating
/// [`DEFAULT_FATAL_HTTP_STATUSES`] as terminal.
pub fn classify(error: &DownloadError) -> Failure {
    classify_with(error, DEFAULT_FATAL_HTTP_STATUSES)
}

/// Classify a failure. HTTP errors are recoverable unless their status is
/// in `fatal_http`.
pub fn classify_with(error: &DownloadError, fatal_http: &[u16]) -> Failure {
    use DownloadError::*;
    let (recoverable, replan) = match error {
        Transport { .. } | Timeout { .. } | Truncated { .. } => (true, false),
        Http { status, .. } => (!fatal_http.contains(status), false),
        HashMismatch { .. } | SizeMismatch { .. } => (true, true),
        IntegrityFailed { .. } => (false, false),
        InvalidUrl(_) | InvalidRequest(_) | InvalidData(_) | Parse { .. } => (false, false),
        InsufficientStorage { .. }
        | PermissionDenied { .. }
        | FileExists { .. }
        | FileNotFound { .. }
        | Io { .. } => (false, false),
        Cancelled => (false, false),
        Catalog(_) | Config(_) | TaskNotFound(_) | InvalidTransition { .. } => (false, false),
    };
    Failure {
        message: user_message(error),
        recoverable,
        replan,
        code: error.code(),
    }
}

fn user_message(error: &DownloadError) -> String {
    use DownloadError::*;
    match error {
        Transport { source, .. } if source.is_connect() => {
            "could not connect to the server".to_string()
        }
        Transport { .. } => "network connection lost".to_string(),
        Timeout { .. } => "the server did not respond in time".to_string(),
        InsufficientStorage { path } => format!("not enough disk space at {}", path.display()),
        Cancelled => "download cancelled".to_string(),
        other => other.to_string(),
    }
}

/// How a task is retried after a recoverable failure.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No automatic retries.
    None,

    /// Constant delay between retries.
    Fixed { max_retries: u32, delay: Duration },

    /// Delay grows linearly: `base_delay × attempt`.
    Linear { max_retries: u32, base_delay: Duration },

    /// Delay grows geometrically, capped at `max_delay`.
    ExponentialBackoff {
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(DEFAULT_MAX_RETRIES, Duration::from_secs(DEFAULT_RETRY_DELAY_SECS))
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self::Linear {
            max_retries,
            base_delay,
        }
    }

    /// Exponential backoff doubling from `initial_delay`.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(DEFAULT_MAX_RETRY_DELAY_SECS),
            multiplier: 2.0,
        }
    }

    /// Maximum number of automatic retries.
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. }
            | Self::Linear { max_retries, .. }
            | Self::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// retries are exhausted.
    pub fn delay_for_retry(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::Linear { base_delay, .. } => Some(base_delay.saturating_mul(attempt)),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.powi((attempt - 1) as i32);
                let delay_ms = (initial_delay.as_millis() as f64 * factor).min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(delay_ms as u64).min(*max_delay))
            }
        }
    }
}
