//! Task-level download status.
//!
//! # State Machine
//!
//! ```text
//!              start              packages resolved
//!   Waiting ──────────► Preparing ─────────────────► Downloading ───► Completed
//!      │                   │  ▲                       │  ▲   │  ▲
//!      │                   │  └────────┐        pause │  │   │  │ backoff
//!      │                   │           │              ▼  │   ▼  │ elapsed
//!      │                   │         Paused ◄────────────┘  Retrying
//!      │                   │     (resume if resumable)         │
//!      └───────────────────┴──────────────────┬────────────────┘
//!                                              ▼
//!                                            Failed ──manual retry──► Retrying
//!                                                     (if recoverable)
//! ```
//!
//! `Completed` is final. `Failed` is final unless it is recoverable, in which
//! case a manual retry re-enters `Retrying`. Cancellation moves any
//! unfinished status to `Failed`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a task was paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum PauseReason {
    UserRequested,
    NetworkIssue,
    SystemSleep,
    Other(String),
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "paused by user"),
            Self::NetworkIssue => write!(f, "network issue"),
            Self::SystemSleep => write!(f, "system sleep"),
            Self::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// What the engine is doing while a task is preparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrepareStage {
    Initializing,
    FetchingInfo,
    ValidatingSetup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareInfo {
    pub stage: PrepareStage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    pub file_name: String,
    pub current_index: usize,
    pub total_count: usize,
    pub start_time: DateTime<Utc>,
    /// Estimated seconds remaining, if a speed is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseInfo {
    pub reason: PauseReason,
    pub timestamp: DateTime<Utc>,
    pub resumable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionInfo {
    pub timestamp: DateTime<Utc>,
    /// Seconds from task creation to completion.
    pub total_time_secs: f64,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
    /// Code of the error that caused the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    pub attempt: u32,
    pub max_attempts: u32,
    pub reason: String,
    pub next_retry_at: DateTime<Utc>,
}

/// Status of a download task. Serialized as `{"type": ..., "info": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "info", rename_all = "camelCase")]
pub enum DownloadStatus {
    #[default]
    Waiting,
    Preparing(PrepareInfo),
    Downloading(DownloadInfo),
    Paused(PauseInfo),
    Completed(CompletionInfo),
    Failed(FailureInfo),
    Retrying(RetryInfo),
}

impl DownloadStatus {
    pub fn preparing(stage: PrepareStage, message: impl Into<String>) -> Self {
        Self::Preparing(PrepareInfo {
            stage,
            message: message.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn paused(reason: PauseReason, resumable: bool) -> Self {
        Self::Paused(PauseInfo {
            reason,
            timestamp: Utc::now(),
            resumable,
        })
    }

    pub fn failed(message: impl Into<String>, recoverable: bool, code: Option<i32>) -> Self {
        Self::Failed(FailureInfo {
            message: message.into(),
            timestamp: Utc::now(),
            recoverable,
            code,
        })
    }

    /// Short lowercase name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Preparing(_) => "preparing",
            Self::Downloading(_) => "downloading",
            Self::Paused(_) => "paused",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Retrying(_) => "retrying",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Waiting | Self::Preparing(_) | Self::Downloading(_) | Self::Retrying(_)
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Waiting | Self::Preparing(_) | Self::Downloading(_) | Self::Retrying(_))
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Paused(info) if info.resumable)
    }

    pub fn can_retry(&self) -> bool {
        matches!(self, Self::Failed(info) if info.recoverable)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    ///
    /// `Downloading → Downloading` is allowed so the current package can
    /// advance, and `Preparing → Preparing` so the stage can. Any unfinished
    /// status may move to `Failed`.
    pub fn can_transition_to(&self, next: &DownloadStatus) -> bool {
        use DownloadStatus::*;
        match (self, next) {
            (Completed(_), _) => false,
            (Failed(_), Retrying(_)) => self.can_retry(),
            (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (_, Paused(_)) => self.can_pause(),

            (Waiting, Preparing(_)) => true,
            (Preparing(_), Preparing(_) | Downloading(_) | Retrying(_)) => true,
            (Downloading(_), Downloading(_) | Retrying(_) | Completed(_)) => true,
            (Retrying(_), Downloading(_) | Preparing(_)) => true,
            (Paused(_), Downloading(_) | Preparing(_)) => self.can_resume(),
            _ => false,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Preparing(info) => write!(f, "preparing: {}", info.message),
            Self::Downloading(info) => write!(
                f,
                "downloading {} ({}/{})",
                info.file_name,
                info.current_index + 1,
                info.total_count
            ),
            Self::Paused(info) => write!(f, "paused: {}", info.reason),
            Self::Completed(_) => write!(f, "completed"),
            Self::Failed(info) => write!(f, "failed: {}", info.message),
            Self::Retrying(info) => write!(
                f,
                "retrying ({}/{}): {}",
                info.attempt, info.max_attempts, info.reason
            ),
        }
    }
}

/// Status of a single package within a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PackageStatus {
    #[default]
    Waiting,
    Downloading,
    Paused,
    Completed,
    Failed(String),
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Downloading => write!(f, "downloading"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}
