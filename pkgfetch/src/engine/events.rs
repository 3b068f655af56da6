//! Events broadcast by the download manager.

use crate::task::{DownloadStatus, TaskId};

/// Capacity of the event channel. Slow subscribers see `Lagged` and should
/// re-read the task instead of replaying events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable happened to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The task moved to a new status.
    StatusChanged { task_id: TaskId, status: DownloadStatus },

    /// Bytes arrived for the current package.
    Progress {
        task_id: TaskId,
        package: String,
        downloaded: u64,
        total: u64,
        /// Bytes per second of the current package.
        speed: f64,
        /// Fraction of the whole task, 0.0 - 1.0.
        task_progress: f64,
    },

    /// The task was removed from the manager.
    Removed { task_id: TaskId },
}

impl EngineEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::StatusChanged { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Removed { task_id } => *task_id,
        }
    }
}
