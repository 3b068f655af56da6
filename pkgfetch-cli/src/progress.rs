//! Terminal progress for running tasks.
//!
//! One bar per task, driven by engine events. Returns once every watched
//! task is paused, completed or failed, or when the user interrupts, in
//! which case the tasks are paused so they can be resumed later.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pkgfetch::task::PauseReason;
use pkgfetch::{DownloadManager, DownloadStatus, EngineEvent, TaskId};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::commands::common::{is_settled, short_id, status_label};
use crate::error::CliError;

/// Final status of each watched task.
pub type WatchOutcome = Vec<(TaskId, DownloadStatus)>;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} | {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

struct TaskBars {
    multi: MultiProgress,
    bars: HashMap<TaskId, ProgressBar>,
}

impl TaskBars {
    fn new(manager: &DownloadManager, ids: &[TaskId]) -> Self {
        let multi = MultiProgress::new();
        let mut bars = HashMap::new();
        for &id in ids {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(bar_style());
            bar.enable_steady_tick(Duration::from_millis(120));
            if let Some(task) = manager.task(id) {
                bar.set_prefix(format!("{} {}", short_id(id), task.display_name));
                bar.set_message(status_label(&task.status));
            }
            bars.insert(id, bar);
        }
        Self { multi, bars }
    }

    fn refresh(&self, manager: &DownloadManager, id: TaskId) {
        let (Some(bar), Some(progress)) = (self.bars.get(&id), manager.progress(id)) else {
            return;
        };
        bar.set_length(progress.total_size);
        bar.set_position(progress.total_downloaded_size);
    }

    fn set_status(&self, id: TaskId, status: &DownloadStatus) {
        let Some(bar) = self.bars.get(&id) else { return };
        match status {
            DownloadStatus::Completed(_) => bar.finish_with_message(status_label(status)),
            DownloadStatus::Failed(_) | DownloadStatus::Paused(_) => {
                bar.abandon_with_message(status_label(status))
            }
            _ => bar.set_message(status_label(status)),
        }
    }

    fn clear(&self) {
        let _ = self.multi.clear();
    }
}

/// Show progress for `ids` until they settle.
pub async fn watch(
    manager: &DownloadManager,
    ids: &[TaskId],
    interrupt: CancellationToken,
) -> Result<WatchOutcome, CliError> {
    let mut events = manager.subscribe();
    let bars = TaskBars::new(manager, ids);

    loop {
        let settled = ids.iter().all(|&id| {
            manager
                .task(id)
                .map_or(true, |task| is_settled(&task.status))
        });
        if settled {
            break;
        }

        tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                manager.pause_all(PauseReason::UserRequested).await;
                bars.clear();
                return Err(CliError::Interrupted);
            }
            event = events.recv() => match event {
                Ok(EngineEvent::Progress { task_id, .. }) => bars.refresh(manager, task_id),
                Ok(EngineEvent::StatusChanged { task_id, status }) => {
                    bars.refresh(manager, task_id);
                    bars.set_status(task_id, &status);
                }
                Ok(EngineEvent::Removed { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(ids
        .iter()
        .filter_map(|&id| manager.task(id).map(|task| (id, task.status)))
        .collect())
}
