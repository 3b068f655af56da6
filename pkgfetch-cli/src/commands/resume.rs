//! Resume and retry commands - continue saved tasks in the foreground.

use pkgfetch::{DownloadManager, DownloadStatus, DownloadTask, TaskId};

use super::common::{report, resolve_task, short_id};
use crate::error::CliError;
use crate::progress;
use crate::runner::CliRunner;

/// Tasks `resume` picks up when no task is named.
fn resumable(tasks: &[DownloadTask]) -> Vec<TaskId> {
    tasks
        .iter()
        .filter(|t| t.status.can_resume() || matches!(t.status, DownloadStatus::Waiting))
        .map(|t| t.id)
        .collect()
}

async fn continue_task(manager: &DownloadManager, id: TaskId) -> Result<(), CliError> {
    let status = manager
        .task(id)
        .map(|t| t.status)
        .ok_or_else(|| CliError::NoSuchTask(id.to_string()))?;
    if matches!(status, DownloadStatus::Waiting) {
        manager.start(id)?;
    } else {
        manager.resume(id).await?;
    }
    Ok(())
}

/// Resume one task, or every paused and waiting task when `task` is `None`.
pub fn run_resume(runner: &CliRunner, task: Option<&str>) -> Result<(), CliError> {
    runner.log_startup("resume");
    let interrupt = runner.interrupt()?;

    runner.block_on(async {
        let manager = runner.manager(true).await?;
        let ids = match task {
            Some(prefix) => vec![resolve_task(&manager, prefix)?],
            None => resumable(&manager.list()),
        };
        if ids.is_empty() {
            println!("Nothing to resume.");
            manager.shutdown().await;
            return Ok(());
        }

        for &id in &ids {
            continue_task(&manager, id).await?;
            println!("Resuming {}", short_id(id));
        }

        let outcome = progress::watch(&manager, &ids, interrupt).await;
        manager.shutdown().await;
        report(&manager, &outcome?)
    })
}

/// Retry a task that failed with a recoverable error.
pub fn run_retry(runner: &CliRunner, task: &str) -> Result<(), CliError> {
    runner.log_startup("retry");
    let interrupt = runner.interrupt()?;

    runner.block_on(async {
        let manager = runner.manager(true).await?;
        let id = resolve_task(&manager, task)?;
        manager.retry(id).await?;
        println!("Retrying {}", short_id(id));

        let outcome = progress::watch(&manager, &[id], interrupt).await;
        manager.shutdown().await;
        report(&manager, &outcome?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgfetch::task::PauseReason;

    #[test]
    fn test_resumable_selection() {
        let mut paused = DownloadTask::new("PHSP", "25.0", "en_US", "Photoshop", "/dl", "osx10");
        paused.status = DownloadStatus::paused(PauseReason::UserRequested, true);
        let mut stuck = paused.clone();
        stuck.id = TaskId::new_v4();
        stuck.status = DownloadStatus::paused(PauseReason::Other("disk removed".into()), false);
        let waiting = DownloadTask::new("ILST", "28.0", "en_US", "Illustrator", "/dl", "osx10");
        let mut failed = waiting.clone();
        failed.id = TaskId::new_v4();
        failed.status = DownloadStatus::failed("network connection lost", true, Some(1001));

        let ids = resumable(&[paused.clone(), stuck, waiting.clone(), failed]);
        assert_eq!(ids, vec![paused.id, waiting.id]);
    }
}
