//! Common helpers shared across CLI commands.

use console::style;
use pkgfetch::{DownloadManager, DownloadStatus, DownloadTask, TaskId};

use crate::error::CliError;
use crate::progress::WatchOutcome;

/// Characters of a task id shown in listings.
pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: TaskId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

/// True once a task needs no further watching.
pub fn is_settled(status: &DownloadStatus) -> bool {
    matches!(
        status,
        DownloadStatus::Paused(_) | DownloadStatus::Completed(_) | DownloadStatus::Failed(_)
    )
}

/// One-line, colored description of a status.
pub fn status_label(status: &DownloadStatus) -> String {
    match status {
        DownloadStatus::Waiting => style("waiting").dim().to_string(),
        DownloadStatus::Preparing(info) => format!("{} {}", style("preparing").cyan(), info.message),
        DownloadStatus::Downloading(info) => format!(
            "{} {} ({}/{})",
            style("downloading").cyan(),
            info.file_name,
            info.current_index + 1,
            info.total_count
        ),
        DownloadStatus::Paused(info) => format!("{} ({})", style("paused").yellow(), info.reason),
        DownloadStatus::Completed(_) => style("completed").green().to_string(),
        DownloadStatus::Failed(info) => format!("{} {}", style("failed:").red(), info.message),
        DownloadStatus::Retrying(info) => format!(
            "{} {}/{}: {}",
            style("retrying").yellow(),
            info.attempt,
            info.max_attempts,
            info.reason
        ),
    }
}

/// Find the task whose id starts with `prefix` (case-insensitive).
pub fn find_task(tasks: &[DownloadTask], prefix: &str) -> Result<TaskId, CliError> {
    let needle = prefix.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return Err(CliError::NoSuchTask(prefix.to_string()));
    }
    let matches: Vec<TaskId> = tasks
        .iter()
        .filter(|t| t.id.to_string().starts_with(&needle))
        .map(|t| t.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(CliError::NoSuchTask(prefix.to_string())),
        _ => Err(CliError::AmbiguousTask {
            prefix: prefix.to_string(),
            count: matches.len(),
        }),
    }
}

/// Resolve a task id prefix against the manager's tasks.
pub fn resolve_task(manager: &DownloadManager, prefix: &str) -> Result<TaskId, CliError> {
    find_task(&manager.list(), prefix)
}

/// Print the final status of watched tasks; error if any did not complete.
pub fn report(manager: &DownloadManager, outcome: &WatchOutcome) -> Result<(), CliError> {
    let mut unfinished = 0;
    for (id, status) in outcome {
        let name = manager
            .task(*id)
            .map(|t| t.display_name)
            .unwrap_or_default();
        println!("{} {} {}", short_id(*id), name, status_label(status));
        if !matches!(status, DownloadStatus::Completed(_)) {
            unfinished += 1;
        }
    }
    if unfinished > 0 {
        return Err(CliError::TasksFailed(unfinished));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgfetch::task::PauseReason;

    fn task(product: &str) -> DownloadTask {
        DownloadTask::new(product, "1.0", "en_US", product, "/dl", "osx10")
    }

    #[test]
    fn test_find_task_by_prefix() {
        let tasks = vec![task("PHSP"), task("ILST")];
        let id = tasks[1].id;
        assert_eq!(find_task(&tasks, &id.to_string()).unwrap(), id);
        assert_eq!(find_task(&tasks, &short_id(id).to_uppercase()).unwrap(), id);
        assert!(matches!(find_task(&tasks, "zzzz"), Err(CliError::NoSuchTask(_))));
        assert!(matches!(find_task(&tasks, "  "), Err(CliError::NoSuchTask(_))));
    }

    #[test]
    fn test_find_task_ambiguous() {
        let mut tasks = vec![task("PHSP"), task("ILST")];
        tasks[1].id = tasks[0].id;
        assert!(matches!(
            find_task(&tasks, &short_id(tasks[0].id)),
            Err(CliError::AmbiguousTask { count: 2, .. })
        ));
    }

    #[test]
    fn test_settled_statuses() {
        assert!(!is_settled(&DownloadStatus::Waiting));
        assert!(is_settled(&DownloadStatus::paused(PauseReason::UserRequested, true)));
        assert!(is_settled(&DownloadStatus::failed("x", false, None)));
    }

    #[test]
    fn test_status_label_mentions_reason() {
        console::set_colors_enabled(false);
        let label = status_label(&DownloadStatus::failed("network connection lost", true, Some(1001)));
        assert_eq!(label, "failed: network connection lost");
        let label = status_label(&DownloadStatus::paused(PauseReason::UserRequested, true));
        assert_eq!(label, "paused (paused by user)");
    }
}
