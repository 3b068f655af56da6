//! Task persistence.
//!
//! Every task is stored as one pretty-printed JSON file in the tasks
//! directory. The file name is derived from product, version, language and
//! platform (see [`crate::task::naming::task_file_name`]), so re-creating the
//! same logical download always maps to the same file.
//!
//! Writes replace the whole file through a temporary sibling and a rename.
//! An in-memory cache mirrors the last written snapshot of each task.
//!
//! # Restore
//!
//! [`TaskStore::load_all`] never trusts an in-flight status found on disk,
//! since no transfer survives the process:
//!
//! | Persisted status                | Restored as                             |
//! |---------------------------------|-----------------------------------------|
//! | `downloading`                   | `paused("process exited", resumable)`   |
//! | `waiting`/`preparing`/`retrying`| `paused("restarted", resumable)`        |
//! | `paused`                        | unchanged                               |
//! | `completed`/`failed`            | unchanged                               |

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::download::{write_atomic, DownloadError, DownloadResult};
use crate::task::{DownloadStatus, DownloadTask, PackageStatus, PauseReason, TaskId};

/// Reason recorded for tasks that were transferring when the process ended.
pub const PROCESS_EXITED_REASON: &str = "process exited";

/// Reason recorded for other unfinished tasks found at startup.
pub const RESTARTED_REASON: &str = "restarted";

/// Demote an in-flight status found at startup to a resumable pause.
pub fn restore_status(status: &DownloadStatus) -> DownloadStatus {
    match status {
        DownloadStatus::Downloading(_) => {
            DownloadStatus::paused(PauseReason::Other(PROCESS_EXITED_REASON.to_string()), true)
        }
        DownloadStatus::Waiting | DownloadStatus::Preparing(_) | DownloadStatus::Retrying(_) => {
            DownloadStatus::paused(PauseReason::Other(RESTARTED_REASON.to_string()), true)
        }
        other => other.clone(),
    }
}

/// Apply startup reconciliation to a freshly loaded task.
fn reconcile(task: &mut DownloadTask) {
    task.status = restore_status(&task.status);
    for group in &mut task.groups {
        for package in &mut group.packages {
            package.speed = 0.0;
            if package.status == PackageStatus::Downloading {
                package.status = PackageStatus::Paused;
            }
        }
    }
    task.refresh_totals();
}

/// Directory of persisted task files with a write-through cache.
#[derive(Debug)]
pub struct TaskStore {
    dir: PathBuf,
    cache: DashMap<TaskId, DownloadTask>,
    write_lock: Mutex<()>,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the persisted file of `task`.
    pub fn path_for(&self, task: &DownloadTask) -> PathBuf {
        self.dir.join(task.file_name())
    }

    /// Write a full snapshot of `task`.
    pub async fn save(&self, task: &DownloadTask) -> DownloadResult<()> {
        let json = serde_json::to_vec_pretty(task)?;
        let path = self.path_for(task);
        {
            let _guard = self.write_lock.lock().await;
            write_atomic(&self.dir, &path, &json).await?;
        }
        self.cache.insert(task.id, task.clone());
        debug!(task_id = %task.id, status = task.status.kind(), "Saved task");
        Ok(())
    }

    /// Last snapshot written by this process.
    pub fn cached(&self, id: TaskId) -> Option<DownloadTask> {
        self.cache.get(&id).map(|entry| entry.value().clone())
    }

    /// Load and reconcile every persisted task, oldest first.
    ///
    /// Files that cannot be read or parsed are skipped with a warning.
    pub async fn load_all(&self) -> DownloadResult<Vec<DownloadTask>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DownloadError::io(&self.dir, e)),
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DownloadError::io(&self.dir, e))?
        {
            let path = entry.path();
            let is_task_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(crate::task::naming::TASK_FILE_SUFFIX));
            if !is_task_file {
                continue;
            }
            match Self::read_task(&path).await {
                Ok(mut task) => {
                    reconcile(&mut task);
                    self.cache.insert(task.id, task.clone());
                    tasks.push(task);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable task file"),
            }
        }

        tasks.sort_by_key(|t| t.created_at);
        info!(count = tasks.len(), dir = %self.dir.display(), "Loaded saved tasks");
        Ok(tasks)
    }

    async fn read_task(path: &Path) -> DownloadResult<DownloadTask> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Delete the persisted file and cache entry of `task`. Downloaded files
    /// are left alone.
    pub async fn remove(&self, task: &DownloadTask) -> DownloadResult<()> {
        let path = self.path_for(task);
        self.cache.remove(&task.id);
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(task_id = %task.id, "Removed task file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{
        CompletionInfo, ComponentGroup, DownloadInfo, Package, PackageKind, RetryInfo,
    };
    use chrono::Utc;
    use tempfile::TempDir;

    fn task(language: &str) -> DownloadTask {
        let mut task = DownloadTask::new("PHSP", "25.0", language, "Photoshop", "/dl/PHSP", "osx10");
        let mut group = ComponentGroup::new("PHSP", "25.0", "guid-1");
        let mut package = Package::new(PackageKind::Core, "Core.zip", 1000, "/p/Core.zip");
        package.update_progress(400, 1000, 55.0);
        package.status = PackageStatus::Downloading;
        group.packages.push(package);
        task.groups.push(group);
        task.refresh_totals();
        task
    }

    fn downloading() -> DownloadStatus {
        DownloadStatus::Downloading(DownloadInfo {
            file_name: "Core.zip".into(),
            current_index: 0,
            total_count: 1,
            start_time: Utc::now(),
            eta_secs: None,
        })
    }

    fn pause_reason(status: &DownloadStatus) -> Option<(String, bool)> {
        match status {
            DownloadStatus::Paused(info) => Some((info.reason.to_string(), info.resumable)),
            _ => None,
        }
    }

    #[test]
    fn test_restore_status_table() {
        assert_eq!(
            pause_reason(&restore_status(&downloading())),
            Some((PROCESS_EXITED_REASON.to_string(), true))
        );
        assert_eq!(
            pause_reason(&restore_status(&DownloadStatus::Waiting)),
            Some((RESTARTED_REASON.to_string(), true))
        );
        let retrying = DownloadStatus::Retrying(RetryInfo {
            attempt: 1,
            max_attempts: 3,
            reason: "timeout".into(),
            next_retry_at: Utc::now(),
        });
        assert_eq!(
            pause_reason(&restore_status(&retrying)),
            Some((RESTARTED_REASON.to_string(), true))
        );

        let failed = DownloadStatus::failed("disk full", false, Some(6001));
        assert_eq!(restore_status(&failed), failed);
        let user_paused = DownloadStatus::paused(PauseReason::UserRequested, true);
        assert_eq!(restore_status(&user_paused), user_paused);
    }

    #[tokio::test]
    async fn test_save_and_restore_demotes_downloading() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = task("en_US");
        task.status = downloading();
        store.save(&task).await.unwrap();

        assert!(dir.path().join("PHSP_25.0-en_US-osx10-task.json").exists());

        let restored = TaskStore::new(dir.path()).load_all().await.unwrap();
        assert_eq!(restored.len(), 1);
        let restored = &restored[0];
        assert_eq!(restored.id, task.id);
        assert!(restored.status.can_resume());
        assert_eq!(
            pause_reason(&restored.status),
            Some((PROCESS_EXITED_REASON.to_string(), true))
        );
        let package = &restored.groups[0].packages[0];
        assert_eq!(package.downloaded_size, 400);
        assert_eq!(package.speed, 0.0);
        assert_eq!(package.status, PackageStatus::Paused);
    }

    #[tokio::test]
    async fn test_terminal_status_restored_as_is() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = task("en_US");
        task.groups[0].packages[0].mark_completed();
        task.status = DownloadStatus::Completed(CompletionInfo {
            timestamp: Utc::now(),
            total_time_secs: 3.0,
            total_size: 1000,
        });
        store.save(&task).await.unwrap();

        let restored = store.load_all().await.unwrap();
        assert!(matches!(restored[0].status, DownloadStatus::Completed(_)));
    }

    #[tokio::test]
    async fn test_same_task_overwrites_one_file() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = task("en_US");
        store.save(&task).await.unwrap();
        task.retry_count = 2;
        store.save(&task).await.unwrap();
        store.save(&self::task("de_DE")).await.unwrap();

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
        assert_eq!(store.cached(task.id).unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_corrupt_and_foreign_files_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken-task.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let store = TaskStore::new(dir.path());
        store.save(&task("en_US")).await.unwrap();

        let restored = store.load_all().await.unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_cache() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let task = task("en_US");
        store.save(&task).await.unwrap();
        store.remove(&task).await.unwrap();

        assert!(!store.path_for(&task).exists());
        assert!(store.cached(task.id).is_none());
        // Removing twice is fine.
        store.remove(&task).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_dir_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path().join("absent"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_token_embedded() {
        use crate::registry::ResumeToken;

        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = task("en_US");
        task.resume_token = Some(ResumeToken {
            package_id: "Pkg_x_Core.zip".into(),
            url: "http://cdn/Core.zip".into(),
            destination: PathBuf::from("/dl/PHSP/PHSP/Core.zip"),
            chunk_index: 0,
            chunk_downloaded: 400,
            bytes_received: 400,
            created_at: Utc::now(),
        });
        store.save(&task).await.unwrap();

        let restored = store.load_all().await.unwrap();
        assert_eq!(restored[0].resume_token, task.resume_token);
    }
}
