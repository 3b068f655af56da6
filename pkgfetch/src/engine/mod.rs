//! Download manager.
//!
//! [`DownloadManager`] is the public façade of the engine. It owns the task
//! table, persists every change, and runs each started task on its own Tokio
//! task. At most `max_concurrent_downloads` tasks transfer at once; the rest
//! wait for a permit.
//!
//! # Lifecycle
//!
//! ```text
//! create_task ──► Waiting ──start──► runner ──► Preparing ──► Downloading ──► Completed
//!                                      │                         │
//!                        pause/resume ─┤                         ├─ recoverable error ─► Retrying
//!                        cancel ───────┘                         └─ terminal error ────► Failed
//! ```
//!
//! Status changes and progress are broadcast as [`EngineEvent`]s. Progress
//! checkpoints are written by a background task so the transfer path never
//! waits on task persistence.
//!
//! # Example
//!
//! ```ignore
//! use pkgfetch::{CreateTaskRequest, DownloadManager};
//!
//! let manager = DownloadManager::new(config, catalog)?;
//! manager.load_saved_tasks().await?;
//! let id = manager.create_task(CreateTaskRequest::new("PHSP")).await?;
//! manager.start(id)?;
//! let status = manager.wait_for(id).await?;
//! ```

mod events;
mod runner;

pub use events::{EngineEvent, EVENT_CHANNEL_CAPACITY};
pub use runner::APPLICATION_MANIFEST_FILE;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::download::{
    ChunkStateStore, DownloadError, DownloadResult, RangeExecutor, TransferCoordinator,
};
use crate::persistence::{TaskStore, PROCESS_EXITED_REASON};
use crate::registry::{ActiveCounts, CancelRegistry};
use crate::retry;
use crate::task::{
    DownloadStatus, DownloadTask, PackageStatus, PauseReason, RetryInfo, TaskId, TaskProgress,
};

type SharedTask = Arc<Mutex<DownloadTask>>;

/// Parameters of a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTaskRequest {
    pub product_id: String,
    /// Product version; the newest known version when `None`.
    pub version: Option<String>,
    /// Install language; the configured language when `None`.
    pub language: Option<String>,
    /// Task directory; `<download dir>/<product>_<version>` when `None`.
    pub directory: Option<PathBuf>,
    /// Package names to fetch; the default selection when empty.
    pub packages: Vec<String>,
}

impl CreateTaskRequest {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }
}

/// Handle to the download engine. Clones share the same engine.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
    registry: Arc<CancelRegistry>,
    store: TaskStore,
    coordinator: TransferCoordinator,
    tasks: DashMap<TaskId, SharedTask>,
    permits: Arc<Semaphore>,
    /// One runner per task at a time.
    run_locks: DashMap<TaskId, Arc<tokio::sync::Mutex<()>>>,
    events: broadcast::Sender<EngineEvent>,
    checkpoints: mpsc::UnboundedSender<TaskId>,
    /// Serializes snapshot-and-write so an older snapshot never lands last.
    persist_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl DownloadManager {
    /// Create the engine. Must be called from within a Tokio runtime; the
    /// registry sweeper and checkpoint writer are spawned here.
    pub fn new(config: EngineConfig, catalog: Arc<dyn Catalog>) -> DownloadResult<Self> {
        let executor = RangeExecutor::with_settings(config.request_timeout, &config.headers)?;
        let states = Arc::new(ChunkStateStore::new(config.chunk_states_dir()));
        let coordinator = TransferCoordinator::new(executor, states, config.plan_options())
            .with_intervals(config.speed_sample_interval, config.progress_interval);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (checkpoints, checkpoint_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            store: TaskStore::new(config.tasks_dir()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            registry: Arc::new(CancelRegistry::new()),
            config,
            catalog,
            coordinator,
            tasks: DashMap::new(),
            run_locks: DashMap::new(),
            events,
            checkpoints,
            persist_lock: tokio::sync::Mutex::new(()),
            shutdown,
        });

        inner
            .registry
            .spawn_gc(inner.config.gc_interval, inner.shutdown.child_token());
        tokio::spawn(checkpoint_loop(
            Arc::downgrade(&inner),
            checkpoint_rx,
            inner.shutdown.child_token(),
        ));

        info!(
            data_dir = %inner.config.data_dir.display(),
            max_concurrent = inner.config.max_concurrent_downloads,
            "Download manager started"
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Load persisted tasks and restore their resume tokens.
    ///
    /// Tasks already known to the manager are left alone. Returns the number
    /// of tasks added.
    pub async fn load_saved_tasks(&self) -> DownloadResult<usize> {
        let inner = &self.inner;
        let mut added = 0;
        for mut task in inner.store.load_all().await? {
            if inner.tasks.contains_key(&task.id) {
                continue;
            }
            let id = task.id;
            if let Some(token) = task.resume_token.take() {
                inner.registry.store_resume_token(id, token);
            }
            inner.tasks.insert(id, Arc::new(Mutex::new(task)));
            if let Err(e) = inner.persist(id).await {
                warn!(task_id = %id, error = %e, "Failed to save restored task");
            }
            added += 1;
        }
        Ok(added)
    }

    /// Create and persist a task in `Waiting`.
    ///
    /// If an unfinished task for the same product, version, language and
    /// platform exists, its id is returned instead. A finished one is
    /// replaced.
    pub async fn create_task(&self, request: CreateTaskRequest) -> DownloadResult<TaskId> {
        let inner = &self.inner;
        let product = inner
            .catalog
            .find_product(&request.product_id, request.version.as_deref())
            .ok_or_else(|| {
                DownloadError::Catalog(format!(
                    "product {} {} not found",
                    request.product_id,
                    request.version.as_deref().unwrap_or("(latest)")
                ))
            })?;

        let language = request
            .language
            .unwrap_or_else(|| inner.config.language.clone());
        let directory = request
            .directory
            .unwrap_or_else(|| inner.config.task_dir(&product.id, &product.version));
        let display_name = if product.display_name.is_empty() {
            product.id.clone()
        } else {
            product.display_name.clone()
        };
        let mut task = DownloadTask::new(
            &product.id,
            &product.version,
            language,
            display_name,
            directory,
            &product.platform,
        );
        task.requested_packages = request.packages;

        let file_name = task.file_name();
        let mut replaced = None;
        for entry in inner.tasks.iter() {
            let existing = entry.value().lock();
            if existing.file_name() != file_name {
                continue;
            }
            if !existing.status.is_finished() {
                info!(task_id = %existing.id, file = %file_name, "Task already exists");
                return Ok(existing.id);
            }
            replaced = Some(existing.id);
        }
        if let Some(old) = replaced {
            inner.tasks.remove(&old);
            inner.run_locks.remove(&old);
            inner.emit(EngineEvent::Removed { task_id: old });
            debug!(task_id = %old, "Replaced finished task");
        }

        let id = task.id;
        info!(
            task_id = %id,
            product = %task.product_id,
            version = %task.version,
            directory = %task.directory.display(),
            "Created task"
        );
        inner.tasks.insert(id, Arc::new(Mutex::new(task)));
        inner.persist(id).await?;
        inner.emit_status(id, DownloadStatus::Waiting);
        Ok(id)
    }

    /// Start a `Waiting` task.
    pub fn start(&self, id: TaskId) -> DownloadResult<()> {
        let task = self.inner.shared(id)?;
        let status = task.lock().status.clone();
        if !matches!(status, DownloadStatus::Waiting) {
            return Err(invalid("start", &status));
        }
        self.inner.spawn_runner(id);
        Ok(())
    }

    /// Pause a task, keeping a resume token for the package in flight.
    pub async fn pause(&self, id: TaskId, reason: PauseReason) -> DownloadResult<()> {
        let inner = &self.inner;
        let task = inner.shared(id)?;
        {
            let status = &task.lock().status;
            if !status.can_pause() {
                return Err(invalid("pause", status));
            }
        }

        let token = inner.registry.pause_with_resume_token(id);
        let status = DownloadStatus::paused(reason, true);
        let applied = {
            let mut guard = task.lock();
            let result = guard.set_status(status.clone());
            if result.is_ok() {
                for package in guard.groups.iter_mut().flat_map(|g| g.packages.iter_mut()) {
                    package.speed = 0.0;
                    if package.status == PackageStatus::Downloading {
                        package.status = PackageStatus::Paused;
                    }
                }
                if token.is_some() {
                    guard.resume_token = token;
                }
                guard.refresh_totals();
            }
            result
        };
        if let Err(e) = applied {
            // Finished while the pause was being applied.
            inner.registry.resume(id);
            return Err(e);
        }

        info!(task_id = %id, "Task paused");
        inner.emit_status(id, status);
        inner.persist(id).await
    }

    /// Resume a resumable paused task.
    pub async fn resume(&self, id: TaskId) -> DownloadResult<()> {
        let inner = &self.inner;
        let task = inner.shared(id)?;
        let status = {
            let mut guard = task.lock();
            if !guard.status.can_resume() {
                return Err(invalid("resume", &guard.status));
            }
            let next = runner::resume_status(&guard);
            guard.set_status(next.clone())?;
            for package in guard.groups.iter_mut().flat_map(|g| g.packages.iter_mut()) {
                if package.status == PackageStatus::Paused {
                    package.status = PackageStatus::Waiting;
                }
            }
            next
        };
        inner.registry.resume(id);

        info!(task_id = %id, "Task resumed");
        inner.emit_status(id, status);
        inner.persist(id).await?;
        inner.spawn_runner(id);
        Ok(())
    }

    /// Cancel a task. It ends `Failed` and cannot be retried.
    ///
    /// Chunk bookkeeping of unfinished packages is discarded. With
    /// `remove_files` the task directory is deleted as well.
    pub async fn cancel(&self, id: TaskId, remove_files: bool) -> DownloadResult<()> {
        let inner = &self.inner;
        let task = inner.shared(id)?;
        {
            let status = &task.lock().status;
            if status.is_finished() {
                return Err(invalid("cancel", status));
            }
        }

        inner.registry.cancel(id);
        let failure = retry::classify(&DownloadError::Cancelled);
        let status = DownloadStatus::failed(failure.message.clone(), false, Some(failure.code));
        let (unfinished, directory) = {
            let mut guard = task.lock();
            guard.set_status(status.clone())?;
            guard.resume_token = None;
            guard.current_package = None;
            let mut unfinished = Vec::new();
            for at in guard.package_refs() {
                let package_id = guard.package_identifier(at);
                if let Some(package) = guard.package_mut(at) {
                    package.speed = 0.0;
                    if package.downloaded {
                        continue;
                    }
                    if matches!(package.status, PackageStatus::Downloading | PackageStatus::Paused) {
                        package.status = PackageStatus::Failed(failure.message.clone());
                    }
                    unfinished.extend(package_id);
                }
            }
            guard.refresh_totals();
            (unfinished, guard.directory.clone())
        };

        inner.clear_chunk_states(&unfinished).await;
        if remove_files {
            remove_dir(&directory).await?;
        }

        info!(task_id = %id, remove_files, "Task cancelled");
        inner.emit_status(id, status);
        inner.persist(id).await
    }

    /// Manually retry a recoverable failed task. The automatic retry budget
    /// starts over.
    pub async fn retry(&self, id: TaskId) -> DownloadResult<()> {
        let inner = &self.inner;
        let task = inner.shared(id)?;
        let status = {
            let mut guard = task.lock();
            if !guard.status.can_retry() {
                return Err(invalid("retry", &guard.status));
            }
            let next = DownloadStatus::Retrying(RetryInfo {
                attempt: 0,
                max_attempts: inner.config.retry_policy.max_retries(),
                reason: "manual retry".to_string(),
                next_retry_at: Utc::now(),
            });
            guard.set_status(next.clone())?;
            guard.retry_count = 0;
            for package in guard.groups.iter_mut().flat_map(|g| g.packages.iter_mut()) {
                if matches!(package.status, PackageStatus::Failed(_)) {
                    package.status = PackageStatus::Waiting;
                }
            }
            next
        };

        info!(task_id = %id, "Retrying task");
        inner.emit_status(id, status);
        inner.persist(id).await?;
        inner.spawn_runner(id);
        Ok(())
    }

    /// Remove a task from the manager and delete its task file.
    ///
    /// Live transfers are cancelled. With `delete_files` the task directory
    /// is deleted too.
    pub async fn remove(&self, id: TaskId, delete_files: bool) -> DownloadResult<()> {
        let inner = &self.inner;
        let (_, task) = inner
            .tasks
            .remove(&id)
            .ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;
        inner.registry.cancel(id);
        inner.registry.forget(id);
        inner.run_locks.remove(&id);

        let snapshot = task.lock().clone();
        inner.store.remove(&snapshot).await?;
        let packages: Vec<String> = snapshot
            .package_refs()
            .into_iter()
            .filter_map(|at| snapshot.package_identifier(at))
            .collect();
        inner.clear_chunk_states(&packages).await;
        if delete_files {
            remove_dir(&snapshot.directory).await?;
        }

        info!(task_id = %id, delete_files, "Task removed");
        inner.emit(EngineEvent::Removed { task_id: id });
        Ok(())
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn task(&self, id: TaskId) -> Option<DownloadTask> {
        self.inner.shared(id).ok().map(|t| t.lock().clone())
    }

    pub fn progress(&self, id: TaskId) -> Option<TaskProgress> {
        self.inner.shared(id).ok().map(|t| t.lock().progress())
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the task is paused, completed or failed, and return that
    /// status. Automatic retries are waited through.
    pub async fn wait_for(&self, id: TaskId) -> DownloadResult<DownloadStatus> {
        let mut events = self.inner.events.subscribe();
        loop {
            let status = self.inner.shared(id)?.lock().status.clone();
            if matches!(
                status,
                DownloadStatus::Paused(_) | DownloadStatus::Completed(_) | DownloadStatus::Failed(_)
            ) {
                return Ok(status);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(status),
            }
        }
    }

    /// Counts of live transfer handles.
    pub fn active_counts(&self) -> ActiveCounts {
        self.inner.registry.active_counts()
    }

    /// Pause every task that is preparing, downloading or retrying with
    /// `reason`. Returns the number of tasks paused.
    pub async fn pause_all(&self, reason: PauseReason) -> usize {
        let mut paused = 0;
        for id in self.inner.running_ids() {
            match self.pause(id, reason.clone()).await {
                Ok(()) => paused += 1,
                Err(e) => debug!(task_id = %id, error = %e, "Not paused"),
            }
        }
        paused
    }

    /// Pause every running task because connectivity was lost. The tasks
    /// are resumed by [`network_restored`](Self::network_restored).
    pub async fn network_lost(&self) -> usize {
        let paused = self.pause_all(PauseReason::NetworkIssue).await;
        warn!(paused, "Network lost, tasks paused");
        paused
    }

    /// Resume the tasks paused by [`network_lost`](Self::network_lost).
    /// Tasks paused for any other reason stay paused.
    pub async fn network_restored(&self) -> usize {
        let resumed = self.resume_paused_for(&PauseReason::NetworkIssue).await;
        info!(resumed, "Network restored");
        resumed
    }

    /// Pause every running task before the host sleeps.
    pub async fn system_sleeping(&self) -> usize {
        let paused = self.pause_all(PauseReason::SystemSleep).await;
        info!(paused, "System sleeping, tasks paused");
        paused
    }

    /// Resume the tasks paused by [`system_sleeping`](Self::system_sleeping).
    pub async fn system_woke(&self) -> usize {
        let resumed = self.resume_paused_for(&PauseReason::SystemSleep).await;
        info!(resumed, "System woke");
        resumed
    }

    async fn resume_paused_for(&self, reason: &PauseReason) -> usize {
        let ids: Vec<TaskId> = self
            .inner
            .tasks
            .iter()
            .filter(|entry| {
                matches!(
                    &entry.value().lock().status,
                    DownloadStatus::Paused(info) if info.reason == *reason && info.resumable
                )
            })
            .map(|entry| *entry.key())
            .collect();

        let mut resumed = 0;
        for id in ids {
            match self.resume(id).await {
                Ok(()) => resumed += 1,
                Err(e) => debug!(task_id = %id, error = %e, "Not resumed"),
            }
        }
        resumed
    }

    /// Stop the engine. Running tasks are paused so they resume after a
    /// restart, then background tasks are stopped.
    pub async fn shutdown(&self) {
        let paused = self
            .pause_all(PauseReason::Other(PROCESS_EXITED_REASON.to_string()))
            .await;
        self.inner.shutdown.cancel();
        info!(paused, "Download manager stopped");
    }
}

impl Inner {
    fn shared(&self, id: TaskId) -> DownloadResult<SharedTask> {
        self.tasks
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))
    }

    fn running_ids(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|entry| {
                matches!(
                    entry.value().lock().status,
                    DownloadStatus::Preparing(_)
                        | DownloadStatus::Downloading(_)
                        | DownloadStatus::Retrying(_)
                )
            })
            .map(|entry| *entry.key())
            .collect()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_status(&self, id: TaskId, status: DownloadStatus) {
        debug!(task_id = %id, status = status.kind(), "Status changed");
        self.emit(EngineEvent::StatusChanged {
            task_id: id,
            status,
        });
    }

    /// Write the current snapshot of `id`, embedding a resume token held by
    /// the registry for its current package.
    async fn persist(&self, id: TaskId) -> DownloadResult<()> {
        let _guard = self.persist_lock.lock().await;
        let Ok(task) = self.shared(id) else {
            // Removed in the meantime.
            return Ok(());
        };
        let mut snapshot = task.lock().clone();
        if let Some(token) = self.registry.peek_resume_token(id) {
            let current = snapshot
                .current_package
                .and_then(|at| snapshot.package_identifier(at));
            if current.as_deref() == Some(token.package_id.as_str()) {
                snapshot.resume_token = Some(token);
            }
        }
        self.store.save(&snapshot).await
    }

    async fn persist_logged(&self, id: TaskId) {
        if let Err(e) = self.persist(id).await {
            warn!(task_id = %id, error = %e, "Failed to save task");
        }
    }

    async fn clear_chunk_states(&self, package_ids: &[String]) {
        for package_id in package_ids {
            if let Err(e) = self.coordinator.states().clear(package_id).await {
                warn!(package = %package_id, error = %e, "Failed to clear chunk state");
            }
        }
    }
}

fn invalid(action: &str, status: &DownloadStatus) -> DownloadError {
    DownloadError::InvalidTransition {
        action: action.to_string(),
        status: status.kind().to_string(),
    }
}

async fn remove_dir(path: &Path) -> DownloadResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed task directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::io(path, e)),
    }
}

/// Write progress checkpoints requested by running transfers.
///
/// Holds only a weak reference so the engine can be dropped while this
/// task is idle.
async fn checkpoint_loop(
    inner: Weak<Inner>,
    mut requests: mpsc::UnboundedReceiver<TaskId>,
    shutdown: CancellationToken,
) {
    loop {
        let id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = requests.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };
        // Collapse a burst of requests for the same task into one write.
        let mut pending = vec![id];
        while let Ok(more) = requests.try_recv() {
            if !pending.contains(&more) {
                pending.push(more);
            }
        }
        let Some(inner) = inner.upgrade() else { break };
        for id in pending {
            inner.persist_logged(id).await;
        }
    }
    debug!("Checkpoint writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProductDescriptor, StaticCatalog};
    use tempfile::TempDir;

    fn catalog() -> Arc<dyn Catalog> {
        let mut catalog = StaticCatalog::new();
        catalog.add_product(ProductDescriptor {
            id: "PHSP".into(),
            version: "25.0".into(),
            display_name: "Photoshop".into(),
            platform: "osx10".into(),
            build_id: "guid-1".into(),
            dependencies: Vec::new(),
        });
        Arc::new(catalog)
    }

    fn manager(dir: &TempDir) -> DownloadManager {
        let config = EngineConfig::new(dir.path().join("data"))
            .with_download_dir(dir.path().join("downloads"));
        DownloadManager::new(config, catalog()).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = CreateTaskRequest::new("PHSP")
            .with_version("25.0")
            .with_language("de_DE")
            .with_packages(vec!["Core.zip".into()]);
        assert_eq!(request.version.as_deref(), Some("25.0"));
        assert_eq!(request.language.as_deref(), Some("de_DE"));
        assert!(request.directory.is_none());
        assert_eq!(request.packages, vec!["Core.zip".to_string()]);
    }

    #[tokio::test]
    async fn test_create_task_persists_waiting() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap();

        let task = manager.task(id).unwrap();
        assert_eq!(task.status, DownloadStatus::Waiting);
        assert_eq!(task.display_name, "Photoshop");
        assert_eq!(task.language, "en_US");
        assert_eq!(task.directory, dir.path().join("downloads").join("PHSP_25.0"));
        assert!(dir
            .path()
            .join("data/tasks/PHSP_25.0-en_US-osx10-task.json")
            .exists());
    }

    #[tokio::test]
    async fn test_duplicate_create_returns_existing() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let first = manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap();
        let second = manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.list().len(), 1);

        let other = manager
            .create_task(CreateTaskRequest::new("PHSP").with_language("fr_FR"))
            .await
            .unwrap();
        assert_ne!(first, other);
        assert_eq!(manager.list().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let err = manager
            .create_task(CreateTaskRequest::new("NOPE"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Catalog(_)));
    }

    #[tokio::test]
    async fn test_invalid_lifecycle_calls() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap();

        assert!(matches!(
            manager.resume(id).await,
            Err(DownloadError::InvalidTransition { .. })
        ));
        assert!(matches!(
            manager.retry(id).await,
            Err(DownloadError::InvalidTransition { .. })
        ));
        assert!(matches!(
            manager.pause(TaskId::new_v4(), PauseReason::UserRequested).await,
            Err(DownloadError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pause_waiting_then_cancel() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap();

        manager.pause(id, PauseReason::UserRequested).await.unwrap();
        assert!(manager.task(id).unwrap().status.can_resume());

        manager.cancel(id, false).await.unwrap();
        let status = manager.task(id).unwrap().status;
        match &status {
            DownloadStatus::Failed(info) => {
                assert!(!info.recoverable);
                assert_eq!(info.message, "download cancelled");
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert!(!status.can_retry());
        assert!(manager.cancel(id, false).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_deletes_task_file() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap();
        let mut events = manager.subscribe();

        manager.remove(id, true).await.unwrap();
        assert!(manager.task(id).is_none());
        assert!(!dir
            .path()
            .join("data/tasks/PHSP_25.0-en_US-osx10-task.json")
            .exists());
        assert_eq!(events.recv().await.unwrap(), EngineEvent::Removed { task_id: id });
        assert!(!manager.inner.registry.is_cancelled(id), "registry bookkeeping is released");
        assert!(matches!(
            manager.remove(id, false).await,
            Err(DownloadError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_network_restore_leaves_user_pauses() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap();
        manager.pause(id, PauseReason::UserRequested).await.unwrap();

        assert_eq!(manager.network_lost().await, 0, "nothing is running");
        assert_eq!(manager.network_restored().await, 0);
        assert_eq!(manager.system_woke().await, 0);
        match manager.task(id).unwrap().status {
            DownloadStatus::Paused(info) => assert_eq!(info.reason, PauseReason::UserRequested),
            other => panic!("unexpected status: {other:?}"),
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_saved_tasks_reload() {
        let dir = TempDir::new().unwrap();
        let id = {
            let manager = manager(&dir);
            manager.create_task(CreateTaskRequest::new("PHSP")).await.unwrap()
        };

        let manager = manager(&dir);
        assert_eq!(manager.load_saved_tasks().await.unwrap(), 1);
        // Waiting is demoted to a resumable pause on restore.
        assert!(manager.task(id).unwrap().status.can_resume());
        assert_eq!(manager.load_saved_tasks().await.unwrap(), 0);
    }
}
