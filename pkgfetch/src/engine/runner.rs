//! Task runner: drives one task from its current status to the end.
//!
//! A runner holds the task's run lock and one concurrency permit for its
//! whole lifetime. It resolves package lists on first run, then transfers
//! pending packages in order. Before every status change it re-checks the
//! registry under the task lock, so a concurrent pause or cancel always wins.
//!
//! Failures are classified once here: recoverable ones schedule an automatic
//! retry while the policy allows, everything else fails the task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{EngineEvent, Inner, SharedTask};
use crate::download::{
    write_atomic, DownloadError, DownloadResult, PackageRequest, ProgressCallback,
    TransferProgress,
};
use crate::registry::TransferHandle;
use crate::retry;
use crate::task::naming::package_url;
use crate::task::selection::{parse_application_manifest, select_packages, SelectionContext};
use crate::task::{
    CompletionInfo, ComponentGroup, DownloadInfo, DownloadStatus, DownloadTask, PackageRef,
    PackageStatus, PrepareStage, RetryInfo, TaskId,
};

/// Raw manifest copy written into each component directory.
pub const APPLICATION_MANIFEST_FILE: &str = "application.json";

/// How a runner ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    /// Paused, cancelled or removed underneath the runner.
    Stopped,
}

#[derive(Debug)]
struct RunFailure {
    /// Package that was transferring, if any.
    at: Option<PackageRef>,
    error: DownloadError,
}

impl From<DownloadError> for RunFailure {
    fn from(error: DownloadError) -> Self {
        Self { at: None, error }
    }
}

/// Status a paused task resumes into.
pub(super) fn resume_status(task: &DownloadTask) -> DownloadStatus {
    if !task.is_resolved() {
        return DownloadStatus::preparing(PrepareStage::Initializing, "resuming");
    }
    let refs = task.package_refs();
    let total_count = refs.len();
    let (current_index, file_name) = refs
        .iter()
        .enumerate()
        .find_map(|(index, at)| {
            task.package(*at)
                .filter(|p| !p.downloaded)
                .map(|p| (index, p.full_package_name.clone()))
        })
        .unwrap_or((total_count.saturating_sub(1), String::new()));
    DownloadStatus::Downloading(DownloadInfo {
        file_name,
        current_index,
        total_count,
        start_time: Utc::now(),
        eta_secs: None,
    })
}

/// Transfer request and display name of a pending package.
fn package_request(task: &DownloadTask, at: PackageRef, cdn: &str) -> Option<(PackageRequest, String)> {
    let package = task.package(at).filter(|p| !p.downloaded)?;
    let request = PackageRequest {
        package_id: task.package_identifier(at)?,
        url: package_url(cdn, &package.download_url),
        destination: task.package_destination(at)?,
        expected_size: package.download_size,
        manifest: package.integrity.clone(),
        resume: None,
    };
    Some((request, package.full_package_name.clone()))
}

impl Inner {
    pub(super) fn spawn_runner(self: &Arc<Self>, id: TaskId) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run(id).await });
    }

    async fn run(self: Arc<Self>, id: TaskId) {
        let lock = Arc::clone(self.run_locks.entry(id).or_default().value());
        let _running = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            guard = lock.lock_owned() => guard,
        };
        let _permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let Ok(task) = self.shared(id) else { return };
        let active = task.lock().status.is_active();
        if !active || self.halted(id) {
            debug!(task_id = %id, "Nothing to run");
            return;
        }

        debug!(task_id = %id, "Runner started");
        match self.execute(id, &task).await {
            Ok(RunEnd::Completed) => {}
            Ok(RunEnd::Stopped) => debug!(task_id = %id, "Runner stopped"),
            Err(failure) => self.handle_failure(id, &task, failure).await,
        }
    }

    /// True once the task was paused or cancelled.
    fn halted(&self, id: TaskId) -> bool {
        self.registry.is_cancelled(id) || self.registry.is_paused(id)
    }

    /// Move the task to `next` and apply `update`, unless it was paused,
    /// cancelled or removed. Returns false if the runner must stop.
    fn advance(
        &self,
        id: TaskId,
        task: &SharedTask,
        next: DownloadStatus,
        update: impl FnOnce(&mut DownloadTask),
    ) -> DownloadResult<bool> {
        // Never touch the task table while a task lock is held.
        if !self.tasks.contains_key(&id) {
            return Ok(false);
        }
        {
            let mut guard = task.lock();
            if self.halted(id) {
                return Ok(false);
            }
            guard.set_status(next.clone())?;
            update(&mut guard);
        }
        self.emit_status(id, next);
        Ok(true)
    }

    async fn execute(self: &Arc<Self>, id: TaskId, task: &SharedTask) -> Result<RunEnd, RunFailure> {
        let waiting = matches!(task.lock().status, DownloadStatus::Waiting);
        if waiting {
            let next = DownloadStatus::preparing(PrepareStage::Initializing, "starting");
            if !self.advance(id, task, next, |_| {})? {
                return Ok(RunEnd::Stopped);
            }
        }

        let resolved = task.lock().is_resolved();
        if !resolved {
            let next = DownloadStatus::preparing(PrepareStage::FetchingInfo, "fetching package information");
            if !self.advance(id, task, next, |_| {})? {
                return Ok(RunEnd::Stopped);
            }
            self.persist_logged(id).await;

            let groups = self.resolve(id, task).await?;
            {
                let mut guard = task.lock();
                guard.groups = groups;
                guard.refresh_totals();
            }
            self.persist_logged(id).await;
        }

        let preparing = matches!(task.lock().status, DownloadStatus::Preparing(_));
        if preparing {
            let next = DownloadStatus::preparing(PrepareStage::ValidatingSetup, "checking destination");
            if !self.advance(id, task, next, |_| {})? {
                return Ok(RunEnd::Stopped);
            }
        }
        let directory = task.lock().directory.clone();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| DownloadError::io(&directory, e))?;

        self.transfer_packages(id, task).await
    }

    /// Fetch and parse the manifest of every component, keeping the
    /// selected packages.
    async fn resolve(&self, id: TaskId, task: &SharedTask) -> DownloadResult<Vec<ComponentGroup>> {
        let (product_id, version, language, directory, requested) = {
            let guard = task.lock();
            (
                guard.product_id.clone(),
                guard.version.clone(),
                guard.language.clone(),
                guard.directory.clone(),
                guard.requested_packages.clone(),
            )
        };
        let product = self
            .catalog
            .find_product(&product_id, Some(&version))
            .ok_or_else(|| DownloadError::Catalog(format!("product {} {} not found", product_id, version)))?;

        let mut groups = Vec::new();
        for component in product.components() {
            if self.halted(id) {
                return Err(DownloadError::Cancelled);
            }
            let manifest = self.catalog.application_info(&component.build_id).await?;
            let context = SelectionContext {
                is_main_product: component.code == product.id,
                language: language.clone(),
                apple_silicon: self.config.apple_silicon,
                os_version: self.config.os_version,
            };
            let packages = select_packages(parse_application_manifest(&manifest, &context)?, &requested);
            if packages.is_empty() {
                debug!(task_id = %id, component = %component.code, "No packages selected");
                continue;
            }

            let group_dir = directory.join(&component.code);
            write_atomic(
                &group_dir,
                &group_dir.join(APPLICATION_MANIFEST_FILE),
                manifest.as_bytes(),
            )
            .await?;

            info!(
                task_id = %id,
                component = %component.code,
                packages = packages.len(),
                "Resolved component"
            );
            let mut group = ComponentGroup::new(&component.code, &component.version, &component.build_id);
            group.manifest = Some(manifest);
            group.packages = packages;
            groups.push(group);
        }

        if groups.is_empty() {
            return Err(DownloadError::InvalidData(format!(
                "no packages selected for {} {}",
                product_id, version
            )));
        }
        Ok(groups)
    }

    async fn transfer_packages(self: &Arc<Self>, id: TaskId, task: &SharedTask) -> Result<RunEnd, RunFailure> {
        let cdn = self
            .catalog
            .cdn_base()
            .unwrap_or_else(|| self.config.cdn_base.clone());
        let refs = task.lock().package_refs();
        let total_count = refs.len();

        for (index, at) in refs.into_iter().enumerate() {
            let pending = package_request(&task.lock(), at, &cdn);
            let Some((mut request, file_name)) = pending else {
                continue;
            };

            let next = DownloadStatus::Downloading(DownloadInfo {
                file_name,
                current_index: index,
                total_count,
                start_time: Utc::now(),
                eta_secs: None,
            });
            let proceed = self
                .advance(id, task, next, |t| {
                    t.current_package = Some(at);
                    if let Some(package) = t.package_mut(at) {
                        package.status = PackageStatus::Downloading;
                    }
                })
                .map_err(|error| RunFailure { at: Some(at), error })?;
            if !proceed {
                return Ok(RunEnd::Stopped);
            }
            self.persist_logged(id).await;

            request.resume = self
                .registry
                .take_resume_token(id)
                .filter(|token| token.package_id == request.package_id);
            let Some(session) = self.registry.open_session(id) else {
                return Ok(RunEnd::Stopped);
            };
            let handle = TransferHandle::new(&session, &request.package_id, &request.url, &request.destination);
            self.registry
                .register(id, handle.clone(), session, request.package_id.clone());
            if !self.tasks.contains_key(&id) {
                // Removed while the transfer was being set up.
                handle.cancel();
                self.registry.forget(id);
                return Ok(RunEnd::Stopped);
            }

            let inner = Arc::clone(self);
            let on_progress: ProgressCallback =
                Arc::new(move |progress: TransferProgress| inner.on_progress(id, at, progress));

            debug!(
                task_id = %id,
                package = %request.package_id,
                url = %request.url,
                resume = request.resume.is_some(),
                "Transferring package"
            );
            match self.coordinator.transfer(&request, &handle, &on_progress).await {
                Ok(outcome) => {
                    {
                        let mut guard = task.lock();
                        if let Some(package) = guard.package_mut(at) {
                            package.update_progress(outcome.total_size, outcome.total_size, 0.0);
                            package.mark_completed();
                        }
                        guard.current_package = None;
                        guard.resume_token = None;
                        guard.refresh_totals();
                    }
                    info!(
                        task_id = %id,
                        package = %request.package_id,
                        bytes = outcome.bytes_downloaded,
                        chunks = outcome.chunks,
                        skipped = outcome.chunks_skipped,
                        "Package downloaded"
                    );
                    self.persist_logged(id).await;
                }
                Err(e) if e.is_cancelled() => {
                    if self.registry.is_cancelled(id) {
                        self.clear_chunk_states(&[request.package_id]).await;
                    }
                    return Ok(RunEnd::Stopped);
                }
                Err(error) => return Err(RunFailure { at: Some(at), error }),
            }
        }

        self.complete(id, task).await
    }

    async fn complete(&self, id: TaskId, task: &SharedTask) -> Result<RunEnd, RunFailure> {
        let status = {
            let guard = task.lock();
            let now = Utc::now();
            DownloadStatus::Completed(CompletionInfo {
                timestamp: now,
                total_time_secs: (now - guard.created_at).num_milliseconds().max(0) as f64 / 1000.0,
                total_size: guard.total_size,
            })
        };
        let done = self.advance(id, task, status, |t| {
            t.current_package = None;
            t.resume_token = None;
            t.refresh_totals();
        })?;
        if !done {
            return Ok(RunEnd::Stopped);
        }
        self.registry.forget(id);
        info!(task_id = %id, "Task completed");
        self.persist_logged(id).await;
        Ok(RunEnd::Completed)
    }

    fn on_progress(&self, id: TaskId, at: PackageRef, progress: TransferProgress) {
        let Ok(task) = self.shared(id) else { return };
        let task_progress = {
            let mut guard = task.lock();
            if !matches!(guard.status, DownloadStatus::Downloading(_)) {
                return;
            }
            if let Some(package) = guard.package_mut(at) {
                package.update_progress(progress.downloaded, progress.total, progress.speed);
            }
            guard.refresh_totals();
            let eta = guard.eta_secs();
            if let DownloadStatus::Downloading(info) = &mut guard.status {
                info.eta_secs = eta;
            }
            guard.total_progress
        };
        self.emit(EngineEvent::Progress {
            task_id: id,
            package: progress.package_id,
            downloaded: progress.downloaded,
            total: progress.total,
            speed: progress.speed,
            task_progress,
        });
        // The writer is gone only during shutdown.
        let _ = self.checkpoints.send(id);
    }

    async fn handle_failure(self: &Arc<Self>, id: TaskId, task: &SharedTask, failure: RunFailure) {
        let RunFailure { at, error } = failure;
        if error.is_cancelled() || self.registry.is_cancelled(id) {
            return;
        }
        let classified = retry::classify_with(&error, &self.config.fatal_http_statuses);
        let (package_id, destination) = match at {
            Some(at) => {
                let guard = task.lock();
                (guard.package_identifier(at), guard.package_destination(at))
            }
            None => (None, None),
        };
        warn!(
            task_id = %id,
            package = ?package_id,
            error = %error,
            code = classified.code,
            recoverable = classified.recoverable,
            "Task failed"
        );

        // Discard the package's partial data when it cannot be trusted
        // (replan) or will never be resumed (terminal failure).
        let discard = !classified.recoverable || classified.replan;
        if classified.recoverable && !classified.replan {
            self.registry.capture_resume_token(id);
        } else {
            self.registry.take_resume_token(id);
        }
        if discard {
            if let Some(package_id) = package_id {
                self.clear_chunk_states(&[package_id]).await;
            }
            if let Some(destination) = &destination {
                match tokio::fs::remove_file(destination).await {
                    Ok(()) => debug!(path = %destination.display(), "Removed partial package"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %destination.display(), error = %e, "Failed to remove partial package"),
                }
            }
        }

        let policy = &self.config.retry_policy;
        let (status, delay) = {
            let mut guard = task.lock();
            if self.halted(id) {
                return;
            }
            let attempt = guard.retry_count + 1;
            let delay = if classified.recoverable {
                policy.delay_for_retry(attempt)
            } else {
                None
            };
            let (status, package_status) = match delay {
                Some(delay) => {
                    let next_retry_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    let status = DownloadStatus::Retrying(RetryInfo {
                        attempt,
                        max_attempts: policy.max_retries(),
                        reason: classified.message.clone(),
                        next_retry_at,
                    });
                    (status, PackageStatus::Waiting)
                }
                None => (
                    DownloadStatus::failed(
                        classified.message.clone(),
                        classified.recoverable,
                        Some(classified.code),
                    ),
                    PackageStatus::Failed(classified.message.clone()),
                ),
            };
            if let Err(e) = guard.set_status(status.clone()) {
                debug!(task_id = %id, error = %e, "Failure not recorded");
                return;
            }
            if delay.is_some() {
                guard.retry_count = attempt;
            }
            if let Some(package) = at.and_then(|at| guard.package_mut(at)) {
                if discard {
                    package.reset();
                }
                package.speed = 0.0;
                package.status = package_status;
            }
            if discard {
                guard.resume_token = None;
            }
            guard.refresh_totals();
            (status, delay)
        };

        self.emit_status(id, status);
        self.persist_logged(id).await;
        if let Some(delay) = delay {
            info!(task_id = %id, delay_ms = delay.as_millis() as u64, "Retry scheduled");
            self.schedule_retry(id, delay);
        }
    }

    /// Restart the task after `delay` if it is still waiting to retry.
    fn schedule_retry(self: &Arc<Self>, id: TaskId, delay: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let retrying = inner
                .shared(id)
                .map(|task| matches!(task.lock().status, DownloadStatus::Retrying(_)))
                .unwrap_or(false);
            if retrying && !inner.halted(id) {
                inner.spawn_runner(id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::IntegrityManifest;
    use crate::task::{ComponentGroup, Package, PackageKind};

    fn resolved_task() -> DownloadTask {
        let mut task = DownloadTask::new("PHSP", "25.0", "en_US", "Photoshop", "/dl/PHSP_25.0", "osx10");
        let mut group = ComponentGroup::new("PHSP", "25.0", "guid-1");
        let mut core = Package::new(PackageKind::Core, "Core.zip", 1000, "/PHSP/25.0/Core.zip");
        core.mark_completed();
        group.packages.push(core);
        group
            .packages
            .push(Package::new(PackageKind::NonCore, "Lang.zip", 500, "/PHSP/25.0/Lang.zip"));
        task.groups.push(group);
        task
    }

    #[test]
    fn test_resume_status_unresolved_prepares() {
        let task = DownloadTask::new("PHSP", "25.0", "en_US", "Photoshop", "/dl", "osx10");
        assert!(matches!(resume_status(&task), DownloadStatus::Preparing(_)));
    }

    #[test]
    fn test_resume_status_points_at_first_pending() {
        match resume_status(&resolved_task()) {
            DownloadStatus::Downloading(info) => {
                assert_eq!(info.file_name, "Lang.zip");
                assert_eq!(info.current_index, 1);
                assert_eq!(info.total_count, 2);
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn test_package_request_skips_downloaded() {
        let task = resolved_task();
        let first = PackageRef { group: 0, package: 0 };
        let second = PackageRef { group: 0, package: 1 };
        assert!(package_request(&task, first, "https://cdn.example.com").is_none());

        let (request, name) = package_request(&task, second, "https://cdn.example.com/").unwrap();
        assert_eq!(name, "Lang.zip");
        assert_eq!(request.url, "https://cdn.example.com/PHSP/25.0/Lang.zip");
        assert_eq!(
            request.destination,
            std::path::PathBuf::from("/dl/PHSP_25.0/PHSP/Lang.zip")
        );
        assert_eq!(request.expected_size, 500);
        assert!(request.manifest.is_none());
        assert!(request.resume.is_none());
    }

    #[test]
    fn test_package_request_carries_integrity() {
        let mut task = resolved_task();
        let at = PackageRef { group: 0, package: 1 };
        task.package_mut(at).unwrap().integrity = Some(IntegrityManifest {
            segment_size: 250,
            last_segment_size: 250,
            segments: Vec::new(),
        });
        let (request, _) = package_request(&task, at, "https://cdn").unwrap();
        assert_eq!(request.manifest.unwrap().segment_size, 250);
    }
}
