//! Transfer coordinator: one package, end to end.
//!
//! The coordinator probes the remote object, plans its chunks, restores any
//! matching persisted chunk state and then runs the remaining chunks one at a
//! time in index order through the [`RangeExecutor`]. The chunk state is
//! checkpointed after every chunk and whenever the transfer stops early, so
//! at most one chunk is ever partially written.
//!
//! Failures are returned as-is. Whether to try again is decided by the
//! caller (see [`crate::retry`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::OpenOptions;
use tracing::{debug, info, warn};

use super::checksum;
use super::chunk::{plan_chunks, DownloadChunk, IntegrityManifest, PlanOptions};
use super::error::{DownloadError, DownloadResult};
use super::http::{file_len, ChunkFetch, RangeExecutor};
use super::progress::{
    ChunkTick, ProgressCallback, ProgressThrottle, SpeedTracker, TransferProgress,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_SPEED_SAMPLE_INTERVAL,
};
use super::state::{ChunkStateStore, ChunkedTransferState};
use crate::registry::{ResumeToken, TransferHandle};

/// Everything needed to transfer one package.
#[derive(Debug, Clone)]
pub struct PackageRequest {
    /// Stable package identifier; keys the persisted chunk state.
    pub package_id: String,
    pub url: String,
    pub destination: PathBuf,
    /// Size from the catalog, used when the server does not report one.
    pub expected_size: u64,
    pub manifest: Option<IntegrityManifest>,
    /// Continuation of an earlier aborted attempt.
    pub resume: Option<ResumeToken>,
}

/// Summary of a finished package transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageOutcome {
    pub total_size: u64,
    /// Bytes received from the network in this run.
    pub bytes_downloaded: u64,
    pub chunks: usize,
    /// Chunks that were already complete when this run started.
    pub chunks_skipped: usize,
}

/// Runs package transfers. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct TransferCoordinator {
    executor: RangeExecutor,
    states: Arc<ChunkStateStore>,
    plan: PlanOptions,
    speed_interval: Duration,
    progress_interval: Duration,
}

impl TransferCoordinator {
    pub fn new(executor: RangeExecutor, states: Arc<ChunkStateStore>, plan: PlanOptions) -> Self {
        Self {
            executor,
            states,
            plan,
            speed_interval: DEFAULT_SPEED_SAMPLE_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the minimum intervals between speed samples and progress events.
    pub fn with_intervals(mut self, speed_interval: Duration, progress_interval: Duration) -> Self {
        self.speed_interval = speed_interval;
        self.progress_interval = progress_interval;
        self
    }

    pub fn states(&self) -> &Arc<ChunkStateStore> {
        &self.states
    }

    /// Transfer one package into `request.destination`.
    ///
    /// Stops with [`DownloadError::Cancelled`] as soon as the handle's token
    /// is cancelled, leaving the chunk state on disk for the next attempt.
    pub async fn transfer(
        &self,
        request: &PackageRequest,
        handle: &TransferHandle,
        on_progress: &ProgressCallback,
    ) -> DownloadResult<PackageOutcome> {
        let abort = handle.token();
        if abort.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let remote = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(DownloadError::Cancelled),
            probed = self.executor.probe(&request.url) => probed?,
        };
        let total_size = if remote.total_size > 0 {
            if request.expected_size > 0 && remote.total_size != request.expected_size {
                debug!(
                    package = %request.package_id,
                    expected = request.expected_size,
                    reported = remote.total_size,
                    "Server size differs from catalog size"
                );
            }
            remote.total_size
        } else {
            request
                .manifest
                .as_ref()
                .map_or(request.expected_size, IntegrityManifest::total_size)
        };

        let mut chunks = plan_chunks(
            total_size,
            request.manifest.as_ref(),
            remote.supports_ranges,
            &self.plan,
        )?;
        let fingerprint = self.plan.fingerprint(request.manifest.as_ref());

        match self.states.load(&request.package_id).await? {
            Some(saved)
                if saved.matches(
                    &request.package_id,
                    total_size,
                    &request.destination,
                    fingerprint,
                    &chunks,
                ) =>
            {
                debug!(
                    package = %request.package_id,
                    downloaded = saved.total_downloaded,
                    "Resuming from saved chunk state"
                );
                chunks = saved.into_resumable_chunks();
            }
            Some(_) => {
                info!(package = %request.package_id, "Saved chunk state is stale, replanning");
                self.states.clear(&request.package_id).await?;
            }
            None => {}
        }

        if let Some(token) = &request.resume {
            apply_resume_token(token, request, &mut chunks);
        }
        let reset = revalidate_on_disk(&request.destination, &mut chunks).await?;
        if reset > 0 {
            info!(
                package = %request.package_id,
                chunks = reset,
                "Restored chunks missing from disk, refetching"
            );
        }

        let mut state = ChunkedTransferState::new(
            request.package_id.clone(),
            total_size,
            fingerprint,
            request.destination.clone(),
            chunks,
        );
        state.etag = remote.etag;
        self.states.save(&state).await?;

        let chunks_skipped = state.chunks.iter().filter(|c| c.is_completed).count();
        info!(
            package = %request.package_id,
            total_size,
            chunks = state.chunks.len(),
            skipped = chunks_skipped,
            "Starting package transfer"
        );

        let mut reported = state.total_downloaded;
        let mut speed = SpeedTracker::new(self.speed_interval, reported);
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        throttle.ready();
        on_progress(TransferProgress {
            package_id: request.package_id.clone(),
            downloaded: reported,
            total: total_size,
            speed: 0.0,
        });

        let mut bytes_downloaded = 0u64;
        for index in 0..state.chunks.len() {
            if state.chunks[index].is_completed {
                continue;
            }

            let mut chunk = state.chunks[index].clone();
            let others = state.total_downloaded - chunk.downloaded_size;
            let result = {
                let mut on_tick = |tick: ChunkTick| {
                    handle.record_position(tick.index, tick.chunk_downloaded, tick.delta);
                    reported = reported.max(others + tick.chunk_downloaded);
                    if throttle.ready() {
                        on_progress(TransferProgress {
                            package_id: request.package_id.clone(),
                            downloaded: reported,
                            total: total_size,
                            speed: speed.sample(reported),
                        });
                    }
                };
                self.executor
                    .fetch_chunk(&request.url, &request.destination, &mut chunk, abort, &mut on_tick)
                    .await
            };

            state.chunks[index] = chunk;
            state.refresh();

            match result {
                Ok(fetched) => {
                    if let ChunkFetch::Downloaded { bytes } = fetched {
                        bytes_downloaded += bytes;
                    }
                    debug!(package = %request.package_id, chunk = index, ?fetched, "Chunk complete");
                    self.states.save(&state).await?;
                }
                Err(e) => {
                    if let Err(save_err) = self.states.save(&state).await {
                        warn!(package = %request.package_id, error = %save_err, "Failed to checkpoint chunk state");
                    }
                    if e.is_cancelled() {
                        debug!(package = %request.package_id, chunk = index, "Transfer stopped");
                    } else {
                        warn!(package = %request.package_id, chunk = index, error = %e, "Chunk failed");
                    }
                    return Err(e);
                }
            }
        }

        finalize_file(&request.destination, total_size).await?;
        if let Some(manifest) = &request.manifest {
            checksum::verify_file_async(request.destination.clone(), state.chunks.clone(), manifest.clone())
                .await?;
            debug!(package = %request.package_id, "Verified all segments");
        }

        self.states.clear(&request.package_id).await?;
        handle.finish();
        on_progress(TransferProgress {
            package_id: request.package_id.clone(),
            downloaded: total_size,
            total: total_size,
            speed: 0.0,
        });

        info!(
            package = %request.package_id,
            bytes = bytes_downloaded,
            "Package transfer complete"
        );
        Ok(PackageOutcome {
            total_size,
            bytes_downloaded,
            chunks: state.chunks.len(),
            chunks_skipped,
        })
    }
}

/// Carry the in-flight chunk position of an aborted attempt over to a fresh
/// plan. Tokens for another package or destination are ignored.
fn apply_resume_token(token: &ResumeToken, request: &PackageRequest, chunks: &mut [DownloadChunk]) {
    if token.package_id != request.package_id || token.destination != request.destination {
        debug!(package = %request.package_id, "Ignoring resume token for another transfer");
        return;
    }
    let Some(chunk) = chunks.get_mut(token.chunk_index) else {
        return;
    };
    if !chunk.is_completed && token.chunk_downloaded > chunk.downloaded_size {
        chunk.downloaded_size = token.chunk_downloaded.min(chunk.size);
        debug!(
            package = %request.package_id,
            chunk = chunk.index,
            offset = chunk.downloaded_size,
            "Applied resume token"
        );
    }
}

/// Check restored chunk progress against the destination file.
///
/// A completed chunk stays completed only if the file covers its whole range
/// and, when it has a hash, the bytes match. Partial progress is clamped to
/// what the file actually holds. Returns the number of completed chunks that
/// were reset.
async fn revalidate_on_disk(destination: &Path, chunks: &mut [DownloadChunk]) -> DownloadResult<usize> {
    if chunks.iter().all(|c| !c.is_completed && c.downloaded_size == 0) {
        return Ok(0);
    }
    let on_disk = file_len(destination).await?;
    let mut reset = 0;
    for chunk in chunks.iter_mut() {
        if chunk.is_completed {
            let intact = on_disk > chunk.end_offset
                && checksum::chunk_matches_async(destination.to_path_buf(), chunk.clone())
                    .await?
                    .unwrap_or(true);
            if !intact {
                debug!(chunk = chunk.index, on_disk, "Completed chunk not intact on disk");
                chunk.reset();
                reset += 1;
            }
        } else {
            let present = on_disk.saturating_sub(chunk.start_offset).min(chunk.size);
            chunk.downloaded_size = chunk.downloaded_size.min(present);
        }
    }
    Ok(reset)
}

/// Make sure the finished file exists and is exactly `total_size` bytes.
async fn finalize_file(path: &Path, total_size: u64) -> DownloadResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| DownloadError::io(path, e))?
        .len();
    if len < total_size {
        return Err(DownloadError::SizeMismatch {
            path: path.to_path_buf(),
            expected: total_size,
            actual: len,
        });
    }
    if len > total_size {
        // Leftovers of an older, larger object at the same path.
        file.set_len(total_size)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TransferSession;
    use chrono::Utc;
    use tempfile::TempDir;

    fn request(dir: &Path) -> PackageRequest {
        PackageRequest {
            package_id: "Pkg_1_Core.zip".into(),
            url: "http://127.0.0.1:9/Core.zip".into(),
            destination: dir.join("Core.zip"),
            expected_size: 300,
            manifest: None,
            resume: None,
        }
    }

    fn plan() -> Vec<DownloadChunk> {
        let options = PlanOptions {
            chunk_size: 100,
            threshold: 100,
        };
        plan_chunks(300, None, true, &options).unwrap()
    }

    fn token(request: &PackageRequest, chunk_index: usize, chunk_downloaded: u64) -> ResumeToken {
        ResumeToken {
            package_id: request.package_id.clone(),
            url: request.url.clone(),
            destination: request.destination.clone(),
            chunk_index,
            chunk_downloaded,
            bytes_received: chunk_downloaded,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resume_token_advances_chunk() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path());
        let mut chunks = plan();
        apply_resume_token(&token(&request, 1, 40), &request, &mut chunks);
        assert_eq!(chunks[1].downloaded_size, 40);
        assert_eq!(chunks[0].downloaded_size, 0);
    }

    #[test]
    fn test_resume_token_never_moves_backwards() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path());
        let mut chunks = plan();
        chunks[1].downloaded_size = 70;
        apply_resume_token(&token(&request, 1, 40), &request, &mut chunks);
        assert_eq!(chunks[1].downloaded_size, 70);

        apply_resume_token(&token(&request, 2, 500), &request, &mut chunks);
        assert_eq!(chunks[2].downloaded_size, 100, "clamped to chunk size");
    }

    #[test]
    fn test_resume_token_for_other_package_ignored() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path());
        let mut other = token(&request, 1, 40);
        other.package_id = "Pkg_2_Other.zip".into();
        let mut chunks = plan();
        apply_resume_token(&other, &request, &mut chunks);
        assert_eq!(chunks[1].downloaded_size, 0);
    }

    #[tokio::test]
    async fn test_revalidate_resets_chunks_beyond_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Core.zip");
        std::fs::write(&path, vec![7u8; 150]).unwrap();

        let mut chunks = plan();
        chunks[0].mark_completed();
        chunks[1].mark_completed();
        chunks[2].downloaded_size = 60;

        let reset = revalidate_on_disk(&path, &mut chunks).await.unwrap();
        assert_eq!(reset, 1);
        assert!(chunks[0].is_completed);
        assert!(!chunks[1].is_completed);
        assert_eq!(chunks[1].downloaded_size, 0);
        assert_eq!(chunks[2].downloaded_size, 0, "clamped to the bytes on disk");
    }

    #[tokio::test]
    async fn test_revalidate_missing_file_resets_everything() {
        let dir = TempDir::new().unwrap();
        let mut chunks = plan();
        chunks[0].mark_completed();
        chunks[1].mark_completed();
        chunks[2].downloaded_size = 30;

        let reset = revalidate_on_disk(&dir.path().join("gone.zip"), &mut chunks)
            .await
            .unwrap();
        assert_eq!(reset, 2);
        assert!(chunks.iter().all(|c| !c.is_completed && c.downloaded_size == 0));
    }

    #[tokio::test]
    async fn test_revalidate_checks_hashes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Core.zip");
        let data: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let mut good = DownloadChunk::new(0, 0, 99, Some(checksum::sha256_hex(&data[..100])));
        good.mark_completed();
        let mut bad = DownloadChunk::new(1, 100, 199, Some(checksum::sha256_hex(b"other bytes")));
        bad.mark_completed();
        let mut chunks = vec![good, bad];

        let reset = revalidate_on_disk(&path, &mut chunks).await.unwrap();
        assert_eq!(reset, 1);
        assert!(chunks[0].is_completed);
        assert!(!chunks[1].is_completed);
    }

    #[tokio::test]
    async fn test_finalize_truncates_and_rejects_short_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("a.bin");

        finalize_file(&path, 0).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        std::fs::write(&path, vec![1u8; 50]).unwrap();
        finalize_file(&path, 20).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 20);

        let err = finalize_file(&path, 30).await.unwrap_err();
        assert!(matches!(err, DownloadError::SizeMismatch { expected: 30, actual: 20, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_handle_stops_before_probe() {
        let dir = TempDir::new().unwrap();
        let states = Arc::new(ChunkStateStore::new(dir.path().join("chunkStates")));
        let coordinator = TransferCoordinator::new(RangeExecutor::new().unwrap(), states, PlanOptions::default());

        let session = TransferSession::new();
        let req = request(dir.path());
        let handle = TransferHandle::new(&session, &req.package_id, &req.url, &req.destination);
        session.invalidate();

        let callback: ProgressCallback = Arc::new(|_| {});
        let err = coordinator.transfer(&req, &handle, &callback).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
