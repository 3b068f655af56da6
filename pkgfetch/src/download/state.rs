//! Persisted chunk plans for interrupted transfers.
//!
//! Each package being transferred has one `.chunkstate` JSON file under the
//! store directory holding its chunk plan and per-chunk progress. A state is
//! only reused when its fingerprint (package identifier, destination, total
//! size, chunking parameter and chunk boundaries) matches a fresh plan.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::chunk::DownloadChunk;
use super::error::{DownloadError, DownloadResult};
use crate::task::naming::chunk_state_file_name;

/// Durable snapshot of one package's chunk plan and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedTransferState {
    pub package_id: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub destination: PathBuf,
    pub chunks: Vec<DownloadChunk>,
    pub total_downloaded: u64,
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ChunkedTransferState {
    pub fn new(
        package_id: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        destination: impl Into<PathBuf>,
        chunks: Vec<DownloadChunk>,
    ) -> Self {
        let mut state = Self {
            package_id: package_id.into(),
            total_size,
            chunk_size,
            destination: destination.into(),
            chunks,
            total_downloaded: 0,
            is_completed: false,
            etag: None,
            updated_at: Utc::now(),
        };
        state.refresh();
        state
    }

    /// Recompute derived counters from the chunk list.
    pub fn refresh(&mut self) {
        self.total_downloaded = self.chunks.iter().map(|c| c.downloaded_size).sum();
        self.is_completed = self.chunks.iter().all(|c| c.is_completed);
        self.updated_at = Utc::now();
    }

    /// True if this state was recorded for the same object and plan.
    pub fn matches(
        &self,
        package_id: &str,
        total_size: u64,
        destination: &Path,
        chunk_size: u64,
        planned: &[DownloadChunk],
    ) -> bool {
        self.package_id == package_id
            && self.total_size == total_size
            && self.destination == destination
            && self.chunk_size == chunk_size
            && self.chunks.len() == planned.len()
            && self
                .chunks
                .iter()
                .zip(planned)
                .all(|(saved, fresh)| saved.same_range(fresh))
    }

    /// Chunks restored for a new run. Paused flags are cleared so every
    /// unfinished chunk is eligible again.
    pub fn into_resumable_chunks(self) -> Vec<DownloadChunk> {
        self.chunks
            .into_iter()
            .map(|mut chunk| {
                chunk.is_paused = false;
                chunk
            })
            .collect()
    }
}

/// Directory-backed store of [`ChunkedTransferState`] files.
///
/// All writes and removals are serialized through one lock.
#[derive(Debug)]
pub struct ChunkStateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ChunkStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for `package_id`.
    pub fn path_for(&self, package_id: &str) -> PathBuf {
        self.dir.join(chunk_state_file_name(package_id))
    }

    /// Write `state`, replacing any previous snapshot.
    pub async fn save(&self, state: &ChunkedTransferState) -> DownloadResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let path = self.path_for(&state.package_id);
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.dir, &path, &json).await?;
        debug!(package = %state.package_id, downloaded = state.total_downloaded, "Saved chunk state");
        Ok(())
    }

    /// Load the state for `package_id`.
    ///
    /// A missing file yields `None`. An unreadable or corrupt file is removed
    /// and also yields `None`; the package is then planned from scratch.
    pub async fn load(&self, package_id: &str) -> DownloadResult<Option<ChunkedTransferState>> {
        let path = self.path_for(package_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DownloadError::io(&path, e)),
        };

        match serde_json::from_slice::<ChunkedTransferState>(&data) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding corrupt chunk state");
                self.clear(package_id).await?;
                Ok(None)
            }
        }
    }

    /// Remove the state for `package_id`, if any.
    pub async fn clear(&self, package_id: &str) -> DownloadResult<()> {
        let path = self.path_for(package_id);
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(package = %package_id, "Cleared chunk state");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::io(&path, e)),
        }
    }
}

/// Write `data` to `path` through a temporary sibling and a rename, so a
/// crash never leaves a half-written file behind.
pub(crate) async fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> DownloadResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::io(dir, e))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| DownloadError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| DownloadError::io(path, e))
}
