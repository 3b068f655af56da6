//! Live transfer handles, sessions and resume tokens.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// State of a live transfer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    Running = 0,
    /// Aborted by a pause; bookkeeping is kept.
    Suspended = 1,
    Completed = 2,
    Cancelled = 3,
}

impl HandleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Suspended,
            2 => Self::Completed,
            _ => Self::Cancelled,
        }
    }

    /// Completed and cancelled handles are swept by garbage collection.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Owner of every transfer started for one task.
///
/// Invalidating the session aborts all handles created from it; a session
/// cannot be revived.
#[derive(Debug, Clone, Default)]
pub struct TransferSession {
    token: CancellationToken,
}

impl TransferSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.token.cancel();
    }

    pub fn is_invalidated(&self) -> bool {
        self.token.is_cancelled()
    }

    fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Continuation data for a transfer that was aborted mid-chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeToken {
    pub package_id: String,
    pub url: String,
    pub destination: PathBuf,
    /// Chunk that was in flight.
    pub chunk_index: usize,
    /// Bytes of that chunk already written.
    pub chunk_downloaded: u64,
    /// Bytes received by the aborted transfer in total.
    pub bytes_received: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct HandleInner {
    token: CancellationToken,
    state: AtomicU8,
    first_byte: AtomicBool,
    package_id: String,
    url: String,
    destination: PathBuf,
    chunk_index: AtomicUsize,
    chunk_downloaded: AtomicU64,
    bytes_received: AtomicU64,
}

/// Handle to one in-flight package transfer.
///
/// Clones share state. The transfer watches [`TransferHandle::token`]; the
/// registry aborts it by cancelling that token.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    inner: Arc<HandleInner>,
}

impl TransferHandle {
    pub fn new(
        session: &TransferSession,
        package_id: impl Into<String>,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                token: session.child_token(),
                state: AtomicU8::new(HandleState::Running as u8),
                first_byte: AtomicBool::new(false),
                package_id: package_id.into(),
                url: url.into(),
                destination: destination.into(),
                chunk_index: AtomicUsize::new(0),
                chunk_downloaded: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
            }),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn package_id(&self) -> &str {
        &self.inner.package_id
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn has_received_first_byte(&self) -> bool {
        self.inner.first_byte.load(Ordering::Acquire)
    }

    /// Record the position of the transfer after a write.
    pub fn record_position(&self, chunk_index: usize, chunk_downloaded: u64, delta: u64) {
        self.inner.chunk_index.store(chunk_index, Ordering::Release);
        self.inner.chunk_downloaded.store(chunk_downloaded, Ordering::Release);
        if delta > 0 {
            self.inner.bytes_received.fetch_add(delta, Ordering::AcqRel);
            self.inner.first_byte.store(true, Ordering::Release);
        }
    }

    /// Abort the transfer, keeping it resumable.
    pub(crate) fn suspend(&self) {
        self.set_state_unless_terminal(HandleState::Suspended);
        self.inner.token.cancel();
    }

    /// Abort the transfer for good.
    pub(crate) fn cancel(&self) {
        self.inner
            .state
            .store(HandleState::Cancelled as u8, Ordering::Release);
        self.inner.token.cancel();
    }

    /// Mark the transfer as finished successfully.
    pub fn finish(&self) {
        self.set_state_unless_terminal(HandleState::Completed);
    }

    /// Snapshot the current position as a resume token.
    pub fn resume_token(&self) -> ResumeToken {
        ResumeToken {
            package_id: self.inner.package_id.clone(),
            url: self.inner.url.clone(),
            destination: self.inner.destination.clone(),
            chunk_index: self.inner.chunk_index.load(Ordering::Acquire),
            chunk_downloaded: self.inner.chunk_downloaded.load(Ordering::Acquire),
            bytes_received: self.inner.bytes_received.load(Ordering::Acquire),
            created_at: Utc::now(),
        }
    }

    fn set_state_unless_terminal(&self, next: HandleState) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!HandleState::from_u8(current).is_terminal()).then_some(next as u8)
            });
    }
}
