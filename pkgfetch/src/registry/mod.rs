//! Cancellation and pause registry.
//!
//! The registry maps task ids to their live transfer handle, the session that
//! owns it, and the package being transferred. It also tracks which tasks are
//! cancelled or paused and holds at most one resume token per task.
//!
//! # Semantics
//!
//! ```text
//!   register ──► running ──pause──► suspended ──resume──► (caller restarts)
//!                  │                    │
//!                  └──────cancel────────┴──► cancelled (session invalidated,
//!                                             bookkeeping dropped, final)
//! ```
//!
//! All state lives behind one mutex. No lock is held across an await point,
//! so every operation is a short critical section and concurrent pause and
//! cancel calls on the same task are applied one after the other.

mod handle;

pub use handle::{HandleState, ResumeToken, TransferHandle, TransferSession};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::task::TaskId;

/// Default interval between garbage-collection sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(30);

/// Counts of live handles, grouped by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveCounts {
    pub total: usize,
    pub running: usize,
    pub suspended: usize,
}

#[derive(Debug)]
struct Entry {
    handle: TransferHandle,
    package_id: String,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<TaskId, Entry>,
    sessions: HashMap<TaskId, TransferSession>,
    cancelled: HashSet<TaskId>,
    paused: HashSet<TaskId>,
    resume_tokens: HashMap<TaskId, ResumeToken>,
}

/// Registry of live transfers. See the module docs.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    inner: Mutex<Inner>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for `task_id`, created on first use.
    ///
    /// Returns `None` once the task has been cancelled.
    pub fn open_session(&self, task_id: TaskId) -> Option<TransferSession> {
        let mut inner = self.inner.lock();
        if inner.cancelled.contains(&task_id) {
            return None;
        }
        let session = inner
            .sessions
            .entry(task_id)
            .or_insert_with(TransferSession::new);
        if session.is_invalidated() {
            *session = TransferSession::new();
        }
        Some(session.clone())
    }

    /// Record a new live transfer for `task_id`, replacing any previous one.
    ///
    /// Registering a cancelled task aborts the handle immediately.
    pub fn register(
        &self,
        task_id: TaskId,
        handle: TransferHandle,
        session: TransferSession,
        package_id: impl Into<String>,
    ) {
        let mut inner = self.inner.lock();
        if inner.cancelled.contains(&task_id) {
            handle.cancel();
            session.invalidate();
            return;
        }
        if inner.paused.contains(&task_id) {
            handle.suspend();
        }
        inner.sessions.insert(task_id, session);
        inner.entries.insert(
            task_id,
            Entry {
                handle,
                package_id: package_id.into(),
            },
        );
    }

    /// Cancel `task_id`: abort its transfer, invalidate its session and drop
    /// all bookkeeping. Irreversible.
    pub fn cancel(&self, task_id: TaskId) {
        let mut inner = self.inner.lock();
        inner.cancelled.insert(task_id);
        inner.paused.remove(&task_id);
        inner.resume_tokens.remove(&task_id);
        if let Some(entry) = inner.entries.remove(&task_id) {
            entry.handle.cancel();
        }
        if let Some(session) = inner.sessions.remove(&task_id) {
            session.invalidate();
        }
        info!(task_id = %task_id, "Task cancelled");
    }

    /// Pause `task_id`, aborting its transfer but keeping the session and
    /// bookkeeping. Returns false if the task was already cancelled.
    pub fn pause(&self, task_id: TaskId) -> bool {
        self.pause_inner(task_id, false).0
    }

    /// Pause `task_id` and capture a resume token from its live handle.
    ///
    /// The token replaces any token stored for the task and is also returned.
    pub fn pause_with_resume_token(&self, task_id: TaskId) -> Option<ResumeToken> {
        self.pause_inner(task_id, true).1
    }

    fn pause_inner(&self, task_id: TaskId, produce_token: bool) -> (bool, Option<ResumeToken>) {
        let mut inner = self.inner.lock();
        if inner.cancelled.contains(&task_id) {
            return (false, None);
        }
        inner.paused.insert(task_id);

        let mut token = None;
        if let Some(entry) = inner.entries.get(&task_id) {
            entry.handle.suspend();
            if produce_token && entry.handle.has_received_first_byte() {
                token = Some(entry.handle.resume_token());
            }
        }
        if let Some(token) = &token {
            inner.resume_tokens.insert(task_id, token.clone());
        }
        debug!(task_id = %task_id, token = token.is_some(), "Task paused");
        (true, token)
    }

    /// Clear the paused flag. Restarting the transfer is up to the caller.
    pub fn resume(&self, task_id: TaskId) {
        self.inner.lock().paused.remove(&task_id);
    }

    pub fn is_cancelled(&self, task_id: TaskId) -> bool {
        self.inner.lock().cancelled.contains(&task_id)
    }

    pub fn is_paused(&self, task_id: TaskId) -> bool {
        self.inner.lock().paused.contains(&task_id)
    }

    /// Package currently registered for `task_id`.
    pub fn package_for(&self, task_id: TaskId) -> Option<String> {
        self.inner
            .lock()
            .entries
            .get(&task_id)
            .map(|e| e.package_id.clone())
    }

    /// Counts of registered handles by state.
    pub fn active_counts(&self) -> ActiveCounts {
        let inner = self.inner.lock();
        let mut counts = ActiveCounts {
            total: inner.entries.len(),
            ..Default::default()
        };
        for entry in inner.entries.values() {
            match entry.handle.state() {
                HandleState::Running => counts.running += 1,
                HandleState::Suspended => counts.suspended += 1,
                HandleState::Completed | HandleState::Cancelled => {}
            }
        }
        counts
    }

    /// Capture a resume token from the live handle of `task_id` without
    /// pausing it. Used when a transfer failed and will be retried.
    pub fn capture_resume_token(&self, task_id: TaskId) -> Option<ResumeToken> {
        let mut inner = self.inner.lock();
        let token = inner
            .entries
            .get(&task_id)
            .filter(|e| e.handle.has_received_first_byte())
            .map(|e| e.handle.resume_token())?;
        inner.resume_tokens.insert(task_id, token.clone());
        Some(token)
    }

    /// Store a resume token, e.g. one restored from a persisted task.
    pub fn store_resume_token(&self, task_id: TaskId, token: ResumeToken) {
        let mut inner = self.inner.lock();
        if !inner.cancelled.contains(&task_id) {
            inner.resume_tokens.insert(task_id, token);
        }
    }

    /// Take the resume token of `task_id`. A token is handed out only once.
    pub fn take_resume_token(&self, task_id: TaskId) -> Option<ResumeToken> {
        self.inner.lock().resume_tokens.remove(&task_id)
    }

    /// Copy of the stored resume token, leaving it in place.
    pub fn peek_resume_token(&self, task_id: TaskId) -> Option<ResumeToken> {
        self.inner.lock().resume_tokens.get(&task_id).cloned()
    }

    /// Drop everything known about `task_id`, including the cancelled flag.
    pub fn forget(&self, task_id: TaskId) {
        let mut inner = self.inner.lock();
        inner.cancelled.remove(&task_id);
        inner.paused.remove(&task_id);
        inner.resume_tokens.remove(&task_id);
        inner.entries.remove(&task_id);
        inner.sessions.remove(&task_id);
    }

    /// Remove bookkeeping for handles in a terminal state.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let finished: Vec<TaskId> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.handle.state().is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            inner.entries.remove(id);
        }
        finished.len()
    }

    /// Spawn a periodic [`sweep`](Self::sweep) until `shutdown` is cancelled.
    pub fn spawn_gc(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            debug!(removed, "Swept finished transfer handles");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn live(registry: &CancelRegistry, task_id: TaskId) -> (TransferHandle, TransferSession) {
        let session = registry.open_session(task_id).unwrap();
        let handle = TransferHandle::new(&session, "Pkg_1_Core.zip", "http://cdn/a", "/tmp/a");
        registry.register(task_id, handle.clone(), session.clone(), "Pkg_1_Core.zip");
        (handle, session)
    }

    #[test]
    fn test_register_and_counts() {
        let registry = CancelRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        live(&registry, a);
        live(&registry, b);

        registry.pause(b);
        assert_eq!(
            registry.active_counts(),
            ActiveCounts {
                total: 2,
                running: 1,
                suspended: 1
            }
        );
        assert_eq!(registry.package_for(a).as_deref(), Some("Pkg_1_Core.zip"));
    }

    #[test]
    fn test_cancel_is_irreversible() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let (handle, session) = live(&registry, id);
        registry.pause(id);

        registry.cancel(id);
        assert!(registry.is_cancelled(id));
        assert!(!registry.is_paused(id));
        assert!(handle.token().is_cancelled());
        assert!(session.is_invalidated());
        assert_eq!(registry.active_counts().total, 0);

        // Pausing or opening a session after cancellation does nothing.
        assert!(!registry.pause(id));
        assert!(!registry.is_paused(id));
        assert!(registry.open_session(id).is_none());
    }

    #[test]
    fn test_pause_keeps_session_and_bookkeeping() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let (handle, session) = live(&registry, id);

        assert!(registry.pause(id));
        assert!(registry.is_paused(id));
        assert!(handle.token().is_cancelled());
        assert!(!session.is_invalidated());
        assert_eq!(registry.package_for(id).as_deref(), Some("Pkg_1_Core.zip"));

        registry.resume(id);
        assert!(!registry.is_paused(id));

        // The same session is handed out for the next attempt.
        let next = registry.open_session(id).unwrap();
        next.invalidate();
        assert!(session.is_invalidated());
    }

    #[test]
    fn test_resume_token_consumed_once() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let (handle, _) = live(&registry, id);
        handle.record_position(3, 4096, 4096);

        let token = registry.pause_with_resume_token(id).unwrap();
        assert_eq!(token.chunk_index, 3);
        assert_eq!(registry.peek_resume_token(id), Some(token.clone()));
        assert_eq!(registry.take_resume_token(id), Some(token));
        assert_eq!(registry.take_resume_token(id), None);
    }

    #[test]
    fn test_no_token_before_first_byte() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        live(&registry, id);
        assert!(registry.pause_with_resume_token(id).is_none());
        assert!(registry.is_paused(id));
    }

    #[test]
    fn test_one_token_per_task() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let (handle, _) = live(&registry, id);
        handle.record_position(0, 10, 10);
        registry.capture_resume_token(id);
        handle.record_position(1, 5, 5);
        registry.capture_resume_token(id);

        assert_eq!(registry.take_resume_token(id).unwrap().chunk_index, 1);
        assert!(registry.take_resume_token(id).is_none());
    }

    #[test]
    fn test_register_after_cancel_aborts_handle() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        registry.cancel(id);

        let session = TransferSession::new();
        let handle = TransferHandle::new(&session, "p", "http://cdn/a", "/tmp/a");
        registry.register(id, handle.clone(), session, "p");
        assert!(handle.token().is_cancelled());
        assert_eq!(registry.active_counts().total, 0);
    }

    #[test]
    fn test_register_while_paused_suspends() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        registry.pause(id);
        let (handle, _) = live(&registry, id);
        assert!(handle.token().is_cancelled());
        assert_eq!(handle.state(), HandleState::Suspended);
    }

    #[test]
    fn test_sweep_removes_terminal_handles() {
        let registry = CancelRegistry::new();
        let done = Uuid::new_v4();
        let running = Uuid::new_v4();
        let (handle, _) = live(&registry, done);
        live(&registry, running);
        handle.finish();

        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.active_counts().total, 1);
        assert!(registry.package_for(done).is_none());
    }

    #[test]
    fn test_forget_clears_cancelled_flag() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        registry.cancel(id);
        registry.forget(id);
        assert!(!registry.is_cancelled(id));
        assert!(registry.open_session(id).is_some());
    }

    #[test]
    fn test_concurrent_pause_and_cancel() {
        let registry = Arc::new(CancelRegistry::new());
        let id = Uuid::new_v4();
        live(&registry, id);

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        registry.pause(id);
                    } else {
                        registry.cancel(id);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(registry.is_cancelled(id));
        assert!(!registry.is_paused(id));
        assert_eq!(registry.active_counts().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_loop_sweeps_and_stops() {
        let registry = Arc::new(CancelRegistry::new());
        let id = Uuid::new_v4();
        let (handle, _) = live(&registry, id);
        handle.finish();

        let shutdown = CancellationToken::new();
        let gc = registry.spawn_gc(Duration::from_secs(5), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.active_counts().total, 0);

        shutdown.cancel();
        gc.await.unwrap();
    }
}
