//! Explicit per-artifact lifecycle state.
//!
//! The filesystem stays the source of truth for *what* exists; the tracker
//! records *what is happening* to it so that concurrent requests for the
//! same missing artifact serialise instead of racing two renders into the
//! same directory.
//!
//! ```text
//! NotStarted ──► InProgress ──► Done(path)
//!                     │
//!                     └──────► Failed(reason) ──(next client request)──► InProgress
//! ```
//!
//! Each `(JobId, ArtifactRole)` key owns its own async lock. Whoever holds
//! the lock is the single producer for that key; other requests wait on it
//! and then observe the outcome. Nothing here retries on its own.

use crate::naming::ArtifactRole;
use crate::workspace::JobId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lifecycle of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArtifactState {
    #[default]
    NotStarted,
    InProgress,
    Done(PathBuf),
    Failed(String),
}

impl ArtifactState {
    pub fn is_done(&self) -> bool {
        matches!(self, ArtifactState::Done(_))
    }
}

type Key = (JobId, ArtifactRole);
type Slot = Arc<AsyncMutex<ArtifactState>>;

/// Shared registry of artifact states. Cheap to clone.
#[derive(Clone, Default)]
pub struct StateTracker {
    slots: Arc<Mutex<HashMap<Key, Slot>>>,
}

impl std::fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTracker")
            .field("entries", &self.len())
            .finish()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, job: &JobId, role: ArtifactRole) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry((job.clone(), role))
            .or_insert_with(|| Arc::new(AsyncMutex::new(ArtifactState::NotStarted)))
            .clone()
    }

    /// Take the producer lock for an artifact, waiting for any current holder.
    ///
    /// The guard derefs to the state; set it before dropping the guard.
    pub async fn acquire(&self, job: &JobId, role: ArtifactRole) -> OwnedMutexGuard<ArtifactState> {
        self.slot(job, role).lock_owned().await
    }

    /// Snapshot of the current state. A held lock reads as `InProgress`.
    pub fn get(&self, job: &JobId, role: ArtifactRole) -> ArtifactState {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.get(&(job.clone(), role)) {
                Some(slot) => slot.clone(),
                None => return ArtifactState::NotStarted,
            }
        };
        let state = match slot.try_lock() {
            Ok(state) => state.clone(),
            Err(_) => ArtifactState::InProgress,
        };
        state
    }

    /// Overwrite the state, waiting for any producer to finish first.
    pub async fn set(&self, job: &JobId, role: ArtifactRole, state: ArtifactState) {
        *self.acquire(job, role).await = state;
    }

    /// Drop one entry. Holders of its lock keep a detached slot.
    pub fn forget(&self, job: &JobId, role: ArtifactRole) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(&(job.clone(), role)).is_some()
    }

    /// Drop every entry of a removed job.
    pub fn forget_job(&self, job_id: &str) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|(job, _), _| job.as_str() != job_id);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn default_state_is_not_started() {
        let tracker = StateTracker::new();
        let job = JobId::generate();
        assert_eq!(tracker.get(&job, ArtifactRole::Preview(1)), ArtifactState::NotStarted);
    }

    #[tokio::test]
    async fn held_lock_reads_as_in_progress() {
        let tracker = StateTracker::new();
        let job = JobId::generate();
        let guard = tracker.acquire(&job, ArtifactRole::Preview(2)).await;
        assert_eq!(tracker.get(&job, ArtifactRole::Preview(2)), ArtifactState::InProgress);
        drop(guard);
        assert_eq!(tracker.get(&job, ArtifactRole::Preview(2)), ArtifactState::NotStarted);
    }

    #[tokio::test]
    async fn concurrent_producers_serialise() {
        let tracker = StateTracker::new();
        let job = JobId::generate();
        let renders = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            let job = job.clone();
            let renders = renders.clone();
            handles.push(tokio::spawn(async move {
                let mut state = tracker.acquire(&job, ArtifactRole::Preview(4)).await;
                if !state.is_done() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    renders.fetch_add(1, Ordering::SeqCst);
                    *state = ArtifactState::Done(PathBuf::from("page-4.png"));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert!(tracker.get(&job, ArtifactRole::Preview(4)).is_done());
    }

    #[tokio::test]
    async fn forget_job_removes_only_that_job() {
        let tracker = StateTracker::new();
        let a = JobId::generate();
        let b = JobId::generate();
        tracker.set(&a, ArtifactRole::Preview(1), ArtifactState::InProgress).await;
        tracker.set(&a, ArtifactRole::Preview(2), ArtifactState::Failed("x".into())).await;
        tracker.set(&b, ArtifactRole::Preview(1), ArtifactState::NotStarted).await;

        assert_eq!(tracker.forget_job(a.as_str()), 2);
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn forget_removes_a_single_entry() {
        let tracker = StateTracker::new();
        let job = JobId::generate();
        tracker.set(&job, ArtifactRole::Preview(1), ArtifactState::Failed("x".into())).await;
        tracker.set(&job, ArtifactRole::Preview(2), ArtifactState::InProgress).await;

        assert!(tracker.forget(&job, ArtifactRole::Preview(1)));
        assert!(!tracker.forget(&job, ArtifactRole::Preview(1)));
        assert_eq!(tracker.get(&job, ArtifactRole::Preview(1)), ArtifactState::NotStarted);
        assert_eq!(tracker.len(), 1);
    }
}
