//! Registry of in-flight generation jobs.
//!
//! Every job gets a task id and a [`CancelHandle`]. Revoking a job is a
//! lookup by task id; the job itself polls its handle at its checkpoints.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::GenerationError;

/// Cancellation flag shared between a job and whoever may revoke it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    task_id: Arc<str>,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: Arc::from(task_id),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Task id of the job this handle belongs to.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Asks the job to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the job was revoked.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns early from a job that was revoked.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Cancelled`] once [`cancel`](Self::cancel)
    /// has been called.
    pub fn checkpoint(&self) -> Result<(), GenerationError> {
        if self.is_cancelled() {
            return Err(GenerationError::Cancelled {
                task_id: self.task_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Maps task ids to the cancellation handles of running jobs.
///
/// Cloning yields another view of the same registry.
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    jobs: Arc<Mutex<BTreeMap<String, CancelHandle>>>,
}

impl JobQueue {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, CancelHandle>> {
        // The map stays consistent even if a holder panicked.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new job under a fresh task id.
    #[must_use]
    pub fn register(&self) -> CancelHandle {
        let task_id = uuid::Uuid::new_v4().to_string();
        let handle = CancelHandle::new(&task_id);
        self.lock().insert(task_id, handle.clone());
        handle
    }

    /// Revokes the job registered under `task_id`.
    ///
    /// Returns `false` when no such job is running in this process.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.lock().get(task_id).is_some_and(|handle| {
            handle.cancel();
            true
        })
    }

    /// Forgets a job once it has stopped.
    pub fn finish(&self, task_id: &str) {
        self.lock().remove(task_id);
    }

    /// Whether a job is registered under `task_id`.
    #[must_use]
    pub fn is_running(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Task ids of every registered job.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
