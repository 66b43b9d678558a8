//! Runner state shared by every job of one launch.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Why a job produced no value.
#[derive(Debug, Error)]
pub enum JobError {
    /// The runner was cancelled before the job started.
    #[error("Job cancelled")]
    Cancelled,

    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked(message)
    }
}

pub(crate) type ErrorCallback = Arc<dyn Fn(&JobError) + Send + Sync>;

struct Shared {
    cancelled: AtomicBool,
    cancel_notify: Notify,
    workers: Arc<Semaphore>,
    on_error: ErrorCallback,
}

/// Read-only view of the runner, handed to every job body.
///
/// Long loops check [`RunnerStatus::is_still_running`] between items; a
/// request already in flight is never interrupted.
#[derive(Clone)]
pub struct RunnerStatus {
    shared: Arc<Shared>,
}

impl fmt::Debug for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerStatus")
            .field("cancelled", &self.is_cancelled())
            .field("idle_workers", &self.shared.workers.available_permits())
            .finish()
    }
}

impl RunnerStatus {
    pub(crate) fn new(max_workers: usize, on_error: ErrorCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                workers: Arc::new(Semaphore::new(max_workers.max(1))),
                on_error,
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_still_running(&self) -> bool {
        !self.is_cancelled()
    }

    /// Wait until the runner is cancelled. Returns immediately if it already is.
    pub async fn cancelled(&self) {
        let notified = self.shared.cancel_notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Flip the cancellation flag. Returns false if it was already set.
    pub(crate) fn cancel(&self) -> bool {
        let first = !self.shared.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.shared.cancel_notify.notify_waiters();
        }
        first
    }

    /// Worker slot for one job body. `None` only if the pool was closed.
    pub(crate) async fn worker(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.shared.workers).acquire_owned().await.ok()
    }

    /// Hand a failure to the runner's error callback. Cancellation is not a
    /// failure and is never reported.
    pub(crate) fn report(&self, error: &JobError) {
        if !error.is_cancelled() {
            (self.shared.on_error)(error);
        }
    }
}
