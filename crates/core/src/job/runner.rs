//! Bounded runner for job graphs.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::status::{JobError, RunnerStatus};
use super::Job;

/// Launches job graphs on the tokio runtime.
///
/// At most `max_workers` job bodies of one launch run at the same time.
#[derive(Debug, Clone)]
pub struct JobsRunner {
    max_workers: usize,
}

impl JobsRunner {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Start every root job concurrently and return a handle to the launch.
    ///
    /// `on_error` runs once for every failure anywhere in the graphs,
    /// cancellations excluded. Must be called inside a tokio runtime.
    pub fn launch_async<T, I, E>(&self, jobs: I, on_error: E) -> RunnerHandle<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Job<T>>,
        E: Fn(&JobError) + Send + Sync + 'static,
    {
        let status = RunnerStatus::new(self.max_workers, Arc::new(on_error));
        let roots: Vec<JoinHandle<Result<T, JobError>>> = jobs
            .into_iter()
            .map(|job| tokio::spawn(job.execute(status.clone())))
            .collect();

        debug!(roots = roots.len(), max_workers = self.max_workers, "Launching jobs");

        let driver_status = status.clone();
        let task = tokio::spawn(async move {
            let mut results = Vec::with_capacity(roots.len());
            for root in roots {
                let result = root
                    .await
                    .unwrap_or_else(|e| Err(JobError::Panicked(e.to_string())));
                if let Err(error) = &result {
                    driver_status.report(error);
                }
                results.push(result);
            }
            let failed = results.iter().filter(|r| r.is_err()).count();
            debug!(total = results.len(), failed, "Jobs completed");
            results
        });

        RunnerHandle { status, task }
    }
}

/// Cancels a launch from anywhere, e.g. a signal handler.
#[derive(Debug, Clone)]
pub struct Canceller {
    status: RunnerStatus,
}

impl Canceller {
    pub fn cancel(&self) {
        if self.status.cancel() {
            info!("Cancellation requested");
        }
    }
}

/// Handle to one launch of a [`JobsRunner`].
#[derive(Debug)]
pub struct RunnerHandle<T> {
    status: RunnerStatus,
    task: JoinHandle<Vec<Result<T, JobError>>>,
}

impl<T: Send + 'static> RunnerHandle<T> {
    /// Read-only view shared with the running jobs.
    pub fn status(&self) -> RunnerStatus {
        self.status.clone()
    }

    /// Request cooperative cancellation. In-flight work runs to completion.
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            status: self.status.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for every root job; results are in launch order.
    pub async fn wait_for_completion(self) -> Vec<Result<T, JobError>> {
        match self.task.await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Job runner task failed");
                Vec::new()
            }
        }
    }

    /// Call `callback` with the results once every root job is done.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Vec<Result<T, JobError>>) + Send + 'static,
    {
        tokio::spawn(async move {
            callback(self.wait_for_completion().await);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_bound_is_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<Job<()>> = (0..8)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                Job::run(move |_| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        let results = JobsRunner::new(2)
            .launch_async(vec![Job::all_of(jobs)], |_| {})
            .wait_for_completion()
            .await;

        assert!(results[0].is_ok());
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_independent_roots_do_not_cancel_each_other() {
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reported);

        let results = JobsRunner::new(2)
            .launch_async(
                vec![
                    Job::supply(|_| async { Err(anyhow!("first form failed")) }),
                    Job::supply(|_| async { Ok("second form") }),
                ],
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )
            .wait_for_completion()
            .await;

        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap(), &"second form");
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_complete_receives_results() {
        let (tx, rx) = oneshot::channel();
        JobsRunner::new(1)
            .launch_async(vec![Job::supply(|_| async { Ok(3) })], |_| {})
            .on_complete(move |results| {
                let _ = tx.send(results.into_iter().map(|r| r.ok()).collect::<Vec<_>>());
            });

        assert_eq!(rx.await.unwrap(), vec![Some(3)]);
    }

    #[tokio::test]
    async fn test_canceller_outlives_handle_use() {
        let handle = JobsRunner::new(1).launch_async(
            vec![Job::supply(|status| async move {
                status.cancelled().await;
                Ok(status.is_cancelled())
            })],
            |_| {},
        );
        let canceller = handle.canceller();
        assert!(handle.status().is_still_running());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let results = handle.wait_for_completion().await;
        assert!(*results[0].as_ref().unwrap());
    }

    #[tokio::test]
    async fn test_root_waiting_for_worker_is_cancelled() {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let second_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&second_ran);

        let handle = JobsRunner::new(1).launch_async(
            vec![
                Job::run(move |_| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok(())
                }),
                Job::run(move |_| async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }),
            ],
            |_| {},
        );

        started_rx.await.unwrap();
        handle.cancel();
        release_tx.send(()).unwrap();
        let results = handle.wait_for_completion().await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(JobError::Cancelled)));
        assert!(!second_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(JobsRunner::new(0).max_workers(), 1);
    }
}
