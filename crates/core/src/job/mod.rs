//! Composable, cancellable units of asynchronous work.
//!
//! A [`Job`] is a deferred computation: building one does nothing until it is
//! handed to a [`JobsRunner`]. Jobs compose by sequencing
//! ([`Job::then_run`], [`Job::then_apply`], [`Job::then_accept`],
//! [`Job::then_compose`]) and by parallel aggregation ([`Job::all_of`] and
//! its fixed-arity forms).
//!
//! Every body receives a [`RunnerStatus`] to poll for cooperative
//! cancellation. Only leaf bodies occupy a worker slot, so composition never
//! deadlocks the pool.
//!
//! A job moves `Pending -> Running -> Succeeded | Failed | Cancelled`.
//! Cancelled is only reached when the runner flag is seen before a
//! [`Job::supply`] or [`Job::run`] body starts; continuations always run and
//! decide for themselves.

mod runner;
mod status;

pub use runner::{Canceller, JobsRunner, RunnerHandle};
pub use status::{JobError, RunnerStatus};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;

type Body<T> = Box<dyn FnOnce(RunnerStatus) -> BoxFuture<'static, Result<T, JobError>> + Send>;

/// A deferred computation producing a `T`.
#[must_use = "a job does nothing until launched on a JobsRunner"]
pub struct Job<T> {
    body: Body<T>,
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

impl Job<()> {
    /// A stage with no result value.
    pub fn run<F, Fut>(body: F) -> Job<()>
    where
        F: FnOnce(RunnerStatus) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Job::supply(body)
    }

    /// A stage that does nothing.
    pub fn no_op() -> Job<()> {
        Job::from_body(|_| async { Ok(()) }.boxed())
    }
}

impl<T: Send + 'static> Job<Option<T>> {
    /// A stage yielding `None`, for conditional branches that may be skipped.
    pub fn no_op_supplier() -> Job<Option<T>> {
        Job::from_body(|_| async { Ok(None) }.boxed())
    }
}

impl<T: Send + 'static> Job<T> {
    fn from_body<F>(body: F) -> Self
    where
        F: FnOnce(RunnerStatus) -> BoxFuture<'static, Result<T, JobError>> + Send + 'static,
    {
        Self {
            body: Box::new(body),
        }
    }

    pub(crate) fn execute(self, status: RunnerStatus) -> BoxFuture<'static, Result<T, JobError>> {
        (self.body)(status)
    }

    /// A stage producing a value.
    pub fn supply<F, Fut>(body: F) -> Job<T>
    where
        F: FnOnce(RunnerStatus) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Job::from_body(move |status| {
            async move {
                if status.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                run_body(status, body, Start::UnlessCancelled).await
            }
            .boxed()
        })
    }

    /// Run `next` after this job succeeds, discarding this job's value.
    pub fn then_run<U: Send + 'static>(self, next: Job<U>) -> Job<U> {
        Job::from_body(move |status| {
            async move {
                self.execute(status.clone()).await?;
                next.execute(status).await
            }
            .boxed()
        })
    }

    /// Transform this job's value.
    pub fn then_apply<U, F, Fut>(self, f: F) -> Job<U>
    where
        U: Send + 'static,
        F: FnOnce(RunnerStatus, T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        Job::from_body(move |status| {
            async move {
                let value = self.execute(status.clone()).await?;
                run_body(status, move |status| f(status, value), Start::Always).await
            }
            .boxed()
        })
    }

    /// Consume this job's value.
    pub fn then_accept<F, Fut>(self, f: F) -> Job<()>
    where
        F: FnOnce(RunnerStatus, T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.then_apply(f)
    }

    /// Continue with a job built from this job's value.
    pub fn then_compose<U, F>(self, f: F) -> Job<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Job<U> + Send + 'static,
    {
        Job::from_body(move |status| {
            async move {
                let value = self.execute(status.clone()).await?;
                f(value).execute(status).await
            }
            .boxed()
        })
    }

    /// Yield `fallback()` instead of failing when this job is cancelled.
    ///
    /// Lets a parallel branch that never started leave its siblings' results
    /// usable. Other failures pass through.
    pub fn on_cancel<F>(self, fallback: F) -> Job<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Job::from_body(move |status| {
            async move {
                match self.execute(status).await {
                    Err(JobError::Cancelled) => Ok(fallback()),
                    other => other,
                }
            }
            .boxed()
        })
    }

    /// Run every job concurrently and collect their values in order.
    ///
    /// Waits for all of them even when some fail. The aggregate fails with
    /// the first failure observed; every other failure goes to the runner's
    /// error callback.
    pub fn all_of(jobs: Vec<Job<T>>) -> Job<Vec<T>> {
        Job::from_body(move |status| {
            async move {
                let order = Arc::new(AtomicUsize::new(0));
                let children: Vec<_> = jobs
                    .into_iter()
                    .map(|job| spawn_child(job, &status, &order))
                    .collect();

                let mut values = Vec::with_capacity(children.len());
                let mut failures = Vec::new();
                for child in children {
                    if let Some(value) = collect(join_child(child).await, &mut failures) {
                        values.push(value);
                    }
                }
                if failures.is_empty() {
                    Ok(values)
                } else {
                    Err(first_failure(&status, failures))
                }
            }
            .boxed()
        })
    }

    /// Run two jobs concurrently. Same failure rules as [`Job::all_of`].
    pub fn all_of2<U: Send + 'static>(first: Job<T>, second: Job<U>) -> Job<(T, U)> {
        Job::from_body(move |status| {
            async move {
                let order = Arc::new(AtomicUsize::new(0));
                let a = spawn_child(first, &status, &order);
                let b = spawn_child(second, &status, &order);

                let mut failures = Vec::new();
                let a = collect(join_child(a).await, &mut failures);
                let b = collect(join_child(b).await, &mut failures);
                match (a, b) {
                    (Some(a), Some(b)) => Ok((a, b)),
                    _ => Err(first_failure(&status, failures)),
                }
            }
            .boxed()
        })
    }

    /// Run three jobs concurrently. Same failure rules as [`Job::all_of`].
    pub fn all_of3<U, V>(first: Job<T>, second: Job<U>, third: Job<V>) -> Job<(T, U, V)>
    where
        U: Send + 'static,
        V: Send + 'static,
    {
        Job::from_body(move |status| {
            async move {
                let order = Arc::new(AtomicUsize::new(0));
                let a = spawn_child(first, &status, &order);
                let b = spawn_child(second, &status, &order);
                let c = spawn_child(third, &status, &order);

                let mut failures = Vec::new();
                let a = collect(join_child(a).await, &mut failures);
                let b = collect(join_child(b).await, &mut failures);
                let c = collect(join_child(c).await, &mut failures);
                match (a, b, c) {
                    (Some(a), Some(b), Some(c)) => Ok((a, b, c)),
                    _ => Err(first_failure(&status, failures)),
                }
            }
            .boxed()
        })
    }
}

/// Whether a body still starts when cancellation arrives while it waits
/// for its worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    /// Leaf stages: cancelled once the slot is granted.
    UnlessCancelled,
    /// Continuations: they check the status themselves.
    Always,
}

/// Run one body on a worker slot, turning errors and panics into [`JobError`].
async fn run_body<T, F, Fut>(status: RunnerStatus, body: F, start: Start) -> Result<T, JobError>
where
    F: FnOnce(RunnerStatus) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let _worker = status.worker().await;
    if start == Start::UnlessCancelled && status.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    AssertUnwindSafe(async move { body(status).await })
        .catch_unwind()
        .await
        .map_err(JobError::from_panic)?
        .map_err(JobError::Failed)
}

/// A failed child of an aggregate, with its completion rank.
struct Failure {
    rank: usize,
    error: JobError,
}

fn spawn_child<T: Send + 'static>(
    job: Job<T>,
    status: &RunnerStatus,
    order: &Arc<AtomicUsize>,
) -> JoinHandle<Result<T, Failure>> {
    let status = status.clone();
    let order = Arc::clone(order);
    tokio::spawn(async move {
        job.execute(status).await.map_err(|error| Failure {
            rank: order.fetch_add(1, Ordering::SeqCst),
            error,
        })
    })
}

async fn join_child<T>(child: JoinHandle<Result<T, Failure>>) -> Result<T, Failure> {
    match child.await {
        Ok(result) => result,
        Err(e) => Err(Failure {
            rank: usize::MAX,
            error: JobError::Panicked(e.to_string()),
        }),
    }
}

fn collect<T>(result: Result<T, Failure>, failures: &mut Vec<Failure>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(failure) => {
            failures.push(failure);
            None
        }
    }
}

/// Pick the earliest real failure (cancellation only if nothing else
/// failed) and report the rest.
fn first_failure(status: &RunnerStatus, mut failures: Vec<Failure>) -> JobError {
    failures.sort_by_key(|f| f.rank);
    let first = failures
        .iter()
        .position(|f| !f.error.is_cancelled())
        .unwrap_or(0);
    if first >= failures.len() {
        return JobError::Failed(anyhow::anyhow!("aggregate job finished without a result"));
    }
    let chosen = failures.remove(first);
    for other in &failures {
        status.report(&other.error);
    }
    chosen.error
}
