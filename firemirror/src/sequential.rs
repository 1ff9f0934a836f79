//! Sequential execution of deferred async operations.
//!
//! Both walkers queue their work as a list of [`Task`]s and hand it to
//! [`run_sequential`], which starts each task only after the previous one has
//! resolved. Nothing runs concurrently, so parent directories always exist before
//! their children are written, and log output reads as a depth-first trace.
//!
use futures::{FutureExt, future::BoxFuture};

/// A deferred operation: nothing happens until the driver calls it.
pub type Task<'a, T, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Wraps an async closure as a [`Task`].
pub fn task<'a, T, E, F, Fut>(operation: F) -> Task<'a, T, E>
where
    F: FnOnce() -> Fut + Send + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    Box::new(move || operation().boxed())
}

/// What the driver does after a task fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ExecutionPolicy {
    /// Stop at the first failure; remaining tasks are never started.
    #[default]
    FailFast,
    /// Run every task and collect each outcome.
    ContinueOnError,
}

/// Outcomes of a sequential run, in submission order.
#[derive(Debug)]
pub struct SequentialOutcome<T, E> {
    /// One entry per task that was started.
    pub outcomes: Vec<Result<T, E>>,
    /// Number of tasks never started because an earlier task failed.
    pub skipped: usize,
}

impl<T, E> SequentialOutcome<T, E> {
    /// Number of tasks that were started.
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_success(&self) -> bool {
        self.skipped == 0 && self.outcomes.iter().all(Result::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &E> {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().err())
    }

    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().ok())
    }

    /// All results, or the first error.
    pub fn into_result(self) -> Result<Vec<T>, E> {
        self.outcomes.into_iter().collect()
    }
}

/// Runs `tasks` one at a time, in order.
///
/// Task `n + 1` is not called until the future returned by task `n` has
/// resolved. With [`ExecutionPolicy::FailFast`] the run stops after the first
/// error; with [`ExecutionPolicy::ContinueOnError`] every task is attempted.
pub async fn run_sequential<T, E>(
    tasks: Vec<Task<'_, T, E>>,
    policy: ExecutionPolicy,
) -> SequentialOutcome<T, E> {
    let total = tasks.len();
    let mut outcomes = Vec::with_capacity(total);
    for task in tasks {
        let outcome = task().await;
        let failed = outcome.is_err();
        outcomes.push(outcome);
        if failed && policy == ExecutionPolicy::FailFast {
            break;
        }
    }
    let skipped = total - outcomes.len();
    SequentialOutcome { outcomes, skipped }
}
