//! Concurrency-bounded work queue.
//!
//! Runs tasks with at most `limit` in flight, accepts tasks produced while the
//! run is going (retries), and finishes only once nothing is pending and
//! nothing is in flight.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::config::FailurePolicy;

/// How a single task resolved, from the queue's point of view.
#[derive(Debug)]
pub(crate) enum TaskOutcome<T, E> {
    /// Finished; nothing more to run.
    Done,
    /// Hand `task` back to the queue once `delay` has passed.
    Requeue {
        /// The follow-up task.
        task: T,
        /// Wait before it becomes runnable. Does not hold a slot.
        delay: Duration,
    },
    /// Terminal failure.
    Failed(E),
}

/// Drains tasks through a semaphore-bounded [`JoinSet`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConcurrencyQueue {
    limit: Option<usize>,
    failure_policy: FailurePolicy,
}

/// Entries tracked by the join set: real work, or a retry waiting out its delay.
enum Slot<T, E> {
    Ran(TaskOutcome<T, E>),
    Delayed(T),
}

impl ConcurrencyQueue {
    pub(crate) fn new(limit: Option<usize>, failure_policy: FailurePolicy) -> Self {
        Self {
            limit,
            failure_policy,
        }
    }

    /// Runs `initial` and every requeued follow-up through `run`.
    ///
    /// Returns the first terminal failure, if any. Under
    /// [`FailurePolicy::Drain`] the other tasks still run to completion;
    /// under [`FailurePolicy::Abort`] they are cancelled and nothing further
    /// is started.
    ///
    /// # Errors
    ///
    /// The first `E` produced by a task, or converted from a panicked task.
    pub(crate) async fn drain<T, E, F, Fut>(&self, initial: Vec<T>, run: F) -> Result<(), E>
    where
        T: Send + 'static,
        E: From<JoinError> + Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = TaskOutcome<T, E>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(
            self.limit.unwrap_or(Semaphore::MAX_PERMITS),
        ));
        let mut pending: VecDeque<T> = initial.into();
        let mut running: JoinSet<Slot<T, E>> = JoinSet::new();
        let mut first_error: Option<E> = None;

        loop {
            if first_error.is_none() || self.failure_policy == FailurePolicy::Drain {
                while let Some(task) = pending.pop_front() {
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        pending.push_front(task);
                        break;
                    };
                    let work = run(task);
                    running.spawn(async move {
                        let _permit = permit;
                        Slot::Ran(work.await)
                    });
                }
            }

            let Some(joined) = running.join_next().await else {
                break;
            };

            let outcome = match joined {
                Ok(Slot::Delayed(task)) => {
                    pending.push_back(task);
                    continue;
                }
                Ok(Slot::Ran(outcome)) => outcome,
                Err(join_error) if join_error.is_cancelled() => continue,
                Err(join_error) => {
                    warn!(error = %join_error, "fetch task panicked");
                    TaskOutcome::Failed(E::from(join_error))
                }
            };

            match outcome {
                TaskOutcome::Done => {}
                TaskOutcome::Requeue { task, delay } if delay.is_zero() => pending.push_back(task),
                TaskOutcome::Requeue { task, delay } => {
                    running.spawn(async move {
                        tokio::time::sleep(delay).await;
                        Slot::Delayed(task)
                    });
                }
                TaskOutcome::Failed(error) => {
                    if first_error.is_some() {
                        continue;
                    }
                    first_error = Some(error);
                    if self.failure_policy == FailurePolicy::Abort {
                        debug!(
                            in_flight = running.len(),
                            pending = pending.len(),
                            "aborting remaining tasks"
                        );
                        pending.clear();
                        running.abort_all();
                    }
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Task(u32),
        Panicked,
    }

    impl From<JoinError> for TestError {
        fn from(_: JoinError) -> Self {
            Self::Panicked
        }
    }

    #[derive(Debug, Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_drain_respects_limit() {
        let gauge = Arc::new(Gauge::default());
        let queue = ConcurrencyQueue::new(Some(3), FailurePolicy::Drain);

        let result: Result<(), TestError> = queue
            .drain((0..12).collect(), |_: u32| {
                let gauge = Arc::clone(&gauge);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    gauge.leave();
                    TaskOutcome::Done
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(gauge.started.load(Ordering::SeqCst), 12);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_unbounded_runs_everything_at_once() {
        let gauge = Arc::new(Gauge::default());
        let queue = ConcurrencyQueue::new(None, FailurePolicy::Drain);

        let result: Result<(), TestError> = queue
            .drain((0..8).collect(), |_: u32| {
                let gauge = Arc::clone(&gauge);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    gauge.leave();
                    TaskOutcome::Done
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_requeued_tasks_run_before_completion() {
        let runs = Arc::new(AtomicUsize::new(0));
        let queue = ConcurrencyQueue::new(Some(1), FailurePolicy::Drain);

        // Each task requeues itself until it reaches 3.
        let result: Result<(), TestError> = queue
            .drain(vec![0_u32, 10], |n: u32| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    if n % 10 < 3 {
                        TaskOutcome::Requeue {
                            task: n + 1,
                            delay: Duration::ZERO,
                        }
                    } else {
                        TaskOutcome::Done
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_delayed_requeue_is_honoured() {
        let queue = ConcurrencyQueue::new(Some(1), FailurePolicy::Drain);
        let started = tokio::time::Instant::now();

        let result: Result<(), TestError> = queue
            .drain(vec![0_u32], |n: u32| async move {
                if n == 0 {
                    TaskOutcome::Requeue {
                        task: 1,
                        delay: Duration::from_millis(60),
                    }
                } else {
                    TaskOutcome::Done
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_drain_policy_reports_first_failure_and_finishes_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let queue = ConcurrencyQueue::new(None, FailurePolicy::Drain);

        let result = queue
            .drain(vec![1_u32, 2, 3], |n: u32| {
                let finished = Arc::clone(&finished);
                async move {
                    if n == 1 {
                        return TaskOutcome::Failed(TestError::Task(n));
                    }
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    TaskOutcome::Done
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Task(1)));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abort_policy_cancels_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let queue = ConcurrencyQueue::new(Some(2), FailurePolicy::Abort);

        let result = queue
            .drain(vec![1_u32, 2, 3, 4], |n: u32| {
                let finished = Arc::clone(&finished);
                async move {
                    if n == 1 {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        return TaskOutcome::Failed(TestError::Task(n));
                    }
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    TaskOutcome::Done
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Task(1)));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_becomes_error() {
        let queue = ConcurrencyQueue::new(None, FailurePolicy::Drain);

        let result = queue
            .drain(vec![1_u32], |_: u32| async move {
                if true {
                    panic!("boom");
                }
                TaskOutcome::<u32, TestError>::Done
            })
            .await;

        assert_eq!(result, Err(TestError::Panicked));
    }

    #[tokio::test]
    async fn test_empty_input_completes_immediately() {
        let queue = ConcurrencyQueue::new(Some(1), FailurePolicy::Drain);
        let result: Result<(), TestError> = queue
            .drain(Vec::<u32>::new(), |_| async { TaskOutcome::Done })
            .await;
        assert!(result.is_ok());
    }
}
