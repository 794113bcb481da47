//! Bounded worker pool for per-chunk work.
//!
//! Tasks `0..n` run on a dedicated rayon pool of `workers` threads. Results
//! come back in task-index order regardless of completion order. The first
//! task to fail trips a shared abort flag: tasks that have not started yet
//! are skipped, tasks already running finish, and the pool reports that
//! first failure instead of any results.

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error};

/// The failure that stopped a pool run.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("could not start a pool of {workers} workers")]
    Build {
        workers: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
    #[error("task {index} failed")]
    Task {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Fixed-size pool running indexed tasks with fail-fast semantics.
#[derive(Clone, Copy, Debug)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// A pool of `workers` threads; zero is treated as one.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task(i)` for every `i` in `0..n` and return the results in index order.
    ///
    /// # Errors
    /// Returns [`PoolError::Task`] carrying the first failure observed, or
    /// [`PoolError::Build`] if the threads cannot be spawned.
    pub fn run<T, F>(&self, n: usize, task: F) -> Result<Vec<T>, PoolError>
    where
        T: Send,
        F: Fn(usize) -> anyhow::Result<T> + Sync,
    {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("chunk-worker-{i}"))
            .build()
            .map_err(|source| PoolError::Build {
                workers: self.workers,
                source,
            })?;

        let aborted = AtomicBool::new(false);
        let first_failure: Mutex<Option<(usize, anyhow::Error)>> = Mutex::new(None);

        let slots: Vec<Option<T>> = pool.install(|| {
            (0..n)
                .into_par_iter()
                .with_max_len(1)
                .map(|index| {
                    if aborted.load(Ordering::Acquire) {
                        debug!(task = index, "skipped after earlier failure");
                        return None;
                    }
                    match task(index) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            error!(task = index, error = %format!("{e:#}"), "task failed");
                            aborted.store(true, Ordering::Release);
                            let mut slot =
                                first_failure.lock().unwrap_or_else(PoisonError::into_inner);
                            if slot.is_none() {
                                *slot = Some((index, e));
                            }
                            None
                        }
                    }
                })
                .collect()
        });

        let failure = first_failure
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((index, source)) = failure {
            return Err(PoolError::Task { index, source });
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| PoolError::Task {
                    index,
                    source: anyhow::anyhow!("task produced no result"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn results_follow_task_order() {
        let out = WorkerPool::new(4).run(50, |i| Ok(i * 10)).unwrap();
        assert_eq!(out, (0..50).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn single_worker_stops_after_first_failure() {
        let calls = AtomicUsize::new(0);
        let err = WorkerPool::new(1)
            .run(10, |i| {
                calls.fetch_add(1, Ordering::SeqCst);
                if i == 0 {
                    bail!("boom");
                }
                Ok(i)
            })
            .unwrap_err();
        assert!(matches!(err, PoolError::Task { index: 0, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_tasks_is_empty() {
        let out: Vec<u8> = WorkerPool::new(4).run(0, |_| Ok(1)).unwrap();
        assert!(out.is_empty());
    }
}
