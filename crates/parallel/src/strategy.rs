//! Parallel processing strategies

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How independent tasks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Single-threaded processing, tasks run in index order
    #[default]
    Sequential,
    /// Parallel processing using all available cores
    Parallel,
    /// Parallel with specified number of threads
    ParallelWith(usize),
}

impl ProcessingMode {
    pub fn is_parallel(&self) -> bool {
        !matches!(self, ProcessingMode::Sequential)
    }
}

/// A dedicated thread pool could not be built
#[derive(Debug, Error)]
#[error("cannot build a pool of {threads} thread(s): {reason}")]
pub struct PoolError {
    pub threads: usize,
    pub reason: String,
}

/// Strategy for executing indexed tasks
pub trait ParallelStrategy {
    /// Run `f` for every index in `0..count` and collect the results in index
    /// order. Stops scheduling new tasks after the first failure and returns
    /// that failure.
    fn try_map<T, E, F>(&self, count: usize, f: F) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send + From<PoolError>,
        F: Fn(usize) -> Result<T, E> + Sync + Send;
}

impl ParallelStrategy for ProcessingMode {
    fn try_map<T, E, F>(&self, count: usize, f: F) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send + From<PoolError>,
        F: Fn(usize) -> Result<T, E> + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => (0..count).map(f).collect(),
            #[cfg(feature = "parallel")]
            ProcessingMode::Parallel => (0..count).into_par_iter().map(f).collect(),
            #[cfg(feature = "parallel")]
            ProcessingMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(*threads)
                    .build()
                    .map_err(|e| PoolError {
                        threads: *threads,
                        reason: e.to_string(),
                    })?;
                pool.install(|| (0..count).into_par_iter().map(f).collect())
            }
            #[cfg(not(feature = "parallel"))]
            ProcessingMode::Parallel | ProcessingMode::ParallelWith(_) => {
                tracing::warn!("built without the `parallel` feature, running sequentially");
                (0..count).map(f).collect()
            }
        }
    }
}

/// Number of threads a `Parallel` run uses
pub fn available_threads() -> usize {
    #[cfg(feature = "parallel")]
    {
        rayon::current_num_threads()
    }
    #[cfg(not(feature = "parallel"))]
    {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum TaskError {
        Failed(usize),
        Pool,
    }

    impl From<PoolError> for TaskError {
        fn from(_: PoolError) -> Self {
            TaskError::Pool
        }
    }

    #[test]
    fn test_results_in_index_order() {
        for mode in [
            ProcessingMode::Sequential,
            ProcessingMode::Parallel,
            ProcessingMode::ParallelWith(3),
        ] {
            let out: Result<Vec<usize>, TaskError> = mode.try_map(50, |i| Ok(i * i));
            assert_eq!(out.unwrap(), (0..50).map(|i| i * i).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_sequential_stops_at_first_failure() {
        let calls = AtomicUsize::new(0);
        let out: Result<Vec<usize>, TaskError> = ProcessingMode::Sequential.try_map(10, |i| {
            calls.fetch_add(1, Ordering::SeqCst);
            if i == 3 {
                Err(TaskError::Failed(i))
            } else {
                Ok(i)
            }
        });
        assert_eq!(out.unwrap_err(), TaskError::Failed(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_parallel_reports_failure() {
        let out: Result<Vec<usize>, TaskError> =
            ProcessingMode::Parallel.try_map(100, |i| if i % 7 == 6 { Err(TaskError::Failed(i)) } else { Ok(i) });
        assert!(matches!(out, Err(TaskError::Failed(i)) if i % 7 == 6));
    }

    #[test]
    fn test_default_is_sequential() {
        assert_eq!(ProcessingMode::default(), ProcessingMode::Sequential);
        assert!(!ProcessingMode::default().is_parallel());
    }
}
