//! Bounded worker pool and shared progress counters
//!
//! Units of work run concurrently on the tokio runtime, at most `workers` at a time. There is no
//! ordering guarantee across units.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Progress counters updated from concurrent workers
#[derive(Debug, Default)]
pub struct WorkCounters {
    processed: AtomicU64,
    submitted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WorkSummary {
    pub processed: u64,
    pub submitted: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl WorkCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self, count: u64) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> WorkSummary {
        WorkSummary {
            processed: self.processed.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(workers.max(1))) }
    }

    /// Run `work` over every item and collect the outputs in completion order
    ///
    /// A panicking unit is logged and contributes no output.
    pub async fn run_all<I, F, Fut, T>(&self, items: I, work: F) -> Vec<T>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = JoinSet::new();

        for item in items {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!("Worker pool closed: {}", e);
                    break;
                },
            };
            let unit = work(item);
            tasks.spawn(async move {
                let _permit = permit;
                unit.await
            });
        }

        let mut outputs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(e) => tracing::error!("Worker task failed: {}", e),
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));

        let outputs = pool
            .run_all(0..8u64, |i| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i * 2
                }
            })
            .await;

        let mut outputs = outputs;
        outputs.sort();
        assert_eq!(outputs, vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_counters_from_many_workers() {
        let counters = Arc::new(WorkCounters::new());
        WorkerPool::new(4)
            .run_all(0..100, |_| {
                let counters = counters.clone();
                async move {
                    counters.processed();
                    counters.skipped(2);
                }
            })
            .await;

        let summary = counters.summary();
        assert_eq!(summary.processed, 100);
        assert_eq!(summary.skipped, 200);
        assert_eq!(summary.failed, 0);
    }
}
