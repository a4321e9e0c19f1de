//! Rate-limited bounded task pool.
//!
//! Both harvesting fan-outs (URL fetches, search-vector batches) and section
//! drafting share this primitive: units of work run concurrently up to a
//! fixed cap, and every dispatch waits a fixed delay after acquiring its slot
//! to throttle the request rate against the external service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::error::Result;

/// Bounded fan-out with a fixed delay between dispatches.
pub struct TaskPool {
    permits: Arc<Semaphore>,
    dispatch_delay: Duration,
}

impl TaskPool {
    /// Create a pool with the given concurrency cap and per-dispatch delay.
    pub fn new(concurrency: usize, dispatch_delay: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            dispatch_delay,
        }
    }

    /// Run every task, returning outputs in task order.
    ///
    /// Per-item failures are the task's own responsibility: a task that wants
    /// the batch to continue must absorb its error and return `Ok`. An `Err`
    /// return is treated as fatal — the remaining in-flight and pending
    /// siblings are dropped and the error unwinds to the caller.
    pub async fn run_all<T, F, Fut>(&self, tasks: Vec<F>) -> Result<Vec<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut in_flight = FuturesUnordered::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let permits = self.permits.clone();
            let delay = self.dispatch_delay;
            in_flight.push(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("pool semaphore closed");
                sleep(delay).await;
                task().await.map(|value| (index, value))
            });
        }

        let mut indexed = Vec::with_capacity(in_flight.len());
        while let Some(result) = in_flight.next().await {
            indexed.push(result?);
        }
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, value)| value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_results_preserve_task_order() {
        let pool = TaskPool::new(4, Duration::from_millis(1));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                move || async move {
                    // Later tasks finish earlier to scramble completion order.
                    sleep(Duration::from_millis(20 - 2 * i)).await;
                    Ok(i)
                }
            })
            .collect();

        let outputs = pool.run_all(tasks).await.unwrap();
        assert_eq!(outputs, (0..8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_cap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let pool = TaskPool::new(5, Duration::from_millis(1));
        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();

        pool.run_all(tasks).await.unwrap();
        assert!(max_seen.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let started = Arc::new(AtomicUsize::new(0));

        let pool = TaskPool::new(1, Duration::from_millis(1));
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let started = started.clone();
                move || async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        Err(Error::QuotaExhausted("out of quota".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .collect();

        let result = pool.run_all(tasks).await;
        assert!(matches!(result, Err(Error::QuotaExhausted(_))));
        // With a single-slot pool, tasks after the failing one never start.
        assert!(started.load(Ordering::SeqCst) <= 2);
    }
}
