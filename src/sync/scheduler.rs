//! Bounded concurrency scheduler
//!
//! Admission control for downloads and requests: tasks are taken from a queue
//! in submission order, and once `limit` tasks are in flight the scheduler
//! waits for any one of them to finish before admitting the next.

use crate::error::Result;
use std::future::Future;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    limit: usize,
}

impl BoundedScheduler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run every task, handing each result to `on_done` in completion order
    ///
    /// `on_done` receives the task's submission index. An error from
    /// `on_done` (or a panicked task) stops admission and aborts the tasks
    /// still in flight.
    pub async fn for_each_completed<I, F, T, C>(&self, tasks: I, mut on_done: C) -> Result<()>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnMut(usize, T) -> Result<()>,
    {
        let mut in_flight: JoinSet<(usize, T)> = JoinSet::new();

        for (idx, task) in tasks.into_iter().enumerate() {
            if in_flight.len() >= self.limit {
                if let Some(joined) = in_flight.join_next().await {
                    let (done_idx, value) = joined?;
                    on_done(done_idx, value)?;
                }
            }
            in_flight.spawn(async move { (idx, task.await) });
        }

        while let Some(joined) = in_flight.join_next().await {
            let (done_idx, value) = joined?;
            on_done(done_idx, value)?;
        }

        Ok(())
    }

    /// Run every task and return results in submission order
    pub async fn run_all<I, F, T>(&self, tasks: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut slots: Vec<Option<T>> = Vec::new();
        self.for_each_completed(tasks, |idx, value| {
            if slots.len() <= idx {
                slots.resize_with(idx + 1, || None);
            }
            slots[idx] = Some(value);
            Ok(())
        })
        .await?;

        Ok(slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let scheduler = BoundedScheduler::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20u64)
            .map(|i| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2 + (i % 3))).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let results = scheduler.run_all(tasks).await.unwrap();

        assert_eq!(results, (0..20u64).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let scheduler = BoundedScheduler::new(4);
        let tasks: Vec<_> = (0..8u64)
            .map(|i| async move {
                // later tasks finish first
                tokio::time::sleep(Duration::from_millis(16 - 2 * i)).await;
                i * 10
            })
            .collect();

        let results = scheduler.run_all(tasks).await.unwrap();
        assert_eq!(results, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn test_callback_error_stops_run() {
        let scheduler = BoundedScheduler::new(2);
        let tasks: Vec<_> = (0..5u64).map(|i| async move { i }).collect();

        let mut seen = 0;
        let result = scheduler
            .for_each_completed(tasks, |_, _| {
                seen += 1;
                Err(crate::error::SyncError::Storage("boom".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_zero_limit_treated_as_one() {
        let scheduler = BoundedScheduler::new(0);
        assert_eq!(scheduler.limit(), 1);
        let results = scheduler
            .run_all((1..=2u64).map(|i| async move { i }))
            .await
            .unwrap();
        assert_eq!(results, vec![1, 2]);
    }
}
