//! Bounded-concurrency worker pool
//!
//! Maps an async function over a slice with a fixed number of workers:
//! - A single shared cursor hands out indices (atomic claim)
//! - Each worker claims, runs one item, records the output, repeats
//! - Workers check the cancel flag before every claim
//!
//! The workers are joined on the caller's task, so they interleave only at
//! the awaits inside `f`.

use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Outputs of a pool run
#[derive(Debug, Clone)]
pub struct PoolOutcome<O> {
    /// `(index, output)` for every item that ran, sorted by index
    pub outputs: Vec<(usize, O)>,
    /// Whether cancellation stopped the run before the cursor was drained
    pub cancelled: bool,
}

impl<O> PoolOutcome<O> {
    /// Number of items that ran
    #[inline]
    #[must_use]
    pub fn completed(&self) -> usize {
        self.outputs.len()
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers spawned
    pub workers: usize,
    /// Items claimed from the cursor
    pub claimed: usize,
    /// Items that produced an output
    pub completed: usize,
}

/// Fixed-size pool of workers draining a shared cursor
#[derive(Debug, Clone, Copy)]
pub struct BoundedPool {
    /// Number of workers; at least 1
    concurrency: usize,
}

impl BoundedPool {
    /// Create pool; a concurrency of 0 is treated as 1
    #[inline]
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Number of workers a run spawns
    #[inline]
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `f` over `items`, at most `concurrency` at a time
    ///
    /// Resolves once every worker has stopped: the cursor is drained, or the
    /// token was cancelled and in-flight items finished.
    pub async fn run<'a, I, O, F, Fut>(
        &self,
        items: &'a [I],
        cancel: &CancellationToken,
        f: F,
    ) -> PoolOutcome<O>
    where
        F: Fn(&'a I) -> Fut,
        Fut: Future<Output = O>,
    {
        let (outcome, stats) = self.run_with_stats(items, cancel, f).await;
        tracing::trace!(?stats, "pool run finished");
        outcome
    }

    /// As [`BoundedPool::run`], also reporting claim counts
    pub async fn run_with_stats<'a, I, O, F, Fut>(
        &self,
        items: &'a [I],
        cancel: &CancellationToken,
        f: F,
    ) -> (PoolOutcome<O>, PoolStats)
    where
        F: Fn(&'a I) -> Fut,
        Fut: Future<Output = O>,
    {
        let cursor = AtomicUsize::new(0);
        let outputs = Mutex::new(Vec::with_capacity(items.len()));

        let cursor_ref = &cursor;
        let outputs_ref = &outputs;
        let f_ref = &f;

        let workers = (0..self.concurrency).map(move |_| async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let index = cursor_ref.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(index) else {
                    break;
                };
                let output = f_ref(item).await;
                outputs_ref.lock().push((index, output));
            }
        });
        join_all(workers).await;

        let mut outputs = outputs.into_inner();
        outputs.sort_by_key(|(index, _)| *index);

        let claimed = cursor.load(Ordering::SeqCst).min(items.len());
        let stats = PoolStats {
            workers: self.concurrency,
            claimed,
            completed: outputs.len(),
        };
        let cancelled = outputs.len() < items.len();

        (PoolOutcome { outputs, cancelled }, stats)
    }
}

impl Default for BoundedPool {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pool_runs_every_item_once() {
        let pool = BoundedPool::new(3);
        let items: Vec<u32> = (0..10).collect();

        let outcome = pool
            .run(&items, &CancellationToken::new(), |n| async move { n * 2 })
            .await;

        assert!(!outcome.cancelled);
        assert_eq!(
            outcome.outputs,
            (0..10usize).map(|i| (i, i as u32 * 2)).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn pool_never_exceeds_concurrency() {
        let pool = BoundedPool::new(4);
        let items: Vec<u64> = (0..17).collect();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let (outcome, stats) = pool
            .run_with_stats(&items, &CancellationToken::new(), |n| {
                let active = &active;
                let peak = &peak;
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1 + n % 3)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(outcome.completed(), 17);
        assert_eq!(stats.workers, 4);
        assert_eq!(stats.claimed, 17);
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let pool = BoundedPool::new(0);
        assert_eq!(pool.concurrency(), 1);

        let outcome = pool.run(&[1, 2, 3], &CancellationToken::new(), |n| async move { *n }).await;
        assert_eq!(outcome.completed(), 3);
    }

    #[tokio::test]
    async fn empty_input_completes_immediately() {
        let items: Vec<u8> = Vec::new();
        let outcome = BoundedPool::default()
            .run(&items, &CancellationToken::new(), |n| async move { *n })
            .await;
        assert!(outcome.outputs.is_empty());
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn cancellation_stops_new_claims_but_keeps_finished_work() {
        let pool = BoundedPool::new(2);
        let items: Vec<u32> = (0..20).collect();
        let cancel = CancellationToken::new();

        let outcome = pool
            .run(&items, &cancel, |n| {
                let cancel = cancel.clone();
                async move {
                    if *n == 3 {
                        cancel.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    *n
                }
            })
            .await;

        assert!(outcome.cancelled);
        assert!(outcome.completed() < 20);
        assert!(outcome.outputs.iter().any(|(_, n)| *n == 3));
    }
}
