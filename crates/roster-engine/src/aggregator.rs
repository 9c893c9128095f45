//! Bounded-concurrency aggregate fan-out
//!
//! One backend call per distinct identifier, at most `concurrency` in flight.
//! A failed call contributes a count of zero and is reported in
//! [`AggregateReport::failed`]; it never fails the aggregate as a whole.

use crate::backend::Backend;
use crate::pool::BoundedPool;
use roster_model::{rank_top, DateRange, EntityId, Metric, RankedEntry};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One aggregate request
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    /// Identifiers to count; duplicates are counted once
    pub ids: Vec<EntityId>,
    /// Counter to read
    pub metric: Metric,
    /// Inclusive date range
    pub range: DateRange,
    /// Calls in flight at most; 0 is treated as 1
    pub concurrency: usize,
}

impl AggregateQuery {
    /// Create query with the default concurrency of 5
    #[must_use]
    pub fn new(ids: Vec<EntityId>, metric: Metric, range: DateRange) -> Self {
        Self {
            ids,
            metric,
            range,
            concurrency: 5,
        }
    }

    /// Set concurrency
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Counts for every requested identifier
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateReport {
    /// Count per identifier; failed lookups are present as 0
    pub counts: HashMap<EntityId, u64>,
    /// Identifiers whose call failed
    pub failed: BTreeSet<EntityId>,
    /// Whether the run stopped early; unvisited identifiers are absent
    pub cancelled: bool,
}

impl AggregateReport {
    /// True when every identifier was counted by a successful call
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    /// Sum over all counts
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Top `limit` identifiers with a positive count
    #[must_use]
    pub fn top(&self, limit: usize) -> Vec<RankedEntry> {
        rank_top(&self.counts, limit)
    }
}

/// Runs aggregate queries against a backend
pub struct Aggregator {
    backend: Arc<dyn Backend>,
}

impl Aggregator {
    /// Create aggregator
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Count `query.metric` for every identifier in `query.ids`
    pub async fn run(&self, query: &AggregateQuery, cancel: &CancellationToken) -> AggregateReport {
        let ids = dedup(&query.ids);
        if ids.is_empty() {
            return AggregateReport::default();
        }

        let pool = BoundedPool::new(query.concurrency);
        tracing::debug!(
            ids = ids.len(),
            metric = %query.metric,
            range = %query.range,
            workers = pool.concurrency(),
            "aggregating"
        );

        let backend = &self.backend;
        let outcome = pool
            .run(&ids, cancel, |id| async move {
                backend.aggregate(id, query.metric, &query.range).await
            })
            .await;

        let mut report = AggregateReport {
            cancelled: outcome.cancelled,
            ..AggregateReport::default()
        };
        for (index, result) in outcome.outputs {
            let id = ids[index].clone();
            match result {
                Ok(count) => {
                    report.counts.insert(id, count);
                }
                Err(err) => {
                    tracing::warn!(%id, metric = %query.metric, error = %err, "aggregate call failed, counting 0");
                    report.counts.insert(id.clone(), 0);
                    report.failed.insert(id);
                }
            }
        }

        if !report.is_complete() {
            tracing::info!(
                failed = report.failed.len(),
                cancelled = report.cancelled,
                "aggregate is partial"
            );
        }
        report
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator").finish_non_exhaustive()
    }
}

/// First occurrence order, duplicates dropped
fn dedup(ids: &[EntityId]) -> Vec<EntityId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use roster_model::Record;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counts {
        counts: HashMap<EntityId, u64>,
        failing: HashSet<EntityId>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for Counts {
        async fn resolve(&self, _: &EntityId) -> Result<Option<Record>, FetchError> {
            Ok(None)
        }

        async fn resolve_batch(&self, _: &[EntityId]) -> Result<HashMap<EntityId, Record>, FetchError> {
            Ok(HashMap::new())
        }

        async fn aggregate(&self, id: &EntityId, _: Metric, _: &DateRange) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(id) {
                return Err(FetchError::Timeout);
            }
            Ok(self.counts.get(id).copied().unwrap_or(0))
        }

        async fn list_entities(&self, _: Metric) -> Result<Vec<EntityId>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn range() -> DateRange {
        DateRange::parse("2024-01-01", "2024-01-31").unwrap()
    }

    fn backend(counts: &[(&str, u64)], failing: &[&str]) -> Arc<Counts> {
        Arc::new(Counts {
            counts: counts.iter().map(|(id, n)| (EntityId::from(*id), *n)).collect(),
            failing: failing.iter().map(|id| EntityId::from(*id)).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn counts_every_id_and_ranks() {
        let counts = backend(&[("A", 3), ("B", 5)], &[]);
        let aggregator = Aggregator::new(counts.clone());
        let query = AggregateQuery::new(vec!["A".into(), "B".into()], Metric::Received, range());

        let report = aggregator.run(&query, &CancellationToken::new()).await;

        assert!(report.is_complete());
        assert_eq!(report.counts["A"], 3);
        assert_eq!(report.counts["B"], 5);
        assert_eq!(report.total(), 8);
        let top = report.top(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id.as_str(), "B");
        assert_eq!(top[0].count, 5);
    }

    #[tokio::test]
    async fn failure_counts_as_zero_and_is_reported() {
        let counts = backend(&[("A", 3), ("B", 5)], &["B"]);
        let aggregator = Aggregator::new(counts.clone());
        let query = AggregateQuery::new(vec!["A".into(), "B".into()], Metric::Given, range());

        let report = aggregator.run(&query, &CancellationToken::new()).await;

        assert_eq!(report.counts["B"], 0);
        assert!(report.failed.contains("B"));
        assert!(!report.is_complete());
        assert_eq!(report.top(5).len(), 1);
    }

    #[tokio::test]
    async fn duplicates_are_counted_once() {
        let counts = backend(&[("A", 1)], &[]);
        let aggregator = Aggregator::new(counts.clone());
        let query = AggregateQuery::new(
            vec!["A".into(), "A".into(), "C".into()],
            Metric::Given,
            range(),
        )
        .with_concurrency(0);

        let report = aggregator.run(&query, &CancellationToken::new()).await;

        assert_eq!(counts.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.counts.len(), 2);
        assert_eq!(report.counts["C"], 0);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn empty_query_makes_no_calls() {
        let counts = backend(&[], &[]);
        let aggregator = Aggregator::new(counts.clone());
        let query = AggregateQuery::new(Vec::new(), Metric::Given, range());

        let report = aggregator.run(&query, &CancellationToken::new()).await;

        assert!(report.counts.is_empty());
        assert_eq!(counts.calls.load(Ordering::SeqCst), 0);
    }
}
