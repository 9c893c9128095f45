//! Batch resolution of identifiers to records
//!
//! `resolve_many` runs in stages:
//! 1. Fresh store hits are answered without network
//! 2. Misses already being fetched join that request
//! 3. Remaining misses go out in batches of at most `batch_size`, all at once
//! 4. Ids from failed batches, or missing from a batch response, are retried
//!    one by one, but only when there are at most `max_individual_retries`
//! 5. Anything still unresolved gets its stale entry, else a synthetic record
//!
//! Every record fetched live is written back to the store. Fetches and their
//! write-backs run on spawned tasks, so they complete even when the caller
//! that started them is dropped; store flushes run on the blocking pool.

use crate::backend::Backend;
use crate::clock::Clock;
use crate::coalescer::{Pending, RequestCoalescer};
use crate::error::{EngineError, FetchError};
use crate::pool::BoundedPool;
use futures::future::join_all;
use roster_model::{EntityId, Record};
use roster_store::PersistentRecordStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of one single-identifier fetch, shared by coalesced waiters
pub type FetchOutcome = Result<Option<Record>, FetchError>;

/// Resolver tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverLimits {
    /// Identifiers per batch call
    pub batch_size: usize,
    /// Largest failed set still retried one by one
    pub max_individual_retries: usize,
    /// Workers when resolving one by one
    pub resolve_concurrency: usize,
    /// Whether batch calls are available at all
    pub use_batch_endpoint: bool,
}

impl Default for ResolverLimits {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_individual_retries: 10,
            resolve_concurrency: 5,
            use_batch_endpoint: true,
        }
    }
}

/// Where each record of a resolution came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Answered by fresh store entries
    pub fresh_hits: usize,
    /// Answered by joining a request already in flight
    pub joined: usize,
    /// Batch calls issued
    pub batch_calls: usize,
    /// Answered by a batch response
    pub batch_resolved: usize,
    /// Individual retries issued
    pub retried: usize,
    /// Answered by an individual fetch
    pub individually_resolved: usize,
    /// Served from stale store entries
    pub stale_fallbacks: usize,
    /// Served as synthetic records
    pub synthetic: usize,
}

impl ResolveStats {
    /// Records that did not come from the backend or a fresh entry
    #[inline]
    #[must_use]
    pub fn degraded(&self) -> usize {
        self.stale_fallbacks + self.synthetic
    }
}

/// Records for a set of identifiers plus provenance counts
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// One record per requested identifier
    pub records: HashMap<EntityId, Record>,
    /// Provenance counts
    pub stats: ResolveStats,
}

/// Resolves identifiers through store, coalescer and backend
pub struct BatchResolver {
    backend: Arc<dyn Backend>,
    store: Arc<PersistentRecordStore>,
    clock: Arc<dyn Clock>,
    coalescer: RequestCoalescer<FetchOutcome>,
    limits: ResolverLimits,
}

impl BatchResolver {
    /// Create resolver
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<PersistentRecordStore>,
        clock: Arc<dyn Clock>,
        limits: ResolverLimits,
    ) -> Self {
        Self {
            backend,
            store,
            clock,
            coalescer: RequestCoalescer::new(|err| Err(FetchError::aborted(&err))),
            limits: ResolverLimits {
                batch_size: limits.batch_size.max(1),
                ..limits
            },
        }
    }

    /// Tuning in effect
    #[inline]
    #[must_use]
    pub fn limits(&self) -> ResolverLimits {
        self.limits
    }

    /// Identifiers with a single fetch in flight
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.coalescer.len()
    }

    /// Resolve one identifier; never fails
    pub async fn resolve_one(&self, id: &EntityId) -> Record {
        if let Some(record) = self.store.read_fresh(id.as_str(), self.clock.now_ms()) {
            tracing::debug!(%id, "fresh store hit");
            return record;
        }
        match usable(self.fetch_single(id).await) {
            Some(record) => record,
            None => self.fallback(id).0,
        }
    }

    /// Resolve every identifier in `ids`; duplicates are resolved once
    ///
    /// # Errors
    /// - `EngineError::Cancelled` if `cancel` fired; records fetched before
    ///   that point are still written to the store
    pub async fn resolve_many(
        &self,
        ids: &[EntityId],
        cancel: &CancellationToken,
    ) -> Result<Resolution, EngineError> {
        let now = self.clock.now_ms();
        let partition = self.store.partition_fresh(ids, now);

        let mut resolution = Resolution {
            stats: ResolveStats {
                fresh_hits: partition.hits.len(),
                ..ResolveStats::default()
            },
            records: partition.hits,
        };
        if partition.misses.is_empty() {
            tracing::debug!(requested = ids.len(), "all records fresh");
            return Ok(resolution);
        }
        check(cancel)?;

        let (joining, to_fetch): (Vec<EntityId>, Vec<EntityId>) = partition
            .misses
            .into_iter()
            .partition(|id| self.coalescer.is_in_flight(id));

        let mut failed = self.join_in_flight(&joining, &mut resolution).await;

        if self.limits.use_batch_endpoint {
            failed.extend(self.fetch_batches(&to_fetch, &mut resolution).await);
            check(cancel)?;
            self.retry_individually(failed, &mut resolution).await;
        } else {
            let unresolved = self.fetch_individually(&to_fetch, cancel, &mut resolution).await;
            check(cancel)?;
            failed.extend(unresolved);
            for id in failed {
                self.apply_fallback(id, &mut resolution);
            }
        }
        check(cancel)?;

        tracing::info!(
            requested = ids.len(),
            fresh = resolution.stats.fresh_hits,
            batches = resolution.stats.batch_calls,
            retried = resolution.stats.retried,
            degraded = resolution.stats.degraded(),
            "resolution settled"
        );
        Ok(resolution)
    }

    /// Await requests other callers already started
    async fn join_in_flight(&self, ids: &[EntityId], resolution: &mut Resolution) -> Vec<EntityId> {
        let pending: Vec<_> = ids.iter().map(|id| self.fetch_single(id)).collect();
        let outcomes = join_all(pending).await;

        let mut failed = Vec::new();
        for (id, outcome) in ids.iter().zip(outcomes) {
            match usable(outcome) {
                Some(record) => {
                    resolution.stats.joined += 1;
                    resolution.records.insert(id.clone(), record);
                }
                None => failed.push(id.clone()),
            }
        }
        failed
    }

    /// Issue all batches concurrently; returns ids the batches did not resolve
    async fn fetch_batches(&self, ids: &[EntityId], resolution: &mut Resolution) -> Vec<EntityId> {
        if ids.is_empty() {
            return Vec::new();
        }

        let batches: Vec<&[EntityId]> = ids.chunks(self.limits.batch_size).collect();
        resolution.stats.batch_calls = batches.len();
        tracing::debug!(misses = ids.len(), batches = batches.len(), "issuing batch calls");

        let calls = batches.iter().map(|batch| {
            let batch = batch.to_vec();
            let backend = Arc::clone(&self.backend);
            let store = Arc::clone(&self.store);
            let clock = Arc::clone(&self.clock);
            tokio::spawn(async move {
                let mut found = backend.resolve_batch(&batch).await?;
                found.retain(|_, record| record.is_named());
                let named: Vec<_> = batch
                    .iter()
                    .filter_map(|id| found.get(id).map(|record| (id.clone(), record.clone())))
                    .collect();
                persist(store, named, clock.now_ms()).await;
                Ok::<_, FetchError>(found)
            })
        });
        let responses = join_all(calls).await;

        let mut failed = Vec::new();
        for (batch, joined) in batches.iter().zip(responses) {
            match joined.unwrap_or_else(|err| Err(FetchError::aborted(&err))) {
                Ok(mut found) => {
                    for id in batch.iter() {
                        match found.remove(id) {
                            Some(record) => {
                                resolution.stats.batch_resolved += 1;
                                resolution.records.insert(id.clone(), record);
                            }
                            None => failed.push(id.clone()),
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        size = batch.len(),
                        error = %err,
                        retryable = err.is_retryable(),
                        "batch call failed"
                    );
                    failed.extend(batch.iter().cloned());
                }
            }
        }
        failed
    }

    /// Bounded individual retry, then fallback for whatever is left
    async fn retry_individually(&self, failed: Vec<EntityId>, resolution: &mut Resolution) {
        if failed.is_empty() {
            return;
        }
        if failed.len() > self.limits.max_individual_retries {
            tracing::warn!(
                failed = failed.len(),
                limit = self.limits.max_individual_retries,
                "too many unresolved ids, skipping individual retry"
            );
            for id in failed {
                self.apply_fallback(id, resolution);
            }
            return;
        }

        resolution.stats.retried = failed.len();
        let pending: Vec<_> = failed.iter().map(|id| self.fetch_single(id)).collect();
        let outcomes = join_all(pending).await;

        for (id, outcome) in failed.into_iter().zip(outcomes) {
            match usable(outcome) {
                Some(record) => {
                    resolution.stats.individually_resolved += 1;
                    resolution.records.insert(id, record);
                }
                None => self.apply_fallback(id, resolution),
            }
        }
    }

    /// One-by-one resolution through the worker pool, for backends without
    /// the batch endpoint; returns ids that stayed unresolved
    async fn fetch_individually(
        &self,
        ids: &[EntityId],
        cancel: &CancellationToken,
        resolution: &mut Resolution,
    ) -> Vec<EntityId> {
        let pool = BoundedPool::new(self.limits.resolve_concurrency);
        let outcome = pool
            .run(ids, cancel, |id| async move { usable(self.fetch_single(id).await) })
            .await;

        let mut unresolved = Vec::new();
        for (index, record) in outcome.outputs {
            let id = ids[index].clone();
            match record {
                Some(record) => {
                    resolution.stats.individually_resolved += 1;
                    resolution.records.insert(id, record);
                }
                None => unresolved.push(id),
            }
        }
        unresolved
    }

    /// Coalesced single fetch; the owner of the request writes the store
    fn fetch_single(&self, id: &EntityId) -> Pending<FetchOutcome> {
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let owned_id = id.clone();

        self.coalescer.coalesce(id, move || async move {
            let outcome = backend.resolve(&owned_id).await;
            match &outcome {
                Ok(Some(record)) if record.is_named() => {
                    let written = vec![(owned_id.clone(), record.clone())];
                    persist(store, written, clock.now_ms()).await;
                }
                Ok(Some(_)) => tracing::debug!(id = %owned_id, "backend returned empty name"),
                Ok(None) => tracing::debug!(id = %owned_id, "backend does not know id"),
                Err(err) => tracing::warn!(
                    id = %owned_id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "single fetch failed"
                ),
            }
            outcome
        })
    }

    fn apply_fallback(&self, id: EntityId, resolution: &mut Resolution) {
        let (record, stale) = self.fallback(&id);
        if stale {
            resolution.stats.stale_fallbacks += 1;
        } else {
            resolution.stats.synthetic += 1;
        }
        resolution.records.insert(id, record);
    }

    /// Stale entry if any, else synthetic; the flag is true for stale
    fn fallback(&self, id: &EntityId) -> (Record, bool) {
        match self.store.read_any(id.as_str()) {
            Some(record) => {
                tracing::debug!(%id, "serving stale record");
                (record, true)
            }
            None => (Record::synthetic(id), false),
        }
    }
}

impl std::fmt::Debug for BatchResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchResolver")
            .field("store", &self.store)
            .field("coalescer", &self.coalescer)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Upsert on the blocking pool; the store flushes to its medium synchronously
async fn persist(store: Arc<PersistentRecordStore>, records: Vec<(EntityId, Record)>, now_ms: i64) {
    if records.is_empty() {
        return;
    }
    let count = records.len();
    if let Err(err) = tokio::task::spawn_blocking(move || store.write_many(records, now_ms)).await {
        tracing::warn!(count, error = %err, "store write-back did not run");
    }
}

fn usable(outcome: FetchOutcome) -> Option<Record> {
    outcome.ok().flatten().filter(Record::is_named)
}

fn check(cancel: &CancellationToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}
