//! Engine facade
//!
//! [`Engine`] owns one store, one coalescer and one backend for the whole
//! process, so every panel that resolves or aggregates through it shares
//! their effects. [`Session`] scopes a cancellation token to one panel's
//! lifetime; every session token is a child of the engine's root token.

use crate::aggregator::{AggregateQuery, AggregateReport, Aggregator};
use crate::backend::{Backend, HttpBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::resolver::{BatchResolver, Resolution, ResolverLimits};
use roster_model::{rank_positions, DateRange, EntityId, Metric, RankChange, Record};
use roster_store::{FileMedium, MemoryMedium, PersistentRecordStore, StorageMedium, StoreStats};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Positions of the comparison period looked up for rank changes
///
/// An identifier ranked below this in the earlier period counts as new.
pub const PREVIOUS_RANK_DEPTH: usize = 100;

/// Leaderboard parameters
#[derive(Debug, Clone)]
pub struct LeaderboardRequest {
    /// Counter to rank by
    pub metric: Metric,
    /// Period being ranked
    pub range: DateRange,
    /// Rows to keep
    pub top_n: usize,
    /// Earlier period to compute rank changes against
    pub previous_range: Option<DateRange>,
}

impl LeaderboardRequest {
    /// Create request without a comparison period
    #[must_use]
    pub fn new(metric: Metric, range: DateRange, top_n: usize) -> Self {
        Self {
            metric,
            range,
            top_n,
            previous_range: None,
        }
    }

    /// Compare against `previous`
    #[must_use]
    pub fn with_previous(mut self, previous: DateRange) -> Self {
        self.previous_range = Some(previous);
        self
    }
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    /// 1-based position
    pub rank: usize,
    /// Ranked identifier
    pub id: EntityId,
    /// Count over the ranked period
    pub count: u64,
    /// Display record
    pub record: Record,
    /// Movement against the comparison period, if one was requested
    pub change: Option<RankChange>,
}

/// Ranked result of a leaderboard request
#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    /// Counter ranked by
    pub metric: Metric,
    /// Period ranked
    pub range: DateRange,
    /// Top rows, best first
    pub rows: Vec<LeaderboardRow>,
    /// Sum over every listed identifier
    pub total: u64,
    /// Identifiers whose count failed and were ranked as 0
    pub failed: Vec<EntityId>,
}

impl Leaderboard {
    /// Whether any count behind this ranking failed
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Process-wide resolution and aggregation engine
pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn Backend>,
    store: Arc<PersistentRecordStore>,
    clock: Arc<dyn Clock>,
    resolver: BatchResolver,
    aggregator: Aggregator,
    root: CancellationToken,
}

impl Engine {
    /// Assemble engine from parts
    ///
    /// # Errors
    /// - `EngineError::Config` if `config` does not validate
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn Backend>,
        store: Arc<PersistentRecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let limits = ResolverLimits {
            batch_size: config.batch_size,
            max_individual_retries: config.max_individual_retries,
            resolve_concurrency: config.resolve_concurrency,
            use_batch_endpoint: config.use_batch_endpoint,
        };
        let resolver = BatchResolver::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&clock),
            limits,
        );
        let aggregator = Aggregator::new(Arc::clone(&backend));

        Ok(Self {
            config,
            backend,
            store,
            clock,
            resolver,
            aggregator,
            root: CancellationToken::new(),
        })
    }

    /// Engine talking HTTP to `config.base_url`, with a file store when
    /// `config.store_path` is set and an in-memory store otherwise
    ///
    /// # Errors
    /// - `EngineError::Config` if `config` does not validate
    /// - `EngineError::BackendSetup` if the HTTP client cannot be built
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let backend = HttpBackend::new(config.base_url.clone(), config.request_timeout())
            .map_err(|err| EngineError::BackendSetup(err.to_string()))?;

        let medium: Arc<dyn StorageMedium> = match &config.store_path {
            Some(dir) => Arc::new(FileMedium::new(dir.clone())),
            None => Arc::new(MemoryMedium::new()),
        };
        let store = PersistentRecordStore::new(medium, config.storage_key.clone(), config.cache_ttl());

        tracing::info!(
            base_url = %backend.base_url(),
            store = ?config.store_path,
            "engine configured"
        );
        Self::new(config, Arc::new(backend), Arc::new(store), Arc::new(SystemClock))
    }

    /// Configuration in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared record store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<PersistentRecordStore> {
        &self.store
    }

    /// Store entry counts at the current time
    #[must_use]
    pub fn store_stats(&self) -> StoreStats {
        self.store.stats(self.clock.now_ms())
    }

    /// Start a cancellable session sharing this engine
    #[must_use]
    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            engine: Arc::clone(self),
            cancel: self.root.child_token(),
        }
    }

    /// Cancel every session, current and future
    ///
    /// Calls made on the engine directly are unaffected.
    pub fn shutdown(&self) {
        tracing::info!("engine shutting down, cancelling sessions");
        self.root.cancel();
    }

    /// Whether [`Engine::shutdown`] was called
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Resolve one identifier; never fails
    pub async fn resolve_one(&self, id: &EntityId) -> Record {
        self.resolver.resolve_one(id).await
    }

    /// Resolve every identifier; never fails
    pub async fn resolve_many(&self, ids: &[EntityId]) -> HashMap<EntityId, Record> {
        // a token nobody holds cannot fire
        self.resolver
            .resolve_many(ids, &CancellationToken::new())
            .await
            .map(|resolution| resolution.records)
            .unwrap_or_default()
    }

    /// As [`Engine::resolve_many`], with provenance counts and a cancellation token
    ///
    /// # Errors
    /// - `EngineError::Cancelled` if `cancel` fired
    pub async fn resolve_many_with(
        &self,
        ids: &[EntityId],
        cancel: &CancellationToken,
    ) -> Result<Resolution, EngineError> {
        self.resolver.resolve_many(ids, cancel).await
    }

    /// Count `metric` over `range` for every identifier at the configured
    /// concurrency
    pub async fn aggregate(&self, ids: &[EntityId], metric: Metric, range: DateRange) -> AggregateReport {
        let query = AggregateQuery::new(ids.to_vec(), metric, range)
            .with_concurrency(self.config.aggregate_concurrency);
        self.aggregate_query(&query, &CancellationToken::new()).await
    }

    /// Run an explicit aggregate query
    pub async fn aggregate_query(&self, query: &AggregateQuery, cancel: &CancellationToken) -> AggregateReport {
        self.aggregator.run(query, cancel).await
    }

    /// Every identifier carrying a `metric` counter
    ///
    /// # Errors
    /// - `EngineError::Listing` if the backend call fails
    pub async fn list_entities(&self, metric: Metric) -> Result<Vec<EntityId>, EngineError> {
        self.backend.list_entities(metric).await.map_err(|source| {
            tracing::error!(%metric, error = %source, "entity listing failed");
            EngineError::Listing { metric, source }
        })
    }

    /// Rank listed identifiers by `request.metric` and resolve the top rows
    ///
    /// # Errors
    /// - `EngineError::Listing` if the identifier set cannot be listed
    pub async fn leaderboard(&self, request: &LeaderboardRequest) -> Result<Leaderboard, EngineError> {
        self.leaderboard_with(request, &CancellationToken::new()).await
    }

    async fn leaderboard_with(
        &self,
        request: &LeaderboardRequest,
        cancel: &CancellationToken,
    ) -> Result<Leaderboard, EngineError> {
        let ids = self.list_entities(request.metric).await?;
        tracing::debug!(metric = %request.metric, listed = ids.len(), "building leaderboard");

        let current = self.aggregate_cancellable(&ids, request.metric, request.range, cancel).await?;
        let ranked = current.top(request.top_n);

        let previous = match request.previous_range {
            Some(range) => {
                let report = self.aggregate_cancellable(&ids, request.metric, range, cancel).await?;
                Some(rank_positions(&report.top(PREVIOUS_RANK_DEPTH)))
            }
            None => None,
        };

        let ranked_ids: Vec<EntityId> = ranked.iter().map(|entry| entry.id.clone()).collect();
        let mut records = self.resolver.resolve_many(&ranked_ids, cancel).await?.records;

        let rows = ranked
            .into_iter()
            .map(|entry| {
                let record = records
                    .remove(&entry.id)
                    .unwrap_or_else(|| Record::synthetic(&entry.id));
                let change = previous
                    .as_ref()
                    .map(|positions| RankChange::between(entry.rank, positions.get(&entry.id).copied()));
                LeaderboardRow {
                    rank: entry.rank,
                    id: entry.id,
                    count: entry.count,
                    record,
                    change,
                }
            })
            .collect();

        let leaderboard = Leaderboard {
            metric: request.metric,
            range: request.range,
            rows,
            total: current.total(),
            failed: current.failed.into_iter().collect(),
        };
        tracing::info!(
            metric = %leaderboard.metric,
            range = %leaderboard.range,
            rows = leaderboard.rows.len(),
            partial = leaderboard.is_partial(),
            "leaderboard ready"
        );
        Ok(leaderboard)
    }

    async fn aggregate_cancellable(
        &self,
        ids: &[EntityId],
        metric: Metric,
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<AggregateReport, EngineError> {
        let query = AggregateQuery::new(ids.to_vec(), metric, range)
            .with_concurrency(self.config.aggregate_concurrency);
        let report = self.aggregate_query(&query, cancel).await;
        if report.cancelled || cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Engine handle bound to one cancellation token
///
/// Once cancelled, directly or through [`Engine::shutdown`], every call
/// returns `EngineError::Cancelled` and results still in flight are
/// discarded. Records already fetched stay in the store.
#[derive(Debug, Clone)]
pub struct Session {
    engine: Arc<Engine>,
    cancel: CancellationToken,
}

impl Session {
    /// Cancel this session; other sessions are unaffected
    pub fn cancel(&self) {
        tracing::debug!("session cancelled");
        self.cancel.cancel();
    }

    /// Whether this session or its engine was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Engine behind this session
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// [`Engine::resolve_one`] within this session
    ///
    /// # Errors
    /// - `EngineError::Cancelled` if the session was cancelled
    pub async fn resolve_one(&self, id: &EntityId) -> Result<Record, EngineError> {
        self.live()?;
        let record = self.engine.resolve_one(id).await;
        self.live()?;
        Ok(record)
    }

    /// [`Engine::resolve_many`] within this session
    ///
    /// # Errors
    /// - `EngineError::Cancelled` if the session was cancelled
    pub async fn resolve_many(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Record>, EngineError> {
        self.live()?;
        let resolution = self.engine.resolve_many_with(ids, &self.cancel).await?;
        self.live()?;
        Ok(resolution.records)
    }

    /// Aggregate at the configured concurrency; a cancelled run is an error
    /// rather than a partial report
    ///
    /// # Errors
    /// - `EngineError::Cancelled` if the session was cancelled
    pub async fn aggregate(
        &self,
        ids: &[EntityId],
        metric: Metric,
        range: DateRange,
    ) -> Result<AggregateReport, EngineError> {
        self.live()?;
        self.engine.aggregate_cancellable(ids, metric, range, &self.cancel).await
    }

    /// [`Engine::leaderboard`] within this session
    ///
    /// # Errors
    /// - `EngineError::Cancelled` if the session was cancelled
    /// - `EngineError::Listing` if the identifier set cannot be listed
    pub async fn leaderboard(&self, request: &LeaderboardRequest) -> Result<Leaderboard, EngineError> {
        self.live()?;
        let leaderboard = self.engine.leaderboard_with(request, &self.cancel).await?;
        self.live()?;
        Ok(leaderboard)
    }

    fn live(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
