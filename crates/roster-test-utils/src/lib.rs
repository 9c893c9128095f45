//! Testing utilities for the Roster workspace
//!
//! Scripted backend, fixtures and a harness wiring them into an engine.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use roster_engine::{Backend, Clock, Engine, EngineConfig, FetchError};
use roster_model::{DateRange, EntityId, Metric, Record};
use roster_store::{MemoryMedium, PersistentRecordStore, DEFAULT_STORAGE_KEY, DEFAULT_TTL};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use roster_engine::ManualClock;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// In-memory backend with scripted answers, failures and latency
///
/// Every call is counted, and the number of calls in progress at once is
/// tracked as a high-water mark.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    records: HashMap<EntityId, Record>,
    counts: HashMap<(EntityId, Metric), u64>,
    period_counts: HashMap<(EntityId, Metric, DateRange), u64>,
    listings: HashMap<Metric, Vec<EntityId>>,

    failing_singles: HashSet<EntityId>,
    failing_batches: HashSet<EntityId>,
    omitted_from_batches: HashSet<EntityId>,
    failing_aggregates: HashSet<EntityId>,
    failing_listing: bool,
    latency: Duration,
    offline: AtomicBool,

    single_calls: Mutex<Vec<EntityId>>,
    batch_calls: Mutex<Vec<Vec<EntityId>>>,
    aggregate_calls: AtomicUsize,
    list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, id: &str, display_name: &str) -> Self {
        self.records
            .insert(EntityId::from(id), Record::new(display_name, None));
        self
    }

    pub fn with_named(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self.records
                .insert(EntityId::from(*id), Record::new(format!("Name {id}"), None));
        }
        self
    }

    pub fn with_count(mut self, id: &str, metric: Metric, count: u64) -> Self {
        self.counts.insert((EntityId::from(id), metric), count);
        self
    }

    /// Count that only applies to `range`, taking precedence over
    /// [`ScriptedBackend::with_count`]
    pub fn with_period_count(mut self, id: &str, metric: Metric, range: DateRange, count: u64) -> Self {
        self.period_counts
            .insert((EntityId::from(id), metric, range), count);
        self
    }

    pub fn with_listing(mut self, metric: Metric, ids: &[&str]) -> Self {
        self.listings
            .insert(metric, ids.iter().map(|id| EntityId::from(*id)).collect());
        self
    }

    pub fn failing_single(mut self, id: &str) -> Self {
        self.failing_singles.insert(EntityId::from(id));
        self
    }

    /// Any batch containing `id` fails as a whole
    pub fn failing_batch_with(mut self, id: &str) -> Self {
        self.failing_batches.insert(EntityId::from(id));
        self
    }

    /// Batch responses leave `id` out even when it is known
    pub fn omitted_from_batches(mut self, id: &str) -> Self {
        self.omitted_from_batches.insert(EntityId::from(id));
        self
    }

    pub fn failing_aggregate(mut self, id: &str) -> Self {
        self.failing_aggregates.insert(EntityId::from(id));
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.failing_listing = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every call fail with a transport error until set back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn single_calls(&self) -> Vec<EntityId> {
        self.single_calls.lock().clone()
    }

    pub fn single_call_count(&self) -> usize {
        self.single_calls.lock().len()
    }

    pub fn batch_calls(&self) -> Vec<Vec<EntityId>> {
        self.batch_calls.lock().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.batch_calls.lock().iter().map(Vec::len).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes
    }

    pub fn aggregate_call_count(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Calls of any kind issued so far
    pub fn total_calls(&self) -> usize {
        self.single_call_count()
            + self.batch_calls.lock().len()
            + self.aggregate_call_count()
            + self.list_call_count()
    }

    /// Most calls observed in progress at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<InFlight<'_>, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("backend offline".to_string()));
        }
        Ok(guard)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn resolve(&self, id: &EntityId) -> Result<Option<Record>, FetchError> {
        self.single_calls.lock().push(id.clone());
        let _guard = self.enter().await?;

        if self.failing_singles.contains(id) {
            return Err(FetchError::status("/resolve", 503));
        }
        Ok(self.records.get(id).cloned())
    }

    async fn resolve_batch(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Record>, FetchError> {
        self.batch_calls.lock().push(ids.to_vec());
        let _guard = self.enter().await?;

        if ids.iter().any(|id| self.failing_batches.contains(id)) {
            return Err(FetchError::status("/resolve/batch", 500));
        }
        Ok(ids
            .iter()
            .filter(|id| !self.omitted_from_batches.contains(*id))
            .filter_map(|id| self.records.get(id).map(|record| (id.clone(), record.clone())))
            .collect())
    }

    async fn aggregate(&self, id: &EntityId, metric: Metric, range: &DateRange) -> Result<u64, FetchError> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await?;

        if self.failing_aggregates.contains(id) {
            return Err(FetchError::Timeout);
        }
        let count = self
            .period_counts
            .get(&(id.clone(), metric, *range))
            .or_else(|| self.counts.get(&(id.clone(), metric)))
            .copied()
            .unwrap_or(0);
        Ok(count)
    }

    async fn list_entities(&self, metric: Metric) -> Result<Vec<EntityId>, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await?;

        if self.failing_listing {
            return Err(FetchError::status("/entities", 502));
        }
        Ok(self.listings.get(&metric).cloned().unwrap_or_default())
    }
}

/// Engine wired to a scripted backend, an in-memory store and a manual clock
#[derive(Debug, Clone)]
pub struct Harness {
    pub engine: Arc<Engine>,
    pub backend: Arc<ScriptedBackend>,
    pub store: Arc<PersistentRecordStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: ScriptedBackend, config: EngineConfig) -> Self {
        let store = Arc::new(PersistentRecordStore::new(
            Arc::new(MemoryMedium::new()),
            DEFAULT_STORAGE_KEY,
            DEFAULT_TTL,
        ));
        Self::with_store(backend, config, store)
    }

    pub fn with_store(backend: ScriptedBackend, config: EngineConfig, store: Arc<PersistentRecordStore>) -> Self {
        let backend = Arc::new(backend);
        let clock = Arc::new(ManualClock::new(100 * DAY_MS));
        let engine = Engine::new(config, backend.clone(), Arc::clone(&store), clock.clone())
            .expect("test config is valid");
        Self {
            engine: Arc::new(engine),
            backend,
            store,
            clock,
        }
    }

    /// Seed a store entry written `age_days` before the clock's current time
    pub fn seed(&self, id: &str, display_name: &str, age_days: i64) {
        self.store.write(
            EntityId::from(id),
            Record::new(display_name, None),
            self.clock.now_ms() - age_days * DAY_MS,
        );
    }
}

pub fn ids(raw: &[&str]) -> Vec<EntityId> {
    raw.iter().map(|id| EntityId::from(*id)).collect()
}

/// `count` identifiers named `U0`, `U1`, ...
pub fn numbered_ids(count: usize) -> Vec<EntityId> {
    (0..count).map(|i| EntityId::new(format!("U{i}"))).collect()
}

pub fn range(start: &str, end: &str) -> DateRange {
    DateRange::parse(start, end).expect("valid test range")
}

pub fn january() -> DateRange {
    range("2024-01-01", "2024-01-31")
}

pub fn december() -> DateRange {
    range("2023-12-01", "2023-12-31")
}
