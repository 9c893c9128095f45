//! Durable record store with a fixed time-to-live
//!
//! Holds one `EntityId -> CacheEntry` mapping, serialized as a single JSON
//! blob under a fixed storage key. The mapping is loaded lazily on first
//! access and written back in full after every upsert.
//!
//! - Fresh entries (`now - written_at <= ttl`) answer lookups without network
//! - Stale entries are kept until overwritten and only serve as fallback
//! - Unreadable or malformed blobs load as an empty store
//! - Persist failures are logged and dropped; the in-memory upsert stands

use crate::error::StoreError;
use crate::medium::{MemoryMedium, StorageMedium};
use parking_lot::Mutex;
use roster_model::{CacheEntry, EntityId, Record};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Storage key used when none is configured
pub const DEFAULT_STORAGE_KEY: &str = "roster_record_cache";

/// Freshness window used when none is configured (7 days)
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

type EntryMap = HashMap<EntityId, CacheEntry>;

/// Statistics for store monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries held, fresh or stale
    pub entry_count: usize,
    /// Entries still inside the freshness window
    pub fresh_count: usize,
}

/// Result of splitting identifiers against the store
#[derive(Debug, Clone, Default)]
pub struct FreshPartition {
    /// Identifiers answered from fresh entries
    pub hits: HashMap<EntityId, Record>,
    /// Identifiers with no fresh entry, in request order
    pub misses: Vec<EntityId>,
}

/// Durable `EntityId -> CacheEntry` map
#[derive(Debug)]
pub struct PersistentRecordStore {
    medium: Arc<dyn StorageMedium>,
    storage_key: String,
    ttl: Duration,
    /// `None` until first access
    state: Mutex<Option<EntryMap>>,
}

impl PersistentRecordStore {
    /// Create store over a medium
    #[must_use]
    pub fn new(medium: Arc<dyn StorageMedium>, storage_key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            medium,
            storage_key: storage_key.into(),
            ttl,
            state: Mutex::new(None),
        }
    }

    /// Create store backed by a fresh [`MemoryMedium`]
    #[must_use]
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryMedium::new()), DEFAULT_STORAGE_KEY, ttl)
    }

    /// Freshness window
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Storage key the blob lives under
    #[inline]
    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Entry for `id`, fresh or stale
    #[must_use]
    pub fn read(&self, id: &str) -> Option<CacheEntry> {
        self.with_entries(|entries| entries.get(id).cloned())
    }

    /// Record for `id` if its entry is fresh at `now_ms`
    #[must_use]
    pub fn read_fresh(&self, id: &str, now_ms: i64) -> Option<Record> {
        let ttl = self.ttl;
        self.with_entries(|entries| {
            entries
                .get(id)
                .filter(|entry| entry.is_fresh(now_ms, ttl))
                .map(|entry| entry.record.clone())
        })
    }

    /// Record for `id` regardless of age
    #[must_use]
    pub fn read_any(&self, id: &str) -> Option<Record> {
        self.read(id).map(|entry| entry.record)
    }

    /// Split `ids` into fresh hits and misses under a single lock
    ///
    /// Duplicate identifiers appear once in the output.
    #[must_use]
    pub fn partition_fresh<'a, I>(&self, ids: I, now_ms: i64) -> FreshPartition
    where
        I: IntoIterator<Item = &'a EntityId>,
    {
        let ttl = self.ttl;
        self.with_entries(|entries| {
            let mut partition = FreshPartition::default();
            let mut seen = HashSet::new();
            for id in ids {
                if !seen.insert(id) {
                    continue;
                }
                match entries.get(id).filter(|entry| entry.is_fresh(now_ms, ttl)) {
                    Some(entry) => {
                        partition.hits.insert(id.clone(), entry.record.clone());
                    }
                    None => partition.misses.push(id.clone()),
                }
            }
            partition
        })
    }

    /// Upsert one record stamped `now_ms` and persist
    pub fn write(&self, id: EntityId, record: Record, now_ms: i64) {
        self.write_many(std::iter::once((id, record)), now_ms);
    }

    /// Upsert many records stamped `now_ms`, persisting once
    ///
    /// The lock is held across the flush so readers never see a partially
    /// applied batch and concurrent flushes cannot reorder. The flush is
    /// blocking I/O on the medium; async callers run writes on a blocking
    /// thread (`tokio::task::spawn_blocking`).
    pub fn write_many<I>(&self, records: I, now_ms: i64)
    where
        I: IntoIterator<Item = (EntityId, Record)>,
    {
        let mut guard = self.state.lock();
        let entries = guard.get_or_insert_with(|| self.load());

        let mut written = 0usize;
        for (id, record) in records {
            entries.insert(id, CacheEntry::new(record, now_ms));
            written += 1;
        }
        if written == 0 {
            return;
        }

        self.flush(entries);
        tracing::debug!(written, total = entries.len(), "record store updated");
    }

    /// Entry counts at `now_ms`
    #[must_use]
    pub fn stats(&self, now_ms: i64) -> StoreStats {
        let ttl = self.ttl;
        self.with_entries(|entries| StoreStats {
            entry_count: entries.len(),
            fresh_count: entries
                .values()
                .filter(|entry| entry.is_fresh(now_ms, ttl))
                .count(),
        })
    }

    /// Number of entries, fresh or stale
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    /// Number of entries fresh at `now_ms`
    #[inline]
    #[must_use]
    pub fn fresh_count(&self, now_ms: i64) -> usize {
        self.stats(now_ms).fresh_count
    }

    fn with_entries<R>(&self, f: impl FnOnce(&EntryMap) -> R) -> R {
        let mut guard = self.state.lock();
        let entries = guard.get_or_insert_with(|| self.load());
        f(entries)
    }

    fn load(&self) -> EntryMap {
        let blob = match self.medium.load(&self.storage_key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return EntryMap::new(),
            Err(err) => {
                tracing::warn!(key = %self.storage_key, error = %err, "record store unreadable, starting empty");
                return EntryMap::new();
            }
        };

        match serde_json::from_str::<EntryMap>(&blob) {
            Ok(entries) => {
                tracing::debug!(key = %self.storage_key, entries = entries.len(), "record store loaded");
                entries
            }
            Err(err) => {
                tracing::warn!(key = %self.storage_key, error = %err, "record store malformed, starting empty");
                EntryMap::new()
            }
        }
    }

    fn flush(&self, entries: &EntryMap) {
        if let Err(err) = self.persist(entries) {
            tracing::warn!(key = %self.storage_key, error = %err, "failed to persist record store");
        }
    }

    fn persist(&self, entries: &EntryMap) -> Result<(), StoreError> {
        let blob = serde_json::to_string(entries)?;
        self.medium.save(&self.storage_key, &blob)
    }
}

impl Default for PersistentRecordStore {
    /// In-memory store with the default 7 day TTL
    fn default() -> Self {
        Self::in_memory(DEFAULT_TTL)
    }
}
