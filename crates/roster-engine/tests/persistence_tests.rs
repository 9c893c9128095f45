use pretty_assertions::assert_eq;
use roster_engine::{Clock, EngineConfig};
use roster_model::EntityId;
use roster_store::{
    FileMedium, MemoryMedium, PersistentRecordStore, StorageMedium, StoreError, DEFAULT_STORAGE_KEY, DEFAULT_TTL,
};
use roster_test_utils::{ids, Harness, ScriptedBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory medium whose saves block the calling thread
#[derive(Debug, Default)]
struct SlowMedium {
    inner: MemoryMedium,
}

impl StorageMedium for SlowMedium {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        std::thread::sleep(Duration::from_millis(60));
        self.inner.save(key, blob)
    }
}

fn file_store(dir: &std::path::Path) -> Arc<PersistentRecordStore> {
    Arc::new(PersistentRecordStore::new(
        Arc::new(FileMedium::new(dir)),
        DEFAULT_STORAGE_KEY,
        DEFAULT_TTL,
    ))
}

#[tokio::test]
async fn records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first = Harness::with_store(
        ScriptedBackend::new().with_named(&["U1", "U2"]),
        EngineConfig::default(),
        file_store(dir.path()),
    );
    first.engine.resolve_many(&ids(&["U1", "U2"])).await;
    assert_eq!(first.backend.batch_calls().len(), 1);

    // new process: same directory, empty backend
    let second = Harness::with_store(ScriptedBackend::new(), EngineConfig::default(), file_store(dir.path()));
    second.clock.set(first.clock.now_ms());

    let records = second.engine.resolve_many(&ids(&["U1", "U2"])).await;
    assert_eq!(records["U2"].display_name, "Name U2");
    assert_eq!(second.backend.total_calls(), 0);
}

#[tokio::test]
async fn malformed_blob_is_treated_as_empty() {
    let medium = MemoryMedium::new();
    medium.put_raw(DEFAULT_STORAGE_KEY, "{not json");
    let store = Arc::new(PersistentRecordStore::new(
        Arc::new(medium.clone()),
        DEFAULT_STORAGE_KEY,
        DEFAULT_TTL,
    ));
    let h = Harness::with_store(
        ScriptedBackend::new().with_record("U1", "Alice"),
        EngineConfig::default(),
        store,
    );

    let record = h.engine.resolve_one(&EntityId::from("U1")).await;

    assert_eq!(record.display_name, "Alice");
    let blob = medium.get_raw(DEFAULT_STORAGE_KEY).unwrap();
    assert!(blob.contains("\"displayName\":\"Alice\""));
    assert!(blob.contains("writtenAtEpochMs"));
}

#[tokio::test]
async fn store_stats_track_freshness() {
    let h = Harness::new(ScriptedBackend::new().with_named(&["A", "B"]));
    h.seed("C", "Old C", 10);
    h.engine.resolve_many(&ids(&["A", "B"])).await;

    let stats = h.engine.store_stats();
    assert_eq!(stats.entry_count, 3);
    assert_eq!(stats.fresh_count, 2);
}

#[tokio::test]
async fn slow_flush_does_not_stall_the_runtime() {
    let store = Arc::new(PersistentRecordStore::new(
        Arc::new(SlowMedium::default()),
        DEFAULT_STORAGE_KEY,
        DEFAULT_TTL,
    ));
    let h = Harness::with_store(
        ScriptedBackend::new().with_named(&["U1", "U2"]),
        EngineConfig::default(),
        store,
    );
    let resolving = AtomicBool::new(true);

    let resolve = async {
        let records = h.engine.resolve_many(&ids(&["U1", "U2"])).await;
        resolving.store(false, Ordering::SeqCst);
        records
    };
    let ticker = async {
        let mut ticks = 0usize;
        while resolving.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ticks += 1;
        }
        ticks
    };
    let (records, ticks) = futures::join!(resolve, ticker);

    assert_eq!(records.len(), 2);
    assert_eq!(h.store.entry_count(), 2);
    // the 60ms flush ran off the runtime thread
    assert!(ticks >= 5, "runtime stalled: {ticks} ticks");
}
