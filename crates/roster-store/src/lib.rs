//! Roster Record Store
//!
//! The durable half of the resolution engine: a time-bounded cache of
//! resolved records that survives process restarts.
//!
//! # Architecture
//!
//! ```text
//! PersistentRecordStore ── one JSON blob ──> StorageMedium (file | memory)
//!        │
//!        └─ lazily loaded HashMap<EntityId, CacheEntry>
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use roster_store::{FileMedium, PersistentRecordStore, DEFAULT_STORAGE_KEY, DEFAULT_TTL};
//!
//! let store = PersistentRecordStore::new(
//!     Arc::new(FileMedium::new("/var/cache/roster")),
//!     DEFAULT_STORAGE_KEY,
//!     DEFAULT_TTL,
//! );
//! store.write(EntityId::from("U1"), Record::new("Alice", None), now_ms);
//! assert!(store.read_fresh("U1", now_ms).is_some());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod medium;
pub mod store;

pub use error::StoreError;
pub use medium::{FileMedium, MemoryMedium, StorageMedium};
pub use store::{
    FreshPartition, PersistentRecordStore, StoreStats, DEFAULT_STORAGE_KEY, DEFAULT_TTL,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
