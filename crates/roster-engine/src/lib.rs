//! Roster Engine - entity resolution and aggregation
//!
//! A process-wide layer between dashboard panels and the backend that:
//! - Serves resolved records from a durable, time-bounded store
//! - Coalesces concurrent fetches of one identifier into a single call
//! - Batches large identifier sets, retrying small failed remainders
//! - Fans aggregate queries out through a bounded worker pool
//!
//! # Example
//!
//! ```rust,ignore
//! use roster_engine::{Engine, EngineConfig, LeaderboardRequest};
//! use roster_model::{DateRange, Metric};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::from_config(EngineConfig::new().with_base_url("http://localhost:8080/api"))?;
//!
//! let range = DateRange::parse("2024-01-01", "2024-01-31")?;
//! let board = engine
//!     .leaderboard(&LeaderboardRequest::new(Metric::Received, range, 10))
//!     .await?;
//!
//! for row in &board.rows {
//!     println!("{} {} {}", row.rank, row.record.display_name, row.count);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod aggregator;
pub mod backend;
pub mod clock;
pub mod coalescer;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod resolver;

pub use aggregator::{AggregateQuery, AggregateReport, Aggregator};
pub use backend::{Backend, HttpBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coalescer::{Pending, RequestCoalescer};
pub use config::{EngineConfig, MAX_BATCH_SIZE};
pub use engine::{Engine, Leaderboard, LeaderboardRequest, LeaderboardRow, Session, PREVIOUS_RANK_DEPTH};
pub use error::{ConfigError, EngineError, FetchError};
pub use pool::{BoundedPool, PoolOutcome, PoolStats};
pub use resolver::{BatchResolver, FetchOutcome, Resolution, ResolveStats, ResolverLimits};
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the engine
    pub use crate::{
        AggregateReport, Backend, CancellationToken, Engine, EngineConfig, EngineError, Leaderboard,
        LeaderboardRequest, Session,
    };
    pub use roster_model::{DateRange, EntityId, Metric, RankChange, Record};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
