//! Roster Model - shared vocabulary of the resolution engine
//!
//! - [`EntityId`]: opaque identifier, the only key used anywhere
//! - [`Record`]: what an identifier resolves to
//! - [`CacheEntry`]: a record plus its write timestamp
//! - [`Metric`] and [`DateRange`]: the shape of an aggregate query
//! - [`rank_top`]: the one ranking rule every leaderboard applies

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod ranking;
pub mod types;

pub use error::ModelError;
pub use ranking::{rank_positions, rank_top, RankChange, RankedEntry};
pub use types::{CacheEntry, DateRange, EntityId, Metric, Record, DATE_FORMAT};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
