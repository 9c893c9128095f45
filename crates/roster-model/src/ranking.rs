//! Leaderboard ranking
//!
//! Every panel that turns an aggregate map into a ranking goes through
//! [`rank_top`], so leaderboards and chart rankings agree: sort by count
//! descending, drop zero counts, truncate to the requested top-N.

use crate::types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::BuildHasher;

/// One ranked identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Ranked identifier
    pub id: EntityId,
    /// Aggregated count
    pub count: u64,
    /// 1-based position
    pub rank: usize,
}

/// Rank an aggregate map
///
/// Ties are broken by identifier so the output is deterministic.
#[must_use]
pub fn rank_top<S: BuildHasher>(counts: &HashMap<EntityId, u64, S>, limit: usize) -> Vec<RankedEntry> {
    let mut entries: Vec<(&EntityId, u64)> = counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(id, count)| (id, *count))
        .collect();

    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.truncate(limit);

    entries
        .into_iter()
        .enumerate()
        .map(|(i, (id, count))| RankedEntry {
            id: id.clone(),
            count,
            rank: i + 1,
        })
        .collect()
}

/// Map each ranked identifier to its 1-based position
#[must_use]
pub fn rank_positions(entries: &[RankedEntry]) -> HashMap<EntityId, usize> {
    entries.iter().map(|e| (e.id.clone(), e.rank)).collect()
}

/// Movement of an identifier relative to a previous ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "places", rename_all = "lowercase")]
pub enum RankChange {
    /// Not present in the previous ranking
    New,
    /// Same position
    Same,
    /// Moved towards rank 1 by this many places
    Up(usize),
    /// Moved away from rank 1 by this many places
    Down(usize),
}

impl RankChange {
    /// Compare a current rank against an optional previous rank
    #[must_use]
    pub fn between(current: usize, previous: Option<usize>) -> Self {
        match previous {
            None => RankChange::New,
            Some(prev) if prev == current => RankChange::Same,
            Some(prev) if prev > current => RankChange::Up(prev - current),
            Some(prev) => RankChange::Down(current - prev),
        }
    }

    /// Moves of three or more places
    #[inline]
    #[must_use]
    pub fn is_large(&self) -> bool {
        matches!(self, RankChange::Up(n) | RankChange::Down(n) if *n >= 3)
    }
}

impl std::fmt::Display for RankChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankChange::New => f.write_str("NEW"),
            RankChange::Same => f.write_str("="),
            RankChange::Up(n) => write!(f, "+{n}"),
            RankChange::Down(n) => write!(f, "-{n}"),
        }
    }
}
