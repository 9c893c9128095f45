//! Core types for Roster
//!
//! Defines the fundamental values that flow through the engine:
//! - Entity identifiers and their resolved display records
//! - Cache entries with write timestamps
//! - Aggregate metrics and inclusive date ranges

use crate::error::ModelError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::str::FromStr;
use std::time::Duration;

/// Date format used on the wire and on the command line
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Opaque identifier of a person or account
///
/// The sole key everywhere: store, in-flight registry and result maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create a new identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Human-facing representation of an [`EntityId`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Name shown in tables and charts
    pub display_name: String,
    /// Avatar image location, if the backend knows one
    pub avatar_url: Option<String>,
}

impl Record {
    /// Create a record
    #[inline]
    #[must_use]
    pub fn new(display_name: impl Into<String>, avatar_url: Option<String>) -> Self {
        Self {
            display_name: display_name.into(),
            avatar_url,
        }
    }

    /// Degraded record used when nothing better is known
    ///
    /// The identifier doubles as the display name and there is no avatar.
    #[inline]
    #[must_use]
    pub fn synthetic(id: &EntityId) -> Self {
        Self {
            display_name: id.as_str().to_string(),
            avatar_url: None,
        }
    }

    /// Whether the backend supplied a usable name
    ///
    /// Deactivated accounts come back with an empty name; those are not
    /// worth caching.
    #[inline]
    #[must_use]
    pub fn is_named(&self) -> bool {
        !self.display_name.trim().is_empty()
    }

    /// First letter of the display name, used for avatar placeholders
    #[must_use]
    pub fn initial(&self) -> Option<char> {
        self.display_name
            .chars()
            .next()
            .map(|c| c.to_uppercase().next().unwrap_or(c))
    }
}

/// A record together with the moment it was written to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Cached record
    #[serde(flatten)]
    pub record: Record,
    /// Write time in milliseconds since the Unix epoch
    pub written_at_epoch_ms: i64,
}

impl CacheEntry {
    /// Create entry written at `now_ms`
    #[inline]
    #[must_use]
    pub fn new(record: Record, now_ms: i64) -> Self {
        Self {
            record,
            written_at_epoch_ms: now_ms,
        }
    }

    /// Age of the entry at `now_ms`
    ///
    /// Entries stamped in the future count as zero age.
    #[inline]
    #[must_use]
    pub fn age_ms(&self, now_ms: i64) -> u64 {
        u64::try_from(now_ms.saturating_sub(self.written_at_epoch_ms)).unwrap_or(0)
    }

    /// Fresh iff `now - written_at <= ttl`
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        u128::from(self.age_ms(now_ms)) <= ttl.as_millis()
    }
}

/// Counter being aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Things an entity handed out
    Given,
    /// Things an entity was handed
    Received,
}

impl Metric {
    /// Wire name of the metric
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Given => "given",
            Metric::Received => "received",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "given" => Ok(Metric::Given),
            "received" => Ok(Metric::Received),
            other => Err(ModelError::UnknownMetric(other.to_string())),
        }
    }
}

/// Inclusive calendar date range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Create range
    ///
    /// # Errors
    /// - `ModelError::InvertedRange` if `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ModelError> {
        if start > end {
            return Err(ModelError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a range from two `YYYY-MM-DD` strings
    ///
    /// # Errors
    /// - `ModelError::InvalidDate` if either date does not parse
    /// - `ModelError::InvertedRange` if `start > end`
    pub fn parse(start: &str, end: &str) -> Result<Self, ModelError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// First day of the range
    #[inline]
    #[must_use]
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the range
    #[inline]
    #[must_use]
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Start date formatted for query strings
    #[must_use]
    pub fn start_param(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    /// End date formatted for query strings
    #[must_use]
    pub fn end_param(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start_param(), self.end_param())
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ModelError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| ModelError::InvalidDate(raw.to_string()))
}
