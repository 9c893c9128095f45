//! Error types for the Roster data model

use chrono::NaiveDate;

/// Invalid model input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Metric name not recognised
    #[error("unknown metric: '{0}' (expected 'given' or 'received')")]
    UnknownMetric(String),

    /// Date not in `YYYY-MM-DD` form
    #[error("invalid date: '{0}'")]
    InvalidDate(String),

    /// Range ends before it starts
    #[error("date range is inverted: {start} > {end}")]
    InvertedRange {
        /// Requested start
        start: NaiveDate,
        /// Requested end
        end: NaiveDate,
    },
}
