//! Error taxonomy
//!
//! Source failures are classified and never escape the refresh loop;
//! validation and rate-limit errors are returned to the caller as-is.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::types::SourceType;

/// Why a single outbound fetch failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("could not parse response: {0}")]
    Parse(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Errors surfaced by the core read/write API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GoldError {
    /// One source failed (network, HTTP or parse)
    #[error("{origin} source unavailable: {reason}")]
    SourceUnavailable {
        origin: SourceType,
        reason: FetchError,
    },

    /// Both sources failed and nothing recent could be re-served
    #[error("all sources unavailable (api: {primary}; scraper: {secondary})")]
    AllSourcesUnavailable {
        primary: FetchError,
        secondary: FetchError,
    },

    /// Manual refresh inside the cooldown window
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Commit refused by the history ordering rules
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Statistics requested on empty history
    #[error("no data available")]
    NoData,

    #[error("no price recorded yet")]
    NotFound,
}

/// Rejected settings input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("base interval must be between {min} and {max} seconds, got {value}")]
    IntervalOutOfRange { value: i64, min: u64, max: u64 },

    #[error("unknown source mode '{0}' (expected api, scraper or auto)")]
    UnknownSourceMode(String),

    #[error("invalid time '{value}' for {field} (expected HH:MM)")]
    InvalidTime { field: String, value: String },
}

/// Rejected history insert
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("record at {0} already exists")]
    DuplicateTimestamp(DateTime<Utc>),

    #[error("record at {timestamp} is older than latest {latest}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// Advisory: the data is served but its source-declared update time is old
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleData {
    pub origin: SourceType,
    pub age_secs: i64,
}

impl fmt::Display for StaleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} data last updated {}m ago",
            self.origin,
            self.age_secs / 60
        )
    }
}
