//! Core types used throughout ThaiGold
//!
//! Defines the normalized price snapshot and its building blocks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Buy/sell quote for one gold product (THB per baht-weight)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub buy: Decimal,
    pub sell: Decimal,
}

impl Quote {
    pub fn new(buy: Decimal, sell: Decimal) -> Self {
        Self { buy, sell }
    }

    /// Upstream data occasionally publishes sell below buy
    pub fn is_inverted(&self) -> bool {
        self.sell < self.buy
    }
}

/// Direction of a price move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    #[default]
    Unchanged,
}

impl Direction {
    pub fn from_delta(delta: Decimal) -> Self {
        if delta > Decimal::ZERO {
            Direction::Up
        } else if delta < Decimal::ZERO {
            Direction::Down
        } else {
            Direction::Unchanged
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Unsigned amount plus direction. `amount` is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceChange {
    pub amount: Decimal,
    pub direction: Direction,
}

impl PriceChange {
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Build from a signed delta
    pub fn from_delta(delta: Decimal) -> Self {
        Self {
            amount: delta.abs(),
            direction: Direction::from_delta(delta),
        }
    }

    /// Signed representation (down moves are negative)
    pub fn signed(&self) -> Decimal {
        match self.direction {
            Direction::Up => self.amount,
            Direction::Down => -self.amount,
            Direction::Unchanged => Decimal::ZERO,
        }
    }
}

/// Which source produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Primary JSON price API
    Api,
    /// Secondary HTML scraper
    Scraper,
    /// Earlier primary result re-served because every live source failed
    Cached,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Api => write!(f, "api"),
            SourceType::Scraper => write!(f, "scraper"),
            SourceType::Cached => write!(f, "cached"),
        }
    }
}

/// Source selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Api,
    Scraper,
    #[default]
    Auto,
}

impl FromStr for SourceMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" => Ok(SourceMode::Api),
            "scraper" => Ok(SourceMode::Scraper),
            "auto" => Ok(SourceMode::Auto),
            _ => Err(ValidationError::UnknownSourceMode(s.to_string())),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Api => write!(f, "api"),
            SourceMode::Scraper => write!(f, "scraper"),
            SourceMode::Auto => write!(f, "auto"),
        }
    }
}

/// Normalized snapshot of one price observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Capture instant
    pub timestamp: DateTime<Utc>,
    pub bar: Quote,
    pub ornament: Quote,
    /// Latest single-step move of the bar sell price
    pub price_change: PriceChange,
    /// Cumulative move since the start of the trading day
    pub today_change: PriceChange,
    /// Official announcements so far today
    pub change_count: u32,
    pub source_type: SourceType,
    /// Update time declared by the source itself
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_stale: bool,
}

impl PriceRecord {
    pub fn has_inverted_quote(&self) -> bool {
        self.bar.is_inverted() || self.ornament.is_inverted()
    }

    /// Age of the source-declared update time relative to `now`
    pub fn update_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.update_time.map(|t| now - t)
    }

    /// Re-tag an earlier primary result for serving after every source failed
    pub fn as_cached(&self) -> Self {
        Self {
            source_type: SourceType::Cached,
            is_stale: true,
            ..self.clone()
        }
    }
}
