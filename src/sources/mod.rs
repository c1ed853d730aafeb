//! Price source implementations (JSON API, Gold Traders scraper)

mod api;
mod goldtraders;

pub use api::ApiSource;
pub use goldtraders::GoldTradersSource;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::error::FetchError;
use crate::types::{PriceChange, Quote, SourceType};

/// Years above this are Buddhist era
const BUDDHIST_ERA_CUTOFF: i32 = 2400;
const BUDDHIST_ERA_OFFSET: i32 = 543;

/// What a source reports before the core stamps and classifies it.
/// `None` change fields are derived from history later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuote {
    pub bar: Quote,
    pub ornament: Quote,
    pub update_time: Option<DateTime<Utc>>,
    pub price_change: Option<PriceChange>,
    pub today_change: Option<PriceChange>,
    pub change_count: Option<u32>,
}

/// Trait for price source clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Tag stamped on records from this source
    fn source_type(&self) -> SourceType;

    /// Fetch and normalize one observation
    async fn fetch(&self) -> Result<SourceQuote, FetchError>;
}

/// Shared HTTP client with the configured timeout and user agent
pub fn build_http_client(config: &SourcesConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .context("Failed to create HTTP client")
}

/// Parse "41,500.00" style amounts
pub(crate) fn parse_amount(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

fn announcement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})\D*?(\d{1,2})[:.](\d{2})")
            .expect("announcement pattern is valid")
    })
}

fn round_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ครั้งที่\s*(\d+)").expect("round pattern is valid"))
}

/// Parse an announcement such as
/// "ประกาศวันที่ 03/02/2569 เวลา 10:54 น. (ครั้งที่ 19)"
/// into the declared update instant and the announcement round.
pub(crate) fn parse_announcement(text: &str, tz: Tz) -> (Option<DateTime<Utc>>, Option<u32>) {
    let update_time = announcement_re().captures(text).and_then(|caps| {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        if year > BUDDHIST_ERA_CUTOFF {
            year -= BUDDHIST_ERA_OFFSET;
        }
        let hour: u32 = caps[4].parse().ok()?;
        let minute: u32 = caps[5].parse().ok()?;

        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        tz.from_local_datetime(&date.and_time(time))
            .single()
            .map(|local| local.with_timezone(&Utc))
    });

    let round = round_re()
        .captures(text)
        .and_then(|caps| caps[1].parse::<u32>().ok());

    (update_time, round)
}

fn require_positive(value: Option<Decimal>, what: &str) -> Result<Decimal, FetchError> {
    match value {
        Some(v) if v > Decimal::ZERO => Ok(v),
        _ => Err(FetchError::Parse(format!("missing {}", what))),
    }
}
