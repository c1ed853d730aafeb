//! Primary source: JSON gold price API
//!
//! Response shape:
//! `{"current_prices": {"gold_bar": {"buy", "sell", "change"}, "gold_ornament": {...}},
//!   "metadata": {"publish_date", "last_updated", "update_info"}}`

use async_trait::async_trait;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use super::{parse_amount, parse_announcement, require_positive, PriceSource, SourceQuote};
use crate::error::FetchError;
use crate::types::{PriceChange, Quote, SourceType};

#[derive(Debug, Deserialize)]
struct ApiPayload {
    current_prices: CurrentPrices,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct CurrentPrices {
    gold_bar: ApiQuote,
    gold_ornament: ApiQuote,
}

#[derive(Debug, Deserialize)]
struct ApiQuote {
    #[serde(default)]
    buy: Value,
    #[serde(default)]
    sell: Value,
    #[serde(default)]
    change: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    publish_date: Option<String>,
    last_updated: Option<String>,
    update_info: Option<String>,
}

/// Amounts arrive as numbers or formatted strings
fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// JSON API client
pub struct ApiSource {
    client: reqwest::Client,
    url: String,
    tz: Tz,
}

impl ApiSource {
    pub fn new(client: reqwest::Client, url: &str, tz: Tz) -> Self {
        Self {
            client,
            url: url.to_string(),
            tz,
        }
    }

    /// Normalize a response body
    pub fn parse(body: &str, tz: Tz) -> Result<SourceQuote, FetchError> {
        let payload: ApiPayload =
            serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;
        let prices = &payload.current_prices;

        let bar = Quote::new(
            require_positive(value_to_decimal(&prices.gold_bar.buy), "gold bar buy")?,
            require_positive(value_to_decimal(&prices.gold_bar.sell), "gold bar sell")?,
        );
        let ornament = Quote::new(
            require_positive(
                value_to_decimal(&prices.gold_ornament.buy),
                "gold ornament buy",
            )?,
            require_positive(
                value_to_decimal(&prices.gold_ornament.sell),
                "gold ornament sell",
            )?,
        );

        // The API publishes a single signed move for the latest announcement,
        // which also stands in for the day's move.
        let change = prices
            .gold_bar
            .change
            .as_ref()
            .and_then(value_to_decimal)
            .map(PriceChange::from_delta);

        let metadata = &payload.metadata;
        let (mut update_time, change_count) = metadata
            .update_info
            .as_deref()
            .map(|info| parse_announcement(info, tz))
            .unwrap_or((None, None));
        if update_time.is_none() {
            if let (Some(date), Some(time)) = (&metadata.publish_date, &metadata.last_updated) {
                update_time = parse_announcement(&format!("{} {}", date, time), tz).0;
            }
        }

        Ok(SourceQuote {
            bar,
            ornament,
            update_time,
            price_change: change,
            today_change: change,
            change_count,
        })
    }
}

#[async_trait]
impl PriceSource for ApiSource {
    fn source_type(&self) -> SourceType {
        SourceType::Api
    }

    async fn fetch(&self) -> Result<SourceQuote, FetchError> {
        tracing::debug!(source = %"api", url = %self.url, "Fetching gold prices");

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        let quote = Self::parse(&body, self.tz)?;

        tracing::debug!(
            source = %"api",
            bar_sell = %quote.bar.sell,
            ornament_sell = %quote.ornament.sell,
            "Fetched gold prices"
        );
        Ok(quote)
    }
}
