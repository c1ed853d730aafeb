//! Secondary source: Gold Traders Association price page
//!
//! The page exposes prices in labelled spans. It carries no change values,
//! so price and daily moves are derived from history by the scheduler.

use async_trait::async_trait;
use chrono_tz::Tz;
use scraper::{Html, Selector};

use super::{parse_amount, parse_announcement, require_positive, PriceSource, SourceQuote};
use crate::error::FetchError;
use crate::types::{Quote, SourceType};

const BAR_SELL_ID: &str = "DetailPlace_uc_goldprices1_lblBLSell";
const BAR_BUY_ID: &str = "DetailPlace_uc_goldprices1_lblBLBuy";
const ORNAMENT_SELL_ID: &str = "DetailPlace_uc_goldprices1_lblOMSell";
const ORNAMENT_BUY_ID: &str = "DetailPlace_uc_goldprices1_lblOMBuy";
const AS_OF_ID: &str = "DetailPlace_uc_goldprices1_lblAsTime";

fn span_text(document: &Html, id: &str) -> Option<String> {
    let selector = Selector::parse(&format!("span#{}", id)).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// HTML scraper client
pub struct GoldTradersSource {
    client: reqwest::Client,
    url: String,
    tz: Tz,
}

impl GoldTradersSource {
    pub fn new(client: reqwest::Client, url: &str, tz: Tz) -> Self {
        Self {
            client,
            url: url.to_string(),
            tz,
        }
    }

    /// Normalize a price page
    pub fn parse(html: &str, tz: Tz) -> Result<SourceQuote, FetchError> {
        let document = Html::parse_document(html);
        let amount = |id: &str| span_text(&document, id).and_then(|t| parse_amount(&t));

        let bar = Quote::new(
            require_positive(amount(BAR_BUY_ID), "gold bar buy")?,
            require_positive(amount(BAR_SELL_ID), "gold bar sell")?,
        );
        let ornament = Quote::new(
            require_positive(amount(ORNAMENT_BUY_ID), "gold ornament buy")?,
            require_positive(amount(ORNAMENT_SELL_ID), "gold ornament sell")?,
        );

        let (update_time, change_count) = span_text(&document, AS_OF_ID)
            .map(|text| parse_announcement(&text, tz))
            .unwrap_or((None, None));

        Ok(SourceQuote {
            bar,
            ornament,
            update_time,
            price_change: None,
            today_change: None,
            change_count,
        })
    }
}

#[async_trait]
impl PriceSource for GoldTradersSource {
    fn source_type(&self) -> SourceType {
        SourceType::Scraper
    }

    async fn fetch(&self) -> Result<SourceQuote, FetchError> {
        tracing::debug!(source = %"scraper", url = %self.url, "Fetching price page");

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let html = response.text().await?;

        // Html is not Send; keep parsing out of any await point
        Self::parse(&html, self.tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const BANGKOK: Tz = chrono_tz::Asia::Bangkok;

    fn page(bar_sell: &str) -> String {
        format!(
            r#"<html><body><table>
            <tr><td><span id="DetailPlace_uc_goldprices1_lblBLSell">{}</span></td>
                <td><span id="DetailPlace_uc_goldprices1_lblBLBuy">41,400.00</span></td></tr>
            <tr><td><span id="DetailPlace_uc_goldprices1_lblOMSell">42,300.00</span></td>
                <td><span id="DetailPlace_uc_goldprices1_lblOMBuy">40,643.60</span></td></tr>
            </table>
            <span id="DetailPlace_uc_goldprices1_lblAsTime">03/02/2569 เวลา 10:54 น. (ครั้งที่ 19)</span>
            </body></html>"#,
            bar_sell
        )
    }

    #[test]
    fn test_parse_price_page() {
        let quote = GoldTradersSource::parse(&page("41,500.00"), BANGKOK).unwrap();
        assert_eq!(quote.bar, Quote::new(dec!(41400.00), dec!(41500.00)));
        assert_eq!(quote.ornament, Quote::new(dec!(40643.60), dec!(42300.00)));
        assert_eq!(quote.change_count, Some(19));
        assert!(quote.update_time.is_some());
        assert!(quote.price_change.is_none());
        assert!(quote.today_change.is_none());
    }

    #[test]
    fn test_parse_missing_price_is_parse_error() {
        let result = GoldTradersSource::parse(&page(""), BANGKOK);
        assert!(matches!(result, Err(FetchError::Parse(msg)) if msg.contains("bar sell")));
    }
}
