//! Source selection - priority order, staleness policy and fallback
//!
//! The policy is a pure function over the outcomes gathered so far
//! ([`resolve`]); [`SourceSelector`] only performs the fetches it asks for.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FetchError, GoldError, StaleData};
use crate::sources::{PriceSource, SourceQuote};
use crate::types::{PriceChange, PriceRecord, SourceMode, SourceType};

/// Default staleness threshold for source-declared update times
pub const DEFAULT_STALENESS_SECS: i64 = 30 * 60;

/// Position of a source in the priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Primary,
    Secondary,
}

/// Change fields the source did not supply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingFields {
    pub price_change: bool,
    pub today_change: bool,
    pub change_count: bool,
}

impl MissingFields {
    pub fn any(&self) -> bool {
        self.price_change || self.today_change || self.change_count
    }
}

/// A source observation stamped with capture time and staleness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub record: PriceRecord,
    pub missing: MissingFields,
}

impl Observation {
    /// Stamp a source quote. Staleness uses the source-declared update
    /// time; a quote without one is treated as fresh.
    pub fn from_quote(
        quote: SourceQuote,
        source_type: SourceType,
        captured_at: DateTime<Utc>,
        staleness: ChronoDuration,
    ) -> Self {
        let is_stale = quote
            .update_time
            .map(|t| captured_at - t > staleness)
            .unwrap_or(false);
        let missing = MissingFields {
            price_change: quote.price_change.is_none(),
            today_change: quote.today_change.is_none(),
            change_count: quote.change_count.is_none(),
        };

        let record = PriceRecord {
            timestamp: captured_at,
            bar: quote.bar,
            ornament: quote.ornament,
            price_change: quote.price_change.unwrap_or_else(PriceChange::unchanged),
            today_change: quote.today_change.unwrap_or_else(PriceChange::unchanged),
            change_count: quote.change_count.unwrap_or(0),
            source_type,
            update_time: quote.update_time,
            is_stale,
        };

        Self { record, missing }
    }
}

/// Result of one source attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub role: SourceRole,
    pub origin: SourceType,
    pub result: Result<Observation, FetchError>,
}

/// Authoritative observation returned by the selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub record: PriceRecord,
    pub missing: MissingFields,
    /// Set when the served record is stale
    pub advisory: Option<StaleData>,
    /// The primary was skipped over for this selection
    pub fell_back: bool,
}

/// Next step of the selection policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Fetch(SourceRole),
    Accept(Selection),
    Fail(GoldError),
}

fn accept(observation: &Observation, now: DateTime<Utc>, fell_back: bool) -> Decision {
    let record = &observation.record;
    let advisory = record.is_stale.then(|| StaleData {
        origin: record.source_type,
        age_secs: record
            .update_age(now)
            .map(|age| age.num_seconds())
            .unwrap_or_default(),
    });
    Decision::Accept(Selection {
        record: record.clone(),
        missing: observation.missing,
        advisory,
        fell_back,
    })
}

fn single_source(role: SourceRole, outcomes: &[Outcome], now: DateTime<Utc>) -> Decision {
    match outcomes.first() {
        None => Decision::Fetch(role),
        Some(outcome) => match &outcome.result {
            Ok(observation) => accept(observation, now, false),
            Err(reason) => Decision::Fail(GoldError::SourceUnavailable {
                origin: outcome.origin,
                reason: reason.clone(),
            }),
        },
    }
}

/// Selection policy over the outcomes gathered so far.
///
/// `cached` is the latest primary record from recent history, re-served
/// when every live source fails in `auto` mode.
pub fn resolve(
    mode: SourceMode,
    outcomes: &[Outcome],
    cached: Option<&PriceRecord>,
    now: DateTime<Utc>,
) -> Decision {
    match mode {
        SourceMode::Api => single_source(SourceRole::Primary, outcomes, now),
        SourceMode::Scraper => single_source(SourceRole::Secondary, outcomes, now),
        SourceMode::Auto => {
            let primary = outcomes.iter().find(|o| o.role == SourceRole::Primary);
            let secondary = outcomes.iter().find(|o| o.role == SourceRole::Secondary);

            match (primary, secondary) {
                (None, _) => Decision::Fetch(SourceRole::Primary),
                (Some(p), None) => match &p.result {
                    Ok(observation) if !observation.record.is_stale => {
                        accept(observation, now, false)
                    }
                    _ => Decision::Fetch(SourceRole::Secondary),
                },
                (Some(p), Some(s)) => match (&p.result, &s.result) {
                    (_, Ok(observation)) => accept(observation, now, true),
                    (Ok(stale_primary), Err(_)) => accept(stale_primary, now, false),
                    (Err(primary_err), Err(secondary_err)) => match cached {
                        Some(record) => {
                            let cached = record.as_cached();
                            let age_secs = cached
                                .update_age(now)
                                .unwrap_or_else(|| now - cached.timestamp)
                                .num_seconds();
                            Decision::Accept(Selection {
                                record: cached,
                                missing: MissingFields::default(),
                                advisory: Some(StaleData {
                                    origin: SourceType::Cached,
                                    age_secs,
                                }),
                                fell_back: true,
                            })
                        }
                        None => Decision::Fail(GoldError::AllSourcesUnavailable {
                            primary: primary_err.clone(),
                            secondary: secondary_err.clone(),
                        }),
                    },
                },
            }
        }
    }
}

/// Fetches from the primary and secondary sources as the policy asks
pub struct SourceSelector {
    primary: Arc<dyn PriceSource>,
    secondary: Arc<dyn PriceSource>,
    fetch_timeout: Duration,
    staleness: ChronoDuration,
}

impl SourceSelector {
    pub fn new(
        primary: Arc<dyn PriceSource>,
        secondary: Arc<dyn PriceSource>,
        fetch_timeout: Duration,
        staleness: ChronoDuration,
    ) -> Self {
        Self {
            primary,
            secondary,
            fetch_timeout,
            staleness,
        }
    }

    /// Per-source deadline
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Pick one authoritative observation for `mode`
    pub async fn select(
        &self,
        mode: SourceMode,
        now: DateTime<Utc>,
        cached: Option<&PriceRecord>,
    ) -> Result<Selection, GoldError> {
        let mut outcomes = Vec::with_capacity(2);
        loop {
            match resolve(mode, &outcomes, cached, now) {
                Decision::Fetch(role) => {
                    let outcome = self.attempt(role, now).await;
                    outcomes.push(outcome);
                }
                Decision::Accept(selection) => {
                    if selection.fell_back {
                        tracing::info!(
                            mode = %mode,
                            source = %selection.record.source_type,
                            "Primary source skipped, using fallback"
                        );
                    }
                    return Ok(selection);
                }
                Decision::Fail(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, role: SourceRole, now: DateTime<Utc>) -> Outcome {
        let source = match role {
            SourceRole::Primary => &self.primary,
            SourceRole::Secondary => &self.secondary,
        };
        let origin = source.source_type();

        let result = match tokio::time::timeout(self.fetch_timeout, source.fetch()).await {
            Ok(Ok(quote)) => Ok(Observation::from_quote(quote, origin, now, self.staleness)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout.as_secs())),
        };

        match &result {
            Ok(observation) if observation.record.is_stale => {
                tracing::warn!(source = %origin, "Source returned stale data");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(source = %origin, error = %err, "Source fetch failed");
            }
        }

        Outcome {
            role,
            origin,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockPriceSource;
    use crate::types::Quote;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 4, 0, 0).unwrap()
    }

    fn quote(sell: rust_decimal::Decimal, updated_mins_ago: i64) -> SourceQuote {
        SourceQuote {
            bar: Quote::new(sell - dec!(100), sell),
            ornament: Quote::new(sell - dec!(900), sell + dec!(800)),
            update_time: Some(now() - ChronoDuration::minutes(updated_mins_ago)),
            price_change: None,
            today_change: None,
            change_count: Some(3),
        }
    }

    fn mock(
        source_type: SourceType,
        result: Result<SourceQuote, FetchError>,
        times: usize,
    ) -> Arc<dyn PriceSource> {
        let mut mock = MockPriceSource::new();
        mock.expect_source_type().return_const(source_type);
        mock.expect_fetch()
            .times(times)
            .returning(move || result.clone());
        Arc::new(mock)
    }

    fn selector(primary: Arc<dyn PriceSource>, secondary: Arc<dyn PriceSource>) -> SourceSelector {
        SourceSelector::new(
            primary,
            secondary,
            Duration::from_secs(5),
            ChronoDuration::seconds(DEFAULT_STALENESS_SECS),
        )
    }

    #[tokio::test]
    async fn test_auto_uses_fresh_primary_without_calling_secondary() {
        let selector = selector(
            mock(SourceType::Api, Ok(quote(dec!(41500), 5)), 1),
            mock(SourceType::Scraper, Ok(quote(dec!(41600), 5)), 0),
        );

        let selection = selector.select(SourceMode::Auto, now(), None).await.unwrap();
        assert_eq!(selection.record.source_type, SourceType::Api);
        assert!(!selection.fell_back);
        assert!(selection.advisory.is_none());
    }

    #[tokio::test]
    async fn test_auto_falls_back_when_primary_is_stale() {
        let selector = selector(
            mock(SourceType::Api, Ok(quote(dec!(41500), 45)), 1),
            mock(SourceType::Scraper, Ok(quote(dec!(41600), 2)), 1),
        );

        let selection = selector.select(SourceMode::Auto, now(), None).await.unwrap();
        assert_eq!(selection.record.source_type, SourceType::Scraper);
        assert_eq!(selection.record.bar.sell, dec!(41600));
        assert!(selection.fell_back);
    }

    #[tokio::test]
    async fn test_auto_returns_stale_primary_when_secondary_fails() {
        let selector = selector(
            mock(SourceType::Api, Ok(quote(dec!(41500), 45)), 1),
            mock(SourceType::Scraper, Err(FetchError::Status(503)), 1),
        );

        let selection = selector.select(SourceMode::Auto, now(), None).await.unwrap();
        assert_eq!(selection.record.source_type, SourceType::Api);
        assert!(selection.record.is_stale);
        assert_eq!(selection.advisory.unwrap().age_secs, 45 * 60);
    }

    #[tokio::test]
    async fn test_api_mode_never_falls_back() {
        let selector = selector(
            mock(SourceType::Api, Err(FetchError::Network("refused".into())), 1),
            mock(SourceType::Scraper, Ok(quote(dec!(41600), 2)), 0),
        );

        let err = selector
            .select(SourceMode::Api, now(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GoldError::SourceUnavailable {
                origin: SourceType::Api,
                reason: FetchError::Network("refused".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_scraper_mode_only_calls_secondary() {
        let selector = selector(
            mock(SourceType::Api, Ok(quote(dec!(41500), 1)), 0),
            mock(SourceType::Scraper, Ok(quote(dec!(41600), 45)), 1),
        );

        let selection = selector
            .select(SourceMode::Scraper, now(), None)
            .await
            .unwrap();
        assert_eq!(selection.record.source_type, SourceType::Scraper);
        assert!(selection.record.is_stale);
        assert!(selection.advisory.is_some());
    }

    /// Accepts the request and never answers
    struct Unresponsive(SourceType);

    #[async_trait::async_trait]
    impl PriceSource for Unresponsive {
        fn source_type(&self) -> SourceType {
            self.0
        }

        async fn fetch(&self) -> Result<SourceQuote, FetchError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_mode_timeout_is_source_unavailable() {
        let selector = selector(
            Arc::new(Unresponsive(SourceType::Api)),
            mock(SourceType::Scraper, Ok(quote(dec!(41600), 2)), 0),
        );

        let started = tokio::time::Instant::now();
        let err = selector
            .select(SourceMode::Api, now(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GoldError::SourceUnavailable {
                origin: SourceType::Api,
                reason: FetchError::Timeout(5),
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_mode_falls_back_after_primary_timeout() {
        let selector = selector(
            Arc::new(Unresponsive(SourceType::Api)),
            mock(SourceType::Scraper, Ok(quote(dec!(41600), 2)), 1),
        );

        let selection = selector.select(SourceMode::Auto, now(), None).await.unwrap();
        assert_eq!(selection.record.source_type, SourceType::Scraper);
        assert_eq!(selection.record.bar.sell, dec!(41600));
        assert!(selection.fell_back);
    }

    #[test]
    fn test_resolve_both_failed_without_cache() {
        let outcomes = vec![
            Outcome {
                role: SourceRole::Primary,
                origin: SourceType::Api,
                result: Err(FetchError::Timeout(5)),
            },
            Outcome {
                role: SourceRole::Secondary,
                origin: SourceType::Scraper,
                result: Err(FetchError::Parse("empty page".into())),
            },
        ];

        assert_eq!(
            resolve(SourceMode::Auto, &outcomes, None, now()),
            Decision::Fail(GoldError::AllSourcesUnavailable {
                primary: FetchError::Timeout(5),
                secondary: FetchError::Parse("empty page".into()),
            })
        );
    }

    #[test]
    fn test_resolve_both_failed_serves_cached_primary() {
        let cached = Observation::from_quote(
            quote(dec!(41500), 10),
            SourceType::Api,
            now() - ChronoDuration::minutes(10),
            ChronoDuration::seconds(DEFAULT_STALENESS_SECS),
        )
        .record;
        let outcomes = vec![
            Outcome {
                role: SourceRole::Primary,
                origin: SourceType::Api,
                result: Err(FetchError::Timeout(5)),
            },
            Outcome {
                role: SourceRole::Secondary,
                origin: SourceType::Scraper,
                result: Err(FetchError::Status(500)),
            },
        ];

        match resolve(SourceMode::Auto, &outcomes, Some(&cached), now()) {
            Decision::Accept(selection) => {
                assert_eq!(selection.record.source_type, SourceType::Cached);
                assert!(selection.record.is_stale);
                assert_eq!(selection.record.timestamp, cached.timestamp);
            }
            other => panic!("expected cached selection, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_update_time_is_fresh() {
        let mut q = quote(dec!(41500), 0);
        q.update_time = None;
        let observation = Observation::from_quote(
            q,
            SourceType::Api,
            now(),
            ChronoDuration::seconds(DEFAULT_STALENESS_SECS),
        );
        assert!(!observation.record.is_stale);
        assert!(observation.missing.price_change);
        assert!(!observation.missing.change_count);
    }
}
