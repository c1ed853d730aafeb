//! Runtime settings - adaptive refresh, source mode and quiet hours
//!
//! A single shared instance. Updates validate the whole patch first and
//! swap it in under the write lock, so readers never see a half-applied
//! change and a rejected patch leaves the previous settings untouched.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::ValidationError;
use crate::types::SourceMode;

pub const MIN_BASE_INTERVAL_SECS: u64 = 60;
pub const MAX_BASE_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_BASE_INTERVAL_SECS: u64 = 120;

const TIME_FORMAT: &str = "%H:%M";

/// Daily window `[start, end)`; wraps past midnight when `end < start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn parse(start: &str, end: &str, field: &str) -> Result<Self, ValidationError> {
        let parse = |value: &str, which: &str| {
            NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|_| {
                ValidationError::InvalidTime {
                    field: format!("{}.{}", field, which),
                    value: value.to_string(),
                }
            })
        };
        Ok(Self {
            start: parse(start, "start")?,
            end: parse(end, "end")?,
        })
    }

    /// Parse "HH:MM-HH:MM"
    pub fn parse_span(span: &str, field: &str) -> Result<Self, ValidationError> {
        match span.split_once('-') {
            Some((start, end)) => Self::parse(start, end, field),
            None => Err(ValidationError::InvalidTime {
                field: field.to_string(),
                value: span.to_string(),
            }),
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Time from `time` until the window closes, if inside it
    pub fn remaining(&self, time: NaiveTime) -> Option<Duration> {
        if !self.contains(time) {
            return None;
        }
        let diff = self.end - time;
        Some(if diff <= Duration::zero() {
            diff + Duration::days(1)
        } else {
            diff
        })
    }
}

/// Windows in which timer-driven fetches are skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub weekday: Option<TimeRange>,
    pub weekend: Option<TimeRange>,
}

impl QuietHours {
    /// Window that starts on the local day of `at`
    pub fn window_for<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> Option<TimeRange> {
        self.window_on(at.weekday())
    }

    fn window_on(&self, day: Weekday) -> Option<TimeRange> {
        if !self.enabled {
            return None;
        }
        match day {
            Weekday::Sat | Weekday::Sun => self.weekend,
            _ => self.weekday,
        }
    }

    /// Remaining quiet time at `at`, `None` when fetching is allowed.
    ///
    /// A window that wraps past midnight runs to its end on the next day,
    /// even when that day falls in the other category: Friday's weekday
    /// window still covers early Saturday. When both days' windows apply
    /// the later end wins.
    pub fn remaining_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> Option<Duration> {
        let time = NaiveTime::from_hms_opt(at.hour(), at.minute(), at.second())?;
        let today = self.window_for(at).and_then(|w| w.remaining(time));
        let carried = self
            .window_on(at.weekday().pred())
            .filter(|w| w.wraps_midnight() && time < w.end)
            .map(|w| w.end - time);
        today.into_iter().chain(carried).max()
    }
}

/// Snapshot of the runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub adaptive_enabled: bool,
    pub base_interval_secs: u64,
    pub source_mode: SourceMode,
    pub quiet_hours: QuietHours,
    /// Public read API switch for the HTTP layer
    pub public_api_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adaptive_enabled: false,
            base_interval_secs: DEFAULT_BASE_INTERVAL_SECS,
            source_mode: SourceMode::Auto,
            quiet_hours: QuietHours::default(),
            public_api_enabled: true,
        }
    }
}

impl Settings {
    /// Seed from configuration. Out-of-range intervals are clamped and
    /// unparseable values fall back to defaults.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        let defaults = Self::default();

        let base_interval_secs = config
            .base_interval_secs
            .clamp(MIN_BASE_INTERVAL_SECS as i64, MAX_BASE_INTERVAL_SECS as i64)
            as u64;
        if base_interval_secs as i64 != config.base_interval_secs {
            warn!(
                configured = config.base_interval_secs,
                effective = base_interval_secs,
                "Base interval clamped"
            );
        }

        let source_mode = config.source_mode.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid source mode in config, using auto");
            defaults.source_mode
        });

        let span = |raw: &str, field: &str| -> Option<TimeRange> {
            if raw.trim().is_empty() {
                return None;
            }
            TimeRange::parse_span(raw, field)
                .map_err(|e| warn!(error = %e, "Ignoring quiet hours window"))
                .ok()
        };

        Self {
            adaptive_enabled: config.adaptive_enabled,
            base_interval_secs,
            source_mode,
            quiet_hours: QuietHours {
                enabled: config.quiet_hours.enabled,
                weekday: span(&config.quiet_hours.weekday, "quiet_hours.weekday"),
                weekend: span(&config.quiet_hours.weekend, "quiet_hours.weekend"),
            },
            public_api_enabled: config.public_api_enabled,
        }
    }
}

/// Window given as "HH:MM" strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RangePatch {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QuietHoursPatch {
    pub enabled: Option<bool>,
    pub weekday: Option<RangePatch>,
    pub weekend: Option<RangePatch>,
}

/// Partial update; absent fields are left as they are
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsPatch {
    pub adaptive_enabled: Option<bool>,
    pub base_interval_secs: Option<i64>,
    pub source_mode: Option<String>,
    pub quiet_hours: Option<QuietHoursPatch>,
    pub public_api_enabled: Option<bool>,
}

impl SettingsPatch {
    /// Apply to `current`, producing the next snapshot or the first violation
    pub fn apply(&self, current: &Settings) -> Result<Settings, ValidationError> {
        let mut next = current.clone();

        if let Some(enabled) = self.adaptive_enabled {
            next.adaptive_enabled = enabled;
        }

        if let Some(secs) = self.base_interval_secs {
            let range = MIN_BASE_INTERVAL_SECS as i64..=MAX_BASE_INTERVAL_SECS as i64;
            if !range.contains(&secs) {
                return Err(ValidationError::IntervalOutOfRange {
                    value: secs,
                    min: MIN_BASE_INTERVAL_SECS,
                    max: MAX_BASE_INTERVAL_SECS,
                });
            }
            next.base_interval_secs = secs as u64;
        }

        if let Some(mode) = &self.source_mode {
            next.source_mode = mode.parse()?;
        }

        if let Some(quiet) = &self.quiet_hours {
            if let Some(enabled) = quiet.enabled {
                next.quiet_hours.enabled = enabled;
            }
            if let Some(range) = &quiet.weekday {
                next.quiet_hours.weekday = Some(TimeRange::parse(
                    &range.start,
                    &range.end,
                    "quiet_hours.weekday",
                )?);
            }
            if let Some(range) = &quiet.weekend {
                next.quiet_hours.weekend = Some(TimeRange::parse(
                    &range.start,
                    &range.end,
                    "quiet_hours.weekend",
                )?);
            }
        }

        if let Some(enabled) = self.public_api_enabled {
            next.public_api_enabled = enabled;
        }

        Ok(next)
    }
}

/// Shared, lock-guarded settings
#[derive(Debug)]
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn get(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, patch: &SettingsPatch) -> Result<Settings, ValidationError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let next = patch.apply(&guard)?;
        *guard = next.clone();

        info!(
            adaptive = next.adaptive_enabled,
            base_interval_secs = next.base_interval_secs,
            mode = %next.source_mode,
            quiet_hours = next.quiet_hours.enabled,
            public_api = next.public_api_enabled,
            "🔧 Settings updated"
        );
        Ok(next)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuietHoursConfig;
    use chrono_tz::Asia::Bangkok;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_valid_update_is_visible_immediately() {
        let store = SettingsStore::default();
        let patch = SettingsPatch {
            adaptive_enabled: Some(true),
            base_interval_secs: Some(300),
            source_mode: Some("scraper".to_string()),
            ..SettingsPatch::default()
        };

        let updated = store.update(&patch).unwrap();
        assert_eq!(store.get(), updated);
        assert!(updated.adaptive_enabled);
        assert_eq!(updated.base_interval_secs, 300);
        assert_eq!(updated.source_mode, SourceMode::Scraper);
    }

    #[test]
    fn test_invalid_update_leaves_settings_unchanged() {
        let store = SettingsStore::default();
        let before = store.get();

        // Valid field alongside an invalid one must not be half-applied
        let patch = SettingsPatch {
            adaptive_enabled: Some(true),
            base_interval_secs: Some(601),
            ..SettingsPatch::default()
        };
        assert!(matches!(
            store.update(&patch),
            Err(ValidationError::IntervalOutOfRange { value: 601, .. })
        ));
        assert_eq!(store.get(), before);

        let patch = SettingsPatch {
            source_mode: Some("fastest".to_string()),
            ..SettingsPatch::default()
        };
        assert!(store.update(&patch).is_err());

        let patch = SettingsPatch {
            quiet_hours: Some(QuietHoursPatch {
                enabled: Some(true),
                weekday: Some(RangePatch {
                    start: "25:00".to_string(),
                    end: "06:00".to_string(),
                }),
                weekend: None,
            }),
            ..SettingsPatch::default()
        };
        assert!(matches!(
            store.update(&patch),
            Err(ValidationError::InvalidTime { .. })
        ));
        assert_eq!(store.get(), before);
    }

    #[test]
    fn test_interval_bounds_are_inclusive() {
        let store = SettingsStore::default();
        for secs in [60, 600] {
            let patch = SettingsPatch {
                base_interval_secs: Some(secs),
                ..SettingsPatch::default()
            };
            assert_eq!(store.update(&patch).unwrap().base_interval_secs, secs as u64);
        }
        let patch = SettingsPatch {
            base_interval_secs: Some(59),
            ..SettingsPatch::default()
        };
        assert!(store.update(&patch).is_err());
    }

    #[test]
    fn test_time_range_wraps_midnight() {
        let range = TimeRange::parse("22:00", "06:00", "test").unwrap();
        assert!(range.contains(time(23, 30)));
        assert!(range.contains(time(2, 0)));
        assert!(!range.contains(time(6, 0)));
        assert!(!range.contains(time(12, 0)));
        assert_eq!(range.remaining(time(23, 0)), Some(Duration::hours(7)));
        assert_eq!(range.remaining(time(5, 30)), Some(Duration::minutes(30)));
    }

    #[test]
    fn test_quiet_hours_pick_window_by_day() {
        let quiet = QuietHours {
            enabled: true,
            weekday: Some(TimeRange::parse("00:00", "08:00", "weekday").unwrap()),
            weekend: Some(TimeRange::parse("00:00", "12:00", "weekend").unwrap()),
        };
        // Tuesday 2026-02-03 10:00 Bangkok
        let tuesday = Bangkok.with_ymd_and_hms(2026, 2, 3, 10, 0, 0).unwrap();
        assert!(quiet.remaining_at(&tuesday).is_none());
        // Saturday 2026-02-07 10:00 Bangkok
        let saturday = Bangkok.with_ymd_and_hms(2026, 2, 7, 10, 0, 0).unwrap();
        assert_eq!(quiet.remaining_at(&saturday), Some(Duration::hours(2)));

        let disabled = QuietHours {
            enabled: false,
            ..quiet
        };
        assert!(disabled.remaining_at(&saturday).is_none());
    }

    #[test]
    fn test_overnight_window_carries_into_next_day() {
        let quiet = QuietHours {
            enabled: true,
            weekday: Some(TimeRange::parse("22:00", "06:00", "weekday").unwrap()),
            weekend: Some(TimeRange::parse("10:00", "12:00", "weekend").unwrap()),
        };
        // Friday 2026-02-06 23:00 Bangkok
        let friday = Bangkok.with_ymd_and_hms(2026, 2, 6, 23, 0, 0).unwrap();
        assert_eq!(quiet.remaining_at(&friday), Some(Duration::hours(7)));
        // Saturday 2026-02-07 02:00 Bangkok, inside Friday's window
        let saturday = Bangkok.with_ymd_and_hms(2026, 2, 7, 2, 0, 0).unwrap();
        assert_eq!(quiet.remaining_at(&saturday), Some(Duration::hours(4)));
        // Sunday 2026-02-08 02:00 Bangkok, Saturday's window does not wrap
        let sunday = Bangkok.with_ymd_and_hms(2026, 2, 8, 2, 0, 0).unwrap();
        assert!(quiet.remaining_at(&sunday).is_none());
        // Monday 2026-02-09 02:00 Bangkok, Monday's own window covers it
        let monday = Bangkok.with_ymd_and_hms(2026, 2, 9, 2, 0, 0).unwrap();
        assert_eq!(quiet.remaining_at(&monday), Some(Duration::hours(4)));
    }

    #[test]
    fn test_from_config_clamps_and_defaults() {
        let config = SchedulerConfig {
            adaptive_enabled: true,
            base_interval_secs: 5,
            source_mode: "bogus".to_string(),
            manual_cooldown_secs: 30,
            timezone: "Asia/Bangkok".to_string(),
            quiet_hours: QuietHoursConfig {
                enabled: true,
                weekday: "22:00-06:00".to_string(),
                weekend: "not-a-range".to_string(),
            },
            public_api_enabled: false,
        };

        let settings = Settings::from_config(&config);
        assert_eq!(settings.base_interval_secs, MIN_BASE_INTERVAL_SECS);
        assert_eq!(settings.source_mode, SourceMode::Auto);
        assert!(settings.quiet_hours.weekday.is_some());
        assert!(settings.quiet_hours.weekend.is_none());
        assert!(!settings.public_api_enabled);
    }
}
