//! Adaptive refresh interval
//!
//! Base interval, stretched ×10 in off-hours and ×3/×5 for long unchanged
//! streaks. The two multipliers compound; the streak tiers do not.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Weekday};

use crate::settings::{Settings, MAX_BASE_INTERVAL_SECS, MIN_BASE_INTERVAL_SECS};

pub const OFF_HOURS_MULTIPLIER: u64 = 10;
/// (minimum streak, multiplier), highest tier first
pub const STREAK_TIERS: [(u32, u64); 2] = [(10, 5), (5, 3)];
pub const MIN_INTERVAL_SECS: u64 = MIN_BASE_INTERVAL_SECS;
pub const MAX_INTERVAL_SECS: u64 = MAX_BASE_INTERVAL_SECS * OFF_HOURS_MULTIPLIER;

/// Trading hours on weekdays, local time
const MARKET_OPEN_HOUR: u32 = 8;
const MARKET_CLOSE_HOUR: u32 = 18;

/// Weekday 18:00-08:00 and all weekend
pub fn is_off_hours<Tz: TimeZone>(local: &DateTime<Tz>) -> bool {
    match local.weekday() {
        Weekday::Sat | Weekday::Sun => true,
        _ => local.hour() >= MARKET_CLOSE_HOUR || local.hour() < MARKET_OPEN_HOUR,
    }
}

pub fn streak_multiplier(unchanged_streak: u32) -> u64 {
    STREAK_TIERS
        .iter()
        .find(|(min, _)| unchanged_streak >= *min)
        .map_or(1, |(_, multiplier)| *multiplier)
}

pub fn adaptive_interval_secs<Tz: TimeZone>(
    base_secs: u64,
    local: &DateTime<Tz>,
    unchanged_streak: u32,
) -> u64 {
    let off_hours = if is_off_hours(local) {
        OFF_HOURS_MULTIPLIER
    } else {
        1
    };
    base_secs
        .saturating_mul(off_hours)
        .saturating_mul(streak_multiplier(unchanged_streak))
        .clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
}

/// Wait before the next timer cycle
pub fn next_interval<Tz: TimeZone>(
    settings: &Settings,
    local: &DateTime<Tz>,
    unchanged_streak: u32,
) -> Duration {
    let secs = if settings.adaptive_enabled {
        adaptive_interval_secs(settings.base_interval_secs, local, unchanged_streak)
    } else {
        settings.base_interval_secs
    };
    Duration::seconds(secs as i64)
}

/// Wait after a quiet-hours skip: the off-hours interval, cut short when
/// the quiet window ends first
pub fn quiet_wait(settings: &Settings, remaining: Duration) -> Duration {
    let off_hours = settings
        .base_interval_secs
        .saturating_mul(OFF_HOURS_MULTIPLIER)
        .clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS);
    let off_hours = Duration::seconds(off_hours as i64);
    remaining
        .min(off_hours)
        .max(Duration::seconds(MIN_INTERVAL_SECS as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Bangkok;

    fn settings(adaptive: bool, base: u64) -> Settings {
        Settings {
            adaptive_enabled: adaptive,
            base_interval_secs: base,
            ..Settings::default()
        }
    }

    #[test]
    fn test_off_hours_window() {
        // 2026-02-03 is a Tuesday
        let at = |h| Bangkok.with_ymd_and_hms(2026, 2, 3, h, 0, 0).unwrap();
        assert!(is_off_hours(&at(7)));
        assert!(!is_off_hours(&at(8)));
        assert!(!is_off_hours(&at(17)));
        assert!(is_off_hours(&at(18)));
        let saturday = Bangkok.with_ymd_and_hms(2026, 2, 7, 12, 0, 0).unwrap();
        assert!(is_off_hours(&saturday));
    }

    #[test]
    fn test_streak_tiers_use_highest() {
        assert_eq!(streak_multiplier(0), 1);
        assert_eq!(streak_multiplier(4), 1);
        assert_eq!(streak_multiplier(5), 3);
        assert_eq!(streak_multiplier(9), 3);
        assert_eq!(streak_multiplier(10), 5);
        assert_eq!(streak_multiplier(12), 5);
    }

    #[test]
    fn test_compounded_interval_hits_upper_bound_exactly() {
        let evening = Bangkok.with_ymd_and_hms(2026, 2, 3, 20, 0, 0).unwrap();
        assert_eq!(adaptive_interval_secs(120, &evening, 12), 6000);
        assert_eq!(adaptive_interval_secs(600, &evening, 12), MAX_INTERVAL_SECS);
    }

    #[test]
    fn test_streak_reset_reverts_to_base_derived() {
        let evening = Bangkok.with_ymd_and_hms(2026, 2, 3, 20, 0, 0).unwrap();
        let noon = Bangkok.with_ymd_and_hms(2026, 2, 3, 12, 0, 0).unwrap();
        assert_eq!(adaptive_interval_secs(120, &evening, 0), 1200);
        assert_eq!(adaptive_interval_secs(120, &noon, 0), 120);
        assert_eq!(adaptive_interval_secs(120, &noon, 6), 360);
    }

    #[test]
    fn test_non_adaptive_uses_base() {
        let evening = Bangkok.with_ymd_and_hms(2026, 2, 3, 20, 0, 0).unwrap();
        assert_eq!(
            next_interval(&settings(false, 120), &evening, 12),
            Duration::seconds(120)
        );
        assert_eq!(
            next_interval(&settings(true, 120), &evening, 12),
            Duration::seconds(6000)
        );
    }

    #[test]
    fn test_quiet_wait_bounds() {
        let s = settings(false, 120);
        assert_eq!(quiet_wait(&s, Duration::hours(5)), Duration::seconds(1200));
        assert_eq!(quiet_wait(&s, Duration::minutes(7)), Duration::minutes(7));
        assert_eq!(quiet_wait(&s, Duration::seconds(5)), Duration::seconds(60));
    }
}
