//! Configuration section types

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Primary JSON price API
    pub api_url: String,
    /// Secondary HTML page scraped as fallback
    pub scraper_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Source-declared update time older than this marks a record stale
    pub staleness_secs: i64,
    /// How far back a primary record may be re-served when every source fails
    pub cached_fallback_max_age_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub adaptive_enabled: bool,
    /// Clamped to 60..=600 when settings are seeded
    pub base_interval_secs: i64,
    /// "api", "scraper" or "auto"
    pub source_mode: String,
    /// Minimum gap between a manual refresh and the previous fetch
    pub manual_cooldown_secs: i64,
    /// IANA timezone used for trading days, off-hours and quiet hours
    pub timezone: String,
    pub quiet_hours: QuietHoursConfig,
    /// Whether the public read API starts enabled
    pub public_api_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuietHoursConfig {
    pub enabled: bool,
    /// "HH:MM-HH:MM", empty for none
    pub weekday: String,
    pub weekend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Maximum retained records
    pub capacity: usize,
    /// Persist history to `path`
    pub persist: bool,
    pub path: String,
    /// Save after this many commits
    pub save_every: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// "text" or "json"
    pub format: String,
}
