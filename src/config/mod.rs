//! Configuration management for ThaiGold
//!
//! Loads from config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sources: SourcesConfig,
    pub scheduler: SchedulerConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (THAIGOLD__*)
            .add_source(Environment::with_prefix("THAIGOLD").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            // Server defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            // Source defaults
            .set_default(
                "sources.api_url",
                "https://static-gold.tothanate.workers.dev/api/gold",
            )?
            .set_default("sources.scraper_url", "https://classic.goldtraders.or.th/")?
            .set_default("sources.timeout_secs", 15)?
            .set_default(
                "sources.user_agent",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
            )?
            .set_default("sources.staleness_secs", 1800)?
            .set_default("sources.cached_fallback_max_age_secs", 21_600)?
            // Scheduler defaults
            .set_default("scheduler.adaptive_enabled", false)?
            .set_default("scheduler.base_interval_secs", 120)?
            .set_default("scheduler.source_mode", "auto")?
            .set_default("scheduler.manual_cooldown_secs", 30)?
            .set_default("scheduler.timezone", "Asia/Bangkok")?
            .set_default("scheduler.public_api_enabled", true)?
            .set_default("scheduler.quiet_hours.enabled", false)?
            .set_default("scheduler.quiet_hours.weekday", "")?
            .set_default("scheduler.quiet_hours.weekend", "")?
            // History defaults
            .set_default("history.capacity", 1440)?
            .set_default("history.persist", true)?
            .set_default("history.path", "data/gold_price_history.json")?
            .set_default("history.save_every", 10)?
            // Logging defaults
            .set_default("logging.format", "text")?;
        Ok(builder)
    }

    /// Resolve the configured market timezone
    pub fn timezone(&self) -> Result<Tz> {
        self.scheduler
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.scheduler.timezone, e))
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "mode={} base_interval={}s adaptive={} tz={} capacity={} persist={}",
            self.scheduler.source_mode,
            self.scheduler.base_interval_secs,
            self.scheduler.adaptive_enabled,
            self.scheduler.timezone,
            self.history.capacity,
            self.history.persist
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize() {
        let config = AppConfig::defaults().unwrap();
        assert_eq!(config.scheduler.base_interval_secs, 120);
        assert_eq!(config.scheduler.source_mode, "auto");
        assert_eq!(config.history.capacity, 1440);
        assert_eq!(config.sources.staleness_secs, 1800);
        assert_eq!(config.timezone().unwrap(), chrono_tz::Asia::Bangkok);
    }

    #[test]
    fn test_digest_mentions_mode() {
        let config = AppConfig::defaults().unwrap();
        assert!(config.to_string().contains("mode=auto"));
    }
}
