//! Process-wide context object
//!
//! Wires sources, history, settings and the scheduler together and exposes
//! the read/write surface the HTTP layer calls into.

use anyhow::{Context, Result};
use chrono::Duration;
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock, DEFAULT_TZ};
use crate::config::AppConfig;
use crate::error::{GoldError, ValidationError};
use crate::history::{HistoryStore, Summary, DEFAULT_CAPACITY};
use crate::persistence::{HistoryStorage, JsonFileStorage};
use crate::scheduler::{RefreshScheduler, SchedulerOptions, SchedulerStatus};
use crate::selector::{SourceSelector, DEFAULT_STALENESS_SECS};
use crate::settings::{Settings, SettingsPatch, SettingsStore};
use crate::sources::{build_http_client, ApiSource, GoldTradersSource, PriceSource};
use crate::types::PriceRecord;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

pub struct GoldService {
    history: Arc<HistoryStore>,
    settings: Arc<SettingsStore>,
    scheduler: Arc<RefreshScheduler>,
}

impl GoldService {
    pub fn builder(
        primary: Arc<dyn PriceSource>,
        secondary: Arc<dyn PriceSource>,
    ) -> GoldServiceBuilder {
        GoldServiceBuilder::new(primary, secondary)
    }

    /// Production wiring: JSON API primary, Gold Traders page secondary
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let tz = config.timezone()?;
        let client = build_http_client(&config.sources)?;
        let primary = Arc::new(ApiSource::new(client.clone(), &config.sources.api_url, tz));
        let secondary = Arc::new(GoldTradersSource::new(
            client,
            &config.sources.scraper_url,
            tz,
        ));

        let mut builder = GoldServiceBuilder::new(primary, secondary)
            .timezone(tz)
            .capacity(config.history.capacity)
            .settings(Settings::from_config(&config.scheduler))
            .options(SchedulerOptions::from_config(config))
            .fetch_timeout(std::time::Duration::from_secs(config.sources.timeout_secs))
            .staleness(Duration::seconds(config.sources.staleness_secs));
        if config.history.persist {
            builder = builder.storage(Arc::new(JsonFileStorage::new(&config.history.path)));
        }
        builder.build()
    }

    pub fn current(&self) -> Result<PriceRecord, GoldError> {
        self.scheduler.current()
    }

    /// Newest-first page of history
    pub fn history(&self, limit: usize, offset: usize) -> Vec<PriceRecord> {
        self.history.recent(limit, offset)
    }

    pub fn history_today(&self) -> Vec<PriceRecord> {
        self.history.today()
    }

    pub fn summary(&self) -> Result<Summary, GoldError> {
        self.history.summary()
    }

    pub async fn force_refresh(&self) -> Result<PriceRecord, GoldError> {
        self.scheduler.force_refresh().await
    }

    pub fn get_settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<Settings, ValidationError> {
        self.settings.update(patch)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn records_count(&self) -> usize {
        self.history.len()
    }

    pub fn scheduler(&self) -> Arc<RefreshScheduler> {
        self.scheduler.clone()
    }

    /// Start the refresh loop on the runtime
    pub fn spawn_scheduler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.scheduler.clone().run(shutdown))
    }

    pub fn save_history(&self) -> bool {
        self.scheduler.persist()
    }
}

pub struct GoldServiceBuilder {
    primary: Arc<dyn PriceSource>,
    secondary: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    capacity: usize,
    settings: Settings,
    options: SchedulerOptions,
    fetch_timeout: std::time::Duration,
    staleness: Duration,
    storage: Option<Arc<dyn HistoryStorage>>,
}

impl GoldServiceBuilder {
    pub fn new(primary: Arc<dyn PriceSource>, secondary: Arc<dyn PriceSource>) -> Self {
        Self {
            primary,
            secondary,
            clock: Arc::new(SystemClock),
            tz: DEFAULT_TZ,
            capacity: DEFAULT_CAPACITY,
            settings: Settings::default(),
            options: SchedulerOptions::default(),
            fetch_timeout: std::time::Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            staleness: Duration::seconds(DEFAULT_STALENESS_SECS),
            storage: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn fetch_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn HistoryStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Restores persisted history before the scheduler seeds its counters.
    /// An unreadable store is logged and the service starts empty.
    pub fn build(self) -> Result<GoldService> {
        let history = Arc::new(HistoryStore::new(self.capacity, self.tz, self.clock.clone()));

        if let Some(storage) = &self.storage {
            match storage.load().context("Failed to restore price history") {
                Ok(records) => {
                    let restored = history.restore(records);
                    info!(restored, "📂 Price history restored");
                }
                Err(e) => error!(error = %e, "Starting with empty history"),
            }
        }

        let settings = Arc::new(SettingsStore::new(self.settings));
        let selector = SourceSelector::new(
            self.primary,
            self.secondary,
            self.fetch_timeout,
            self.staleness,
        );
        let mut scheduler = RefreshScheduler::new(
            selector,
            history.clone(),
            settings.clone(),
            self.clock,
            self.options,
        );
        if let Some(storage) = self.storage {
            scheduler = scheduler.with_storage(storage);
        }

        Ok(GoldService {
            history,
            settings,
            scheduler: Arc::new(scheduler),
        })
    }
}
