//! Refresh scheduler
//!
//! Owns the fetch loop: quiet-hours gate, source selection, commit to
//! history, adaptive wait. Timer, manual and startup fetches all pass
//! through one async gate, so at most one set of outbound calls is in
//! flight. Readers use `current`/`status` and never wait on the gate.

pub mod interval;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::{local_date, Clock};
use crate::config::AppConfig;
use crate::error::GoldError;
use crate::history::HistoryStore;
use crate::persistence::HistoryStorage;
use crate::selector::{MissingFields, Selection, SourceSelector};
use crate::settings::SettingsStore;
use crate::types::{PriceChange, PriceRecord, SourceMode, SourceType};

pub use interval::{next_interval, quiet_wait};

pub const DEFAULT_MANUAL_COOLDOWN_SECS: i64 = 30;

/// Phase of the refresh state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Fetching,
    Committed,
    Failed,
    Waiting,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Fetching => "fetching",
            SchedulerState::Committed => "committed",
            SchedulerState::Failed => "failed",
            SchedulerState::Waiting => "waiting",
        };
        f.write_str(name)
    }
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First fetch after start; ignores quiet hours and cooldown
    Startup,
    Timer,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Timer => write!(f, "timer"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New record appended to history
    Committed(PriceRecord),
    /// Every source failed; an earlier primary record was re-served
    Served(PriceRecord),
    Failed(GoldError),
    /// Quiet hours, no source contacted
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub outcome: CycleOutcome,
    /// Wait before the next timer cycle
    pub next_wait: Duration,
}

/// Reader-facing view of the loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// The timer loop is alive
    pub running: bool,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub unchanged_streak: u32,
    pub next_wait_secs: Option<i64>,
    /// Set while the served data is stale
    pub advisory: Option<String>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            running: false,
            last_fetch_at: None,
            last_success_at: None,
            last_error: None,
            consecutive_failures: 0,
            unchanged_streak: 0,
            next_wait_secs: None,
            advisory: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Minimum gap between the last completed fetch and a manual refresh
    pub manual_cooldown: Duration,
    /// Oldest primary record that may be re-served when all sources fail
    pub cached_max_age: Duration,
    /// Persist after this many commits (0 disables periodic saves)
    pub save_every: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            manual_cooldown: Duration::seconds(DEFAULT_MANUAL_COOLDOWN_SECS),
            cached_max_age: Duration::hours(6),
            save_every: 10,
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            manual_cooldown: Duration::seconds(config.scheduler.manual_cooldown_secs.max(0)),
            cached_max_age: Duration::seconds(config.sources.cached_fallback_max_age_secs.max(0)),
            save_every: config.history.save_every,
        }
    }
}

/// Counters only the fetch path touches; guarded by the fetch gate
#[derive(Debug, Default)]
struct LoopState {
    last_fetch_at: Option<DateTime<Utc>>,
    last_sell: Option<Decimal>,
    unchanged_streak: u32,
    commits_since_save: usize,
}

pub struct RefreshScheduler {
    selector: SourceSelector,
    history: Arc<HistoryStore>,
    settings: Arc<SettingsStore>,
    clock: Arc<dyn Clock>,
    storage: Option<Arc<dyn HistoryStorage>>,
    options: SchedulerOptions,
    gate: Mutex<LoopState>,
    current: RwLock<Option<PriceRecord>>,
    status: RwLock<SchedulerStatus>,
}

impl RefreshScheduler {
    pub fn new(
        selector: SourceSelector,
        history: Arc<HistoryStore>,
        settings: Arc<SettingsStore>,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        let last_sell = history.latest().ok().map(|r| r.bar.sell);
        Self {
            selector,
            history,
            settings,
            clock,
            storage: None,
            options,
            gate: Mutex::new(LoopState {
                last_sell,
                ..LoopState::default()
            }),
            current: RwLock::new(None),
            status: RwLock::new(SchedulerStatus::default()),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn HistoryStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Last known-good record: the latest commit, else the newest history entry
    pub fn current(&self) -> Result<PriceRecord, GoldError> {
        let current = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match current {
            Some(record) => Ok(record),
            None => self.history.latest(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut SchedulerStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    fn transition(&self, to: SchedulerState) {
        self.update_status(|status| {
            debug!(from = %status.state, to = %to, "Scheduler transition");
            status.state = to;
        });
    }

    /// Manual refresh. Inside the cooldown window this returns `RateLimited`
    /// without contacting any source.
    pub async fn force_refresh(&self) -> Result<PriceRecord, GoldError> {
        let report = self.run_cycle(Trigger::Manual).await?;
        match report.outcome {
            CycleOutcome::Committed(record) | CycleOutcome::Served(record) => Ok(record),
            CycleOutcome::Failed(err) => Err(err),
            CycleOutcome::Skipped => self.current(),
        }
    }

    /// Run one cycle. Only a manual trigger inside the cooldown returns `Err`;
    /// source failures are reported through [`CycleOutcome::Failed`].
    pub async fn run_cycle(&self, trigger: Trigger) -> Result<CycleReport, GoldError> {
        let mut state = self.gate.lock().await;
        let now = self.clock.now();
        let settings = self.settings.get();
        let tz = self.history.timezone();
        let local = now.with_timezone(&tz);

        if trigger == Trigger::Manual {
            if let Some(last) = state.last_fetch_at {
                let elapsed = now - last;
                if elapsed < self.options.manual_cooldown {
                    let remaining = self.options.manual_cooldown - elapsed;
                    let retry_after_secs = ((remaining.num_milliseconds() + 999) / 1000) as u64;
                    info!(retry_after_secs, "⏳ Manual refresh rate limited");
                    return Err(GoldError::RateLimited { retry_after_secs });
                }
            }
        }

        if trigger == Trigger::Timer {
            if let Some(remaining) = settings.quiet_hours.remaining_at(&local) {
                let next_wait = quiet_wait(&settings, remaining);
                debug!(
                    remaining_secs = remaining.num_seconds(),
                    next_wait_secs = next_wait.num_seconds(),
                    "🌙 Quiet hours, skipping fetch"
                );
                self.update_status(|status| {
                    status.state = SchedulerState::Idle;
                    status.next_wait_secs = Some(next_wait.num_seconds());
                });
                return Ok(CycleReport {
                    trigger,
                    outcome: CycleOutcome::Skipped,
                    next_wait,
                });
            }
        }

        self.transition(SchedulerState::Fetching);
        let cached = match settings.source_mode {
            SourceMode::Auto => self
                .history
                .latest_from(SourceType::Api, now - self.options.cached_max_age),
            _ => None,
        };
        let selection = self
            .selector
            .select(settings.source_mode, now, cached.as_ref())
            .await;
        state.last_fetch_at = Some(self.clock.now());

        let outcome = match selection {
            Ok(selection) if selection.record.source_type == SourceType::Cached => {
                self.serve_cached(selection)
            }
            Ok(selection) => self.commit(&mut state, selection),
            Err(err) => {
                warn!(trigger = %trigger, error = %err, "❌ Price refresh failed");
                self.record_failure(&err);
                CycleOutcome::Failed(err)
            }
        };

        let next_wait = next_interval(&settings, &local, state.unchanged_streak);
        let last_fetch_at = state.last_fetch_at;
        let unchanged_streak = state.unchanged_streak;
        self.update_status(|status| {
            debug!(from = %status.state, to = %SchedulerState::Waiting, "Scheduler transition");
            status.state = SchedulerState::Waiting;
            status.last_fetch_at = last_fetch_at;
            status.unchanged_streak = unchanged_streak;
            status.next_wait_secs = Some(next_wait.num_seconds());
        });

        Ok(CycleReport {
            trigger,
            outcome,
            next_wait,
        })
    }

    fn commit(&self, state: &mut LoopState, selection: Selection) -> CycleOutcome {
        let record = self.fill_missing(selection.record, selection.missing);

        if record.has_inverted_quote() {
            warn!(
                bar_buy = %record.bar.buy,
                bar_sell = %record.bar.sell,
                ornament_buy = %record.ornament.buy,
                ornament_sell = %record.ornament.sell,
                "Source quote has buy above sell"
            );
        }

        if let Err(err) = self.history.append(record.clone()) {
            error!(error = %err, "Rejected price record");
            let err = GoldError::from(err);
            self.record_failure(&err);
            return CycleOutcome::Failed(err);
        }

        let sell = record.bar.sell;
        if state.last_sell == Some(sell) {
            state.unchanged_streak += 1;
        } else {
            state.unchanged_streak = 0;
        }
        state.last_sell = Some(sell);

        info!(
            source = %record.source_type,
            bar_sell = %record.bar.sell,
            ornament_sell = %record.ornament.sell,
            change = %record.price_change.signed(),
            change_count = record.change_count,
            streak = state.unchanged_streak,
            "💰 Gold price committed"
        );

        let advisory = selection.advisory.map(|a| a.to_string());
        if let Some(advisory) = &advisory {
            warn!(advisory = %advisory, "Committed stale data");
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        let committed_at = record.timestamp;
        self.update_status(|status| {
            debug!(from = %status.state, to = %SchedulerState::Committed, "Scheduler transition");
            status.state = SchedulerState::Committed;
            status.last_success_at = Some(committed_at);
            status.last_error = None;
            status.consecutive_failures = 0;
            status.advisory = advisory;
        });

        state.commits_since_save += 1;
        if self.options.save_every > 0 && state.commits_since_save >= self.options.save_every {
            if self.persist() {
                state.commits_since_save = 0;
            }
        }

        CycleOutcome::Committed(record)
    }

    fn serve_cached(&self, selection: Selection) -> CycleOutcome {
        let advisory = selection.advisory.map(|a| a.to_string());
        warn!(
            advisory = advisory.as_deref().unwrap_or_default(),
            "All sources failed, serving cached primary price"
        );
        self.update_status(|status| {
            status.state = SchedulerState::Failed;
            status.last_error = Some("all sources unavailable".to_string());
            status.consecutive_failures += 1;
            status.advisory = advisory;
        });
        CycleOutcome::Served(selection.record)
    }

    fn record_failure(&self, err: &GoldError) {
        let message = err.to_string();
        self.update_status(|status| {
            debug!(from = %status.state, to = %SchedulerState::Failed, "Scheduler transition");
            status.state = SchedulerState::Failed;
            status.last_error = Some(message);
            status.consecutive_failures += 1;
        });
    }

    /// Derive change fields the source left out from history. Values the
    /// source supplied are kept as-is.
    fn fill_missing(&self, mut record: PriceRecord, missing: MissingFields) -> PriceRecord {
        if !missing.any() {
            return record;
        }

        let tz = self.history.timezone();
        let day = local_date(record.timestamp, tz);
        let previous = self.history.latest().ok();
        let sell = record.bar.sell;

        if missing.price_change {
            record.price_change = previous
                .as_ref()
                .map(|p| PriceChange::from_delta(sell - p.bar.sell))
                .unwrap_or_else(PriceChange::unchanged);
        }

        if missing.today_change {
            record.today_change = self
                .history
                .day_baseline(day)
                .map(|b| PriceChange::from_delta(sell - b.bar.sell))
                .unwrap_or_else(PriceChange::unchanged);
        }

        if missing.change_count {
            record.change_count = match &previous {
                Some(p) => {
                    let base = if local_date(p.timestamp, tz) == day {
                        p.change_count
                    } else {
                        0
                    };
                    base + u32::from(p.bar.sell != sell)
                }
                None => 0,
            };
        }

        record
    }

    /// Save history to the storage hook. Returns whether a save happened.
    pub fn persist(&self) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        match storage.save(&self.history.snapshot()) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to persist price history");
                false
            }
        }
    }

    /// Startup fetch, then timer cycles until `shutdown` flips to true.
    /// Shutdown also abandons an in-flight cycle, dropping its outbound calls.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("🚀 Refresh scheduler started");
        self.update_status(|status| status.running = true);

        let mut trigger = Trigger::Startup;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                result = self.run_cycle(trigger) => result,
                _ = shutdown_requested(&mut shutdown) => {
                    info!(trigger = %trigger, "Shutdown during fetch, cycle abandoned");
                    break;
                }
            };
            let next_wait = match result {
                Ok(report) => report.next_wait,
                // Timer and startup cycles never hit the cooldown
                Err(_) => Duration::seconds(interval::MIN_INTERVAL_SECS as i64),
            };
            trigger = Trigger::Timer;

            let sleep = next_wait
                .to_std()
                .unwrap_or_else(|_| std::time::Duration::from_secs(interval::MIN_INTERVAL_SECS));
            debug!(wait_secs = sleep.as_secs(), "Next refresh scheduled");

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {
                    self.transition(SchedulerState::Idle);
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        // A manual refresh may still hold the gate; give it one fetch window
        match tokio::time::timeout(self.selector.fetch_timeout(), self.gate.lock()).await {
            Ok(_state) => {}
            Err(_) => warn!("Manual refresh still running at shutdown"),
        }
        self.transition(SchedulerState::Idle);
        self.update_status(|status| status.running = false);
        self.persist();
        info!("🛑 Refresh scheduler stopped");
    }
}

/// Resolves once `shutdown` holds true or its sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
