//! Price history - bounded, time-ordered log of committed records
//!
//! One writer (the scheduler) and many concurrent readers. Appends and
//! reads are serialized through an `RwLock`, so readers always see a
//! consistent sequence.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::clock::{local_date, Clock};
use crate::error::{GoldError, HistoryError};
use crate::types::{PriceRecord, SourceType};

/// About one day at one-minute resolution
pub const DEFAULT_CAPACITY: usize = 1440;
/// Page size bounds for `recent`
pub const MIN_PAGE: usize = 1;
pub const MAX_PAGE: usize = 1440;

/// High/low/average of sell prices for one product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceStats {
    pub high: Decimal,
    pub low: Decimal,
    pub average: Decimal,
}

impl PriceStats {
    fn from_sells(sells: impl Iterator<Item = Decimal>) -> Option<Self> {
        let mut count = 0u32;
        let mut sum = Decimal::ZERO;
        let mut high: Option<Decimal> = None;
        let mut low: Option<Decimal> = None;

        for sell in sells {
            count += 1;
            sum += sell;
            high = Some(high.map_or(sell, |h| h.max(sell)));
            low = Some(low.map_or(sell, |l| l.min(sell)));
        }

        if count == 0 {
            return None;
        }
        Some(Self {
            high: high?,
            low: low?,
            average: (sum / Decimal::from(count)).round_dp(2),
        })
    }
}

/// Statistics over all retained records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub records_count: usize,
    pub bar: PriceStats,
    pub ornament: PriceStats,
}

/// Bounded FIFO of price records
pub struct HistoryStore {
    records: RwLock<VecDeque<PriceRecord>>,
    capacity: usize,
    tz: Tz,
    clock: Arc<dyn Clock>,
}

impl HistoryStore {
    pub fn new(capacity: usize, tz: Tz, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            tz,
            clock,
        }
    }

    /// Seed from previously persisted records. Entries that break the
    /// timestamp order are dropped; only the newest `capacity` are kept.
    pub fn restore(&self, records: Vec<PriceRecord>) -> usize {
        let mut dropped = 0usize;
        let mut guard = self.write();
        guard.clear();
        for record in records {
            if guard
                .back()
                .map_or(false, |last| record.timestamp <= last.timestamp)
            {
                dropped += 1;
                continue;
            }
            if guard.len() == self.capacity {
                guard.pop_front();
            }
            guard.push_back(record);
        }
        if dropped > 0 {
            warn!(dropped, "Dropped out-of-order records while restoring history");
        }
        guard.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<PriceRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<PriceRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record, evicting the oldest once at capacity.
    /// Timestamps must strictly increase.
    pub fn append(&self, record: PriceRecord) -> Result<(), HistoryError> {
        let mut guard = self.write();
        if let Some(last) = guard.back() {
            if record.timestamp == last.timestamp {
                return Err(HistoryError::DuplicateTimestamp(record.timestamp));
            }
            if record.timestamp < last.timestamp {
                return Err(HistoryError::OutOfOrder {
                    timestamp: record.timestamp,
                    latest: last.timestamp,
                });
            }
        }
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(record);
        Ok(())
    }

    /// Newest-first page. `limit` is clamped to `[1, 1440]`.
    pub fn recent(&self, limit: usize, offset: usize) -> Vec<PriceRecord> {
        let limit = limit.clamp(MIN_PAGE, MAX_PAGE);
        self.read()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Newest-first records captured on the current local calendar day
    pub fn today(&self) -> Vec<PriceRecord> {
        self.on_day(local_date(self.clock.now(), self.tz))
    }

    /// Newest-first records captured on `day` (local calendar)
    pub fn on_day(&self, day: NaiveDate) -> Vec<PriceRecord> {
        self.read()
            .iter()
            .rev()
            .filter(|r| local_date(r.timestamp, self.tz) == day)
            .cloned()
            .collect()
    }

    /// Sell-price statistics over every retained record
    pub fn summary(&self) -> Result<Summary, GoldError> {
        let guard = self.read();
        let bar =
            PriceStats::from_sells(guard.iter().map(|r| r.bar.sell)).ok_or(GoldError::NoData)?;
        let ornament = PriceStats::from_sells(guard.iter().map(|r| r.ornament.sell))
            .ok_or(GoldError::NoData)?;

        Ok(Summary {
            records_count: guard.len(),
            bar,
            ornament,
        })
    }

    pub fn latest(&self) -> Result<PriceRecord, GoldError> {
        self.read().back().cloned().ok_or(GoldError::NotFound)
    }

    /// Latest record produced by `source_type` no older than `since`
    pub fn latest_from(&self, source_type: SourceType, since: DateTime<Utc>) -> Option<PriceRecord> {
        self.read()
            .iter()
            .rev()
            .take_while(|r| r.timestamp >= since)
            .find(|r| r.source_type == source_type)
            .cloned()
    }

    /// Reference record for "since start of day" moves: the last record
    /// before `day`, or failing that the first record on `day`.
    pub fn day_baseline(&self, day: NaiveDate) -> Option<PriceRecord> {
        let guard = self.read();
        guard
            .iter()
            .rev()
            .find(|r| local_date(r.timestamp, self.tz) < day)
            .or_else(|| {
                guard
                    .iter()
                    .find(|r| local_date(r.timestamp, self.tz) == day)
            })
            .cloned()
    }

    /// Copy of all records, oldest first
    pub fn snapshot(&self) -> Vec<PriceRecord> {
        self.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}
