//! History Persistence Module
//!
//! Durable storage hook so history survives restarts. In-memory operation
//! is fully supported without one.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::PriceRecord;

/// Storage backend for price history
pub trait HistoryStorage: Send + Sync {
    /// Load records, oldest first. A missing store yields an empty list.
    fn load(&self) -> Result<Vec<PriceRecord>>;

    /// Replace the stored history with `records`
    fn save(&self, records: &[PriceRecord]) -> Result<()>;
}

/// Pretty-printed JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStorage for JsonFileStorage {
    fn load(&self) -> Result<Vec<PriceRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read history file {}", self.path.display()))?;
        let records: Vec<PriceRecord> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse history file {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            records = records.len(),
            "📂 Loaded price history"
        );
        Ok(records)
    }

    fn save(&self, records: &[PriceRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create history directory {}", parent.display())
                })?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(records).context("Failed to serialize history")?;
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write history file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                tmp.display(),
                self.path.display()
            )
        })?;

        info!(
            path = %self.path.display(),
            records = records.len(),
            "💾 Saved price history"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PriceChange, Quote, SourceType};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn record(minute: u32) -> PriceRecord {
        let at = Utc.with_ymd_and_hms(2026, 2, 3, 3, minute, 0).unwrap();
        PriceRecord {
            timestamp: at,
            bar: Quote::new(dec!(41400), dec!(41500)),
            ornament: Quote::new(dec!(40643.60), dec!(42300)),
            price_change: PriceChange::from_delta(dec!(-150)),
            today_change: PriceChange::from_delta(dec!(1950)),
            change_count: 19,
            source_type: SourceType::Api,
            update_time: Some(at),
            is_stale: false,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("history.json"));
        assert!(storage.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("nested").join("history.json"));
        let records = vec![record(0), record(1)];

        storage.save(&records).unwrap();
        assert!(storage.path().exists());
        assert!(!storage.path().with_extension("json.tmp").exists());
        assert_eq!(storage.load().unwrap(), records);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{not json").unwrap();
        assert!(JsonFileStorage::new(&path).load().is_err());
    }
}
