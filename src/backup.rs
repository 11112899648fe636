//! Primary-store backup scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use tracing::{info, warn};

use crate::models::now_ms;
use crate::store::Store;

const OHLCV_RETENTION_MS: i64 = 7 * 24 * 3600 * 1000;
const RATIO_RETENTION_MS: i64 = 7 * 24 * 3600 * 1000;

pub struct BackupScheduler {
    store: Store,
    path: String,
    interval: Duration,
    single_file: bool,
    daily_days: i64,
    weekly_weeks: i64,
    in_flight: Arc<AtomicBool>,
}

impl BackupScheduler {
    pub fn new(
        store: Store,
        path: String,
        interval_ms: u64,
        single_file: bool,
        daily_days: i64,
        weekly_weeks: i64,
    ) -> Self {
        Self {
            store,
            path,
            interval: Duration::from_millis(interval_ms.max(1)),
            single_file,
            daily_days: daily_days.max(1),
            weekly_weeks: weekly_weeks.max(1),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs immediately, then every `interval`, until `running` clears.
    pub async fn run(&self, running: Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            self.run_once_if_idle();
            if !running.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    fn run_once_if_idle(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("backup run skipped, previous run still in flight");
            return;
        }
        if let Err(e) = self.run_once() {
            warn!(error = %e, "backup run failed");
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }

    fn run_once(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create backup dir {}", self.path))?;

        let filename = if self.single_file {
            "binance_data.sqlite".to_string()
        } else {
            format!("binance_data_{}.sqlite", Utc::now().format("%Y%m%dT%H%M%SZ"))
        };
        let dest = format!("{}/{}", self.path.trim_end_matches('/'), filename);
        let size = self.store.checkpoint_and_copy_to(&dest)?;
        info!(dest, size, "backup written");

        if !self.single_file {
            self.enforce_retention()?;
        }
        self.prune_primary_store()?;
        Ok(())
    }

    /// Keep every file newer than `daily_days`; in `[weekly_weeks*7d,
    /// daily_days*24h]` keep the newest file per ISO week; delete anything
    /// older than `weekly_weeks*7d`.
    fn enforce_retention(&self) -> Result<()> {
        let now = Utc::now();
        let daily_cutoff = now - chrono::Duration::hours(self.daily_days * 24);
        let weekly_cutoff = now - chrono::Duration::days(self.weekly_weeks * 7);

        let mut entries: Vec<(std::path::PathBuf, chrono::DateTime<Utc>)> = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(ts) = parse_backup_timestamp(name) else {
                continue;
            };
            entries.push((path, ts));
        }

        let mut keep_per_week: HashMap<(i32, u32), (std::path::PathBuf, chrono::DateTime<Utc>)> = HashMap::new();
        for (path, ts) in &entries {
            if *ts >= daily_cutoff {
                continue;
            }
            if *ts < weekly_cutoff {
                std::fs::remove_file(path).ok();
                continue;
            }
            let week = ts.iso_week();
            let key = (week.year(), week.week());
            let replace = match keep_per_week.get(&key) {
                Some((_, existing_ts)) => ts > existing_ts,
                None => true,
            };
            if replace {
                keep_per_week.insert(key, (path.clone(), *ts));
            }
        }

        for (path, ts) in &entries {
            if *ts >= daily_cutoff || *ts < weekly_cutoff {
                continue;
            }
            let week = ts.iso_week();
            let key = (week.year(), week.week());
            let is_kept = keep_per_week.get(&key).map(|(kept, _)| kept == path).unwrap_or(false);
            if !is_kept {
                std::fs::remove_file(path).ok();
            }
        }
        Ok(())
    }

    fn prune_primary_store(&self) -> Result<()> {
        self.store.prune_candles_older_than(now_ms() - OHLCV_RETENTION_MS)?;
        self.store.prune_ratio_samples_older_than(now_ms() - RATIO_RETENTION_MS)?;
        Ok(())
    }
}

fn parse_backup_timestamp(filename: &str) -> Option<chrono::DateTime<Utc>> {
    let stem = filename.strip_prefix("binance_data_")?.strip_suffix(".sqlite")?;
    let naive = chrono::NaiveDateTime::parse_from_str(stem, "%Y%m%dT%H%M%SZ").ok()?;
    Some(chrono::DateTime::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_backup_filename() {
        let ts = parse_backup_timestamp("binance_data_20240101T120000Z.sqlite");
        assert!(ts.is_some());
    }

    #[test]
    fn rejects_unrelated_filename() {
        assert!(parse_backup_timestamp("binance.db").is_none());
    }
}
