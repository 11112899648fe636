//! Top-trader long/short ratio persistence.

use anyhow::Result;
use rusqlite::params;

use crate::models::RatioSample;

use super::Store;

impl Store {
    /// Latest-wins upsert keyed on `(symbol, series, timestamp)`.
    pub fn upsert_ratio_samples(&self, samples: &[RatioSample]) -> Result<usize> {
        self.with_transaction(|tx| {
            let mut written = 0usize;
            for sample in samples {
                written += tx.execute(
                    "INSERT OR REPLACE INTO ratio_samples (
                        symbol, series, timestamp, long_short_ratio, long_account, short_account
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        sample.symbol,
                        sample.series.as_str(),
                        sample.timestamp,
                        sample.long_short_ratio,
                        sample.long_account,
                        sample.short_account,
                    ],
                )?;
            }
            Ok(written)
        })
    }

    pub fn ratio_sample_count(&self, symbol: &str) -> Result<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ratio_samples WHERE symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete ratio samples older than 7 days.
    pub fn prune_ratio_samples_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        self.with_transaction(|tx| {
            Ok(tx.execute(
                "DELETE FROM ratio_samples WHERE timestamp < ?1",
                params![cutoff_ms],
            )? as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RatioSeries;

    fn sample(ts: i64) -> RatioSample {
        RatioSample {
            symbol: "BTCUSDT".to_string(),
            series: RatioSeries::Position,
            timestamp: ts,
            long_short_ratio: 1.2,
            long_account: 0.55,
            short_account: 0.45,
        }
    }

    #[test]
    fn upsert_replaces_same_key() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_ratio_samples(&[sample(1000)]).unwrap();
        let mut s = sample(1000);
        s.long_short_ratio = 2.0;
        store.upsert_ratio_samples(&[s]).unwrap();
        assert_eq!(store.ratio_sample_count("BTCUSDT").unwrap(), 1);
    }
}
