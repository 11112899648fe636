//! Candle persistence.

use anyhow::Result;
use rusqlite::params;

use crate::models::{Candle, CandleInterval};

use super::Store;

impl Store {
    pub fn upsert_candles(&self, interval: CandleInterval, candles: &[Candle]) -> Result<()> {
        let table = interval.table_name();
        self.with_transaction(|tx| {
            for candle in candles {
                tx.execute(
                    &format!(
                        "INSERT INTO {table} (
                            symbol, open_time, close_time, open, high, low, close, volume,
                            quote_volume, trade_count
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                        ON CONFLICT(symbol, open_time) DO UPDATE SET
                            close_time = excluded.close_time,
                            open = excluded.open,
                            high = excluded.high,
                            low = excluded.low,
                            close = excluded.close,
                            volume = excluded.volume,
                            quote_volume = excluded.quote_volume,
                            trade_count = excluded.trade_count"
                    ),
                    params![
                        candle.symbol,
                        candle.open_time,
                        candle.close_time,
                        candle.open,
                        candle.high,
                        candle.low,
                        candle.close,
                        candle.volume,
                        candle.quote_volume,
                        candle.trade_count,
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn latest_candle_open_time(&self, interval: CandleInterval, symbol: &str) -> Result<Option<i64>> {
        let table = interval.table_name();
        let conn = self.conn();
        let value: Option<i64> = conn
            .query_row(
                &format!("SELECT MAX(open_time) FROM {table} WHERE symbol = ?1"),
                params![symbol],
                |row| row.get(0),
            )
            .unwrap_or(None);
        Ok(value)
    }

    /// Delete rows in every interval table older than `cutoff_ms`.
    pub fn prune_candles_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        self.with_transaction(|tx| {
            let mut deleted = 0u64;
            for interval in CandleInterval::all() {
                let table = interval.table_name();
                deleted += tx.execute(
                    &format!("DELETE FROM {table} WHERE open_time < ?1"),
                    params![cutoff_ms],
                )? as u64;
            }
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(open_time: i64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + 59_999,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            quote_volume: 1000.0,
            trade_count: 5,
        }
    }

    #[test]
    fn upsert_is_idempotent_and_latest_open_time_tracks_max() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_candles(CandleInterval::OneMinute, &[sample(0), sample(60_000)])
            .unwrap();
        store
            .upsert_candles(CandleInterval::OneMinute, &[sample(60_000)])
            .unwrap();
        assert_eq!(
            store
                .latest_candle_open_time(CandleInterval::OneMinute, "BTCUSDT")
                .unwrap(),
            Some(60_000)
        );
    }

    #[test]
    fn prune_removes_old_rows_only() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_candles(CandleInterval::OneMinute, &[sample(0), sample(1_000_000)])
            .unwrap();
        let deleted = store.prune_candles_older_than(500_000).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(
            store
                .latest_candle_open_time(CandleInterval::OneMinute, "BTCUSDT")
                .unwrap(),
            Some(1_000_000)
        );
    }
}
