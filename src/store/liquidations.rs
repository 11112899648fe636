//! Liquidation event persistence.

use anyhow::Result;
use rusqlite::params;

use crate::models::LiquidationEvent;

use super::Store;

impl Store {
    /// Append-only bulk insert, deduplicated on `event_id`.
    pub fn insert_liquidations(&self, events: &[LiquidationEvent]) -> Result<usize> {
        self.with_transaction(|tx| {
            let mut inserted = 0usize;
            for event in events {
                inserted += tx.execute(
                    "INSERT OR IGNORE INTO liquidations (
                        event_id, symbol, venue, side, price, original_quantity,
                        filled_quantity, event_time, trade_time, order_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        event.event_id,
                        event.symbol,
                        event.venue.as_str(),
                        event.side.as_str(),
                        event.price,
                        event.original_quantity,
                        event.filled_quantity,
                        event.event_time,
                        event.trade_time,
                        event.order_id,
                    ],
                )?;
            }
            Ok(inserted)
        })
    }

    pub fn liquidation_count(&self, symbol: &str) -> Result<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM liquidations WHERE symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LiquidationEvent, Side, Venue};

    fn sample(order_id: Option<i64>) -> LiquidationEvent {
        LiquidationEvent {
            event_id: LiquidationEvent::derive_event_id(
                Venue::UsdtM,
                order_id,
                "BTCUSDT",
                1000,
                999,
                Side::Sell,
                0.5,
            ),
            symbol: "BTCUSDT".to_string(),
            venue: Venue::UsdtM,
            side: Side::Sell,
            price: 50000.0,
            original_quantity: 1.0,
            filled_quantity: 0.5,
            event_time: 1000,
            trade_time: 999,
            order_id,
        }
    }

    #[test]
    fn duplicate_event_id_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        store.insert_liquidations(&[sample(Some(1)), sample(Some(1))]).unwrap();
        assert_eq!(store.liquidation_count("BTCUSDT").unwrap(), 1);
    }
}
