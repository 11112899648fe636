//! Real-time trade and historical aggregated-trade persistence
//!.

use anyhow::Result;
use rusqlite::params;

use crate::models::{AggTradeSource, AggregatedTrade, Side, StreamType, Trade, Venue};

use super::Store;

pub struct AggTradeCheckpoint {
    pub trade_id: i64,
    pub trade_time: i64,
}

impl Store {
    /// Append-only bulk insert of real-time trades. Duplicates (same
    /// `(symbol, venue, tradeId, streamType)`) are silently ignored, so this
    /// is safe to call with events reprocessed after an insert failure.
    pub fn insert_trades(&self, trades: &[Trade]) -> Result<usize> {
        self.with_transaction(|tx| {
            let mut inserted = 0usize;
            for trade in trades {
                inserted += tx.execute(
                    "INSERT OR IGNORE INTO trade_data (
                        symbol, venue, trade_id, timestamp, price, amount, direction, stream_type
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        trade.symbol,
                        trade.venue.as_str(),
                        trade.trade_id,
                        trade.timestamp,
                        trade.price,
                        trade.amount,
                        trade.direction.as_str(),
                        trade.stream_type.as_str(),
                    ],
                )?;
            }
            Ok(inserted)
        })
    }

    /// Next batch of trades with `rowid > last_row_id` matching any of the
    /// given `(symbol, venue, streamType)` stream filters, ordered by rowid
    /// ascending.
    pub fn next_trade_batch(
        &self,
        streams: &[(String, Venue, StreamType)],
        last_row_id: i64,
        batch_size: i64,
    ) -> Result<Vec<Trade>> {
        if streams.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let predicate = streams
            .iter()
            .map(|_| "(symbol = ? AND venue = ? AND stream_type = ?)")
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT rowid, symbol, venue, trade_id, timestamp, price, amount, direction, stream_type
             FROM trade_data
             WHERE rowid > ? AND ({predicate})
             ORDER BY rowid ASC
             LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        bound.push(Box::new(last_row_id));
        for (symbol, venue, stream_type) in streams {
            bound.push(Box::new(symbol.clone()));
            bound.push(Box::new(venue.as_str()));
            bound.push(Box::new(stream_type.as_str()));
        }
        bound.push(Box::new(batch_size));
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

        let rows = stmt
            .query_map(params_refs.as_slice(), |row| {
                let venue_str: String = row.get(2)?;
                let direction_str: String = row.get(7)?;
                let stream_type_str: String = row.get(8)?;
                Ok(Trade {
                    row_id: Some(row.get(0)?),
                    symbol: row.get(1)?,
                    venue: Venue::parse(&venue_str).unwrap_or(Venue::Spot),
                    trade_id: row.get(3)?,
                    timestamp: row.get(4)?,
                    price: row.get(5)?,
                    amount: row.get(6)?,
                    direction: if direction_str == Side::Sell.as_str() {
                        Side::Sell
                    } else {
                        Side::Buy
                    },
                    stream_type: StreamType::parse(&stream_type_str).unwrap_or(StreamType::AggTrade),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_agg_trades(&self, trades: &[AggregatedTrade]) -> Result<usize> {
        self.with_transaction(|tx| {
            let mut inserted = 0usize;
            for trade in trades {
                inserted += tx.execute(
                    "INSERT OR IGNORE INTO agg_trades (
                        symbol, venue, trade_id, price, quantity, first_trade_id, last_trade_id,
                        trade_time, is_buyer_maker, is_best_match, source
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        trade.symbol,
                        trade.venue.as_str(),
                        trade.trade_id,
                        trade.price,
                        trade.quantity,
                        trade.first_trade_id,
                        trade.last_trade_id,
                        trade.trade_time,
                        trade.is_buyer_maker,
                        trade.is_best_match,
                        trade.source.as_str(),
                    ],
                )?;
            }
            Ok(inserted)
        })
    }

    pub fn last_agg_trade_checkpoint(
        &self,
        symbol: &str,
        venue: Venue,
    ) -> Result<Option<AggTradeCheckpoint>> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT trade_id, trade_time FROM agg_trades
             WHERE symbol = ?1 AND venue = ?2
             ORDER BY trade_time DESC, trade_id DESC LIMIT 1",
            params![symbol, venue.as_str()],
            |row| {
                Ok(AggTradeCheckpoint {
                    trade_id: row.get(0)?,
                    trade_time: row.get(1)?,
                })
            },
        );
        match result {
            Ok(cp) => Ok(Some(cp)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn agg_trade_count(&self, symbol: &str, venue: Venue) -> Result<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM agg_trades WHERE symbol = ?1 AND venue = ?2",
            params![symbol, venue.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(trade_id: i64, trade_time: i64) -> AggregatedTrade {
        AggregatedTrade {
            symbol: "ETHUSDT".to_string(),
            venue: Venue::Spot,
            trade_id,
            price: 2000.0,
            quantity: 1.0,
            first_trade_id: trade_id,
            last_trade_id: trade_id,
            trade_time,
            is_buyer_maker: false,
            is_best_match: true,
            source: AggTradeSource::Rest,
        }
    }

    #[test]
    fn checkpoint_after_reinsert_reflects_highest_trade_time_and_row_count_stays() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_agg_trades(&[agg(101, 1000), agg(102, 2000)]).unwrap();
        store.upsert_agg_trades(&[agg(102, 2000)]).unwrap();

        let cp = store
            .last_agg_trade_checkpoint("ETHUSDT", Venue::Spot)
            .unwrap()
            .unwrap();
        assert_eq!(cp.trade_id, 102);
        assert_eq!(cp.trade_time, 2000);
        assert_eq!(store.agg_trade_count("ETHUSDT", Venue::Spot).unwrap(), 2);
    }

    #[test]
    fn trade_batch_scan_respects_rowid_cursor_and_stream_filter() {
        let store = Store::open_in_memory().unwrap();
        let trades = vec![
            Trade {
                row_id: None,
                symbol: "BTCUSDT".to_string(),
                venue: Venue::Spot,
                trade_id: 1,
                timestamp: 1000,
                price: 100.0,
                amount: 1.0,
                direction: Side::Buy,
                stream_type: StreamType::AggTrade,
            },
            Trade {
                row_id: None,
                symbol: "ETHUSDT".to_string(),
                venue: Venue::Spot,
                trade_id: 2,
                timestamp: 1001,
                price: 10.0,
                amount: 1.0,
                direction: Side::Sell,
                stream_type: StreamType::AggTrade,
            },
        ];
        store.insert_trades(&trades).unwrap();

        let streams = vec![("BTCUSDT".to_string(), Venue::Spot, StreamType::AggTrade)];
        let batch = store.next_trade_batch(&streams, 0, 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].symbol, "BTCUSDT");
        assert!(batch[0].row_id.is_some());
    }
}
