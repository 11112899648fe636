//! Symbol catalog persistence.

use anyhow::Result;
use rusqlite::params;

use crate::models::{Symbol, SymbolStatus, Venue};

use super::Store;

impl Store {
    /// Upsert one venue's symbol catalog, keyed on `(symbol, venue)`, then
    /// transition any previously `ACTIVE` symbol absent from `catalog` to
    /// `INACTIVE`.
    pub fn upsert_symbol_catalog(&self, venue: Venue, catalog: &[Symbol]) -> Result<()> {
        self.with_transaction(|tx| {
            for symbol in catalog {
                tx.execute(
                    "INSERT INTO symbols (
                        symbol, venue, base_asset, quote_asset, status, contract_type,
                        delivery_date, onboard_date, tick_size, step_size, min_notional, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ON CONFLICT(symbol, venue) DO UPDATE SET
                        base_asset = excluded.base_asset,
                        quote_asset = excluded.quote_asset,
                        status = excluded.status,
                        contract_type = excluded.contract_type,
                        delivery_date = excluded.delivery_date,
                        onboard_date = excluded.onboard_date,
                        tick_size = excluded.tick_size,
                        step_size = excluded.step_size,
                        min_notional = excluded.min_notional,
                        updated_at = excluded.updated_at",
                    params![
                        symbol.symbol,
                        venue.as_str(),
                        symbol.base_asset,
                        symbol.quote_asset,
                        symbol.status.as_str(),
                        symbol.contract_type,
                        symbol.delivery_date,
                        symbol.onboard_date,
                        symbol.tick_size,
                        symbol.step_size,
                        symbol.min_notional,
                        symbol.updated_at,
                    ],
                )?;
            }

            let live: std::collections::HashSet<&str> =
                catalog.iter().map(|s| s.symbol.as_str()).collect();
            let mut stmt = tx.prepare(
                "SELECT symbol FROM symbols WHERE venue = ?1 AND status = ?2",
            )?;
            let stored_active: Vec<String> = stmt
                .query_map(params![venue.as_str(), SymbolStatus::Active.as_str()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            for symbol in stored_active {
                if !live.contains(symbol.as_str()) {
                    tx.execute(
                        "UPDATE symbols SET status = ?1, updated_at = ?2 WHERE symbol = ?3 AND venue = ?4",
                        params![
                            SymbolStatus::Inactive.as_str(),
                            crate::models::now_ms(),
                            symbol,
                            venue.as_str()
                        ],
                    )?;
                }
            }

            Ok(())
        })
    }

    pub fn active_symbols(&self, venue: Venue) -> Result<Vec<Symbol>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT symbol, base_asset, quote_asset, status, contract_type, delivery_date,
                    onboard_date, tick_size, step_size, min_notional, updated_at
             FROM symbols WHERE venue = ?1 AND status = ?2",
        )?;
        let rows = stmt
            .query_map(params![venue.as_str(), SymbolStatus::Active.as_str()], |row| {
                Ok(Symbol {
                    symbol: row.get(0)?,
                    venue,
                    base_asset: row.get(1)?,
                    quote_asset: row.get(2)?,
                    status: SymbolStatus::Active,
                    contract_type: row.get(4)?,
                    delivery_date: row.get(5)?,
                    onboard_date: row.get(6)?,
                    tick_size: row.get(7)?,
                    step_size: row.get(8)?,
                    min_notional: row.get(9)?,
                    updated_at: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(symbol: &str) -> Symbol {
        Symbol {
            symbol: symbol.to_string(),
            venue: Venue::Spot,
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            status: SymbolStatus::Active,
            contract_type: None,
            delivery_date: None,
            onboard_date: None,
            tick_size: Some(0.01),
            step_size: Some(0.001),
            min_notional: Some(10.0),
            updated_at: crate::models::now_ms(),
        }
    }

    #[test]
    fn upsert_then_drop_transitions_to_inactive() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_symbol_catalog(Venue::Spot, &[sample("BTCUSDT"), sample("ETHUSDT")])
            .unwrap();
        assert_eq!(store.active_symbols(Venue::Spot).unwrap().len(), 2);

        store
            .upsert_symbol_catalog(Venue::Spot, &[sample("BTCUSDT")])
            .unwrap();
        let active = store.active_symbols(Venue::Spot).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].symbol, "BTCUSDT");
    }
}
