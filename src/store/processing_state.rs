//! Cursor persistence for long-running scans.

use anyhow::Result;
use rusqlite::params;

use crate::models::ProcessingState;

use super::Store;

impl Store {
    pub fn load_processing_state(&self, key: &str) -> Result<ProcessingState> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT last_row_id, last_timestamp FROM processing_state WHERE key = ?1",
            params![key],
            |row| {
                Ok(ProcessingState {
                    last_row_id: row.get(0)?,
                    last_timestamp: row.get(1)?,
                })
            },
        );
        match result {
            Ok(state) => Ok(state),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(ProcessingState {
                last_row_id: 0,
                last_timestamp: 0,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_processing_state(&self, key: &str, state: ProcessingState) -> Result<()> {
        self.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO processing_state (key, last_row_id, last_timestamp)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    last_row_id = excluded.last_row_id,
                    last_timestamp = excluded.last_timestamp",
                params![key, state.last_row_id, state.last_timestamp],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_zero_then_persists() {
        let store = Store::open_in_memory().unwrap();
        let initial = store.load_processing_state("cvd_aggregator/BTC-PERP").unwrap();
        assert_eq!(initial.last_row_id, 0);

        store
            .save_processing_state(
                "cvd_aggregator/BTC-PERP",
                ProcessingState {
                    last_row_id: 42,
                    last_timestamp: 1000,
                },
            )
            .unwrap();
        let loaded = store.load_processing_state("cvd_aggregator/BTC-PERP").unwrap();
        assert_eq!(loaded.last_row_id, 42);
    }
}
