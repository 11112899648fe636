//! CVD record persistence.

use anyhow::Result;
use rusqlite::params;

use crate::models::CvdRecord;

use super::Store;

impl Store {
    /// Latest-wins upsert keyed on `(aggregator_id, timestamp)`.
    pub fn insert_cvd_record(&self, record: &CvdRecord) -> Result<()> {
        self.with_transaction(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO cvd_records (
                    aggregator_id, timestamp, cvd_value, z_score, delta, delta_z_score
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.aggregator_id,
                    record.timestamp,
                    record.cvd_value,
                    record.z_score,
                    record.delta,
                    record.delta_z_score,
                ],
            )?;
            Ok(())
        })
    }

    pub fn latest_cvd_record(&self, aggregator_id: &str) -> Result<Option<CvdRecord>> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT aggregator_id, timestamp, cvd_value, z_score, delta, delta_z_score
             FROM cvd_records WHERE aggregator_id = ?1
             ORDER BY timestamp DESC LIMIT 1",
            params![aggregator_id],
            |row| {
                Ok(CvdRecord {
                    aggregator_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    cvd_value: row.get(2)?,
                    z_score: row.get(3)?,
                    delta: row.get(4)?,
                    delta_z_score: row.get(5)?,
                })
            },
        );
        match result {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_read_latest() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_cvd_record(&CvdRecord {
                aggregator_id: "BTC-PERP".to_string(),
                timestamp: 1000,
                cvd_value: 10.0,
                z_score: 0.5,
                delta: 1.0,
                delta_z_score: 0.1,
            })
            .unwrap();
        let latest = store.latest_cvd_record("BTC-PERP").unwrap().unwrap();
        assert_eq!(latest.timestamp, 1000);
    }
}
