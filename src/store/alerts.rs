//! Durable alert queue and history.

use anyhow::Result;
use rusqlite::params;

use crate::models::{AlertHistoryRecord, AlertQueueRecord, CvdAlertPayload};

use super::Store;

const MAX_ERROR_LEN: usize = 512;

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_LEN).collect()
    }
}

impl Store {
    pub fn enqueue_alert(&self, alert_type: &str, symbol: &str, payload: &CvdAlertPayload) -> Result<i64> {
        self.with_transaction(|tx| {
            let payload_json = serde_json::to_string(payload).map_err(|e| {
                rusqlite::Error::ToSqlConversionFailure(Box::new(e))
            })?;
            tx.execute(
                "INSERT INTO alert_queue (alert_type, symbol, timestamp, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![alert_type, symbol, payload.timestamp, payload_json, crate::models::now_ms()],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    pub fn pending_alerts(&self, limit: i64) -> Result<Vec<AlertQueueRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, alert_type, symbol, timestamp, payload, attempt_count, last_error, processed_at, created_at
             FROM alert_queue WHERE processed_at IS NULL
             ORDER BY timestamp ASC, id ASC LIMIT ?1",
        )?;
        let raw_rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(raw_rows.len());
        for (id, alert_type, symbol, timestamp, payload_json, attempt_count, last_error, processed_at, created_at) in
            raw_rows
        {
            let payload: CvdAlertPayload = serde_json::from_str(&payload_json)
                .map_err(|e| crate::error::PipelineError::Decode {
                    what: "alert_queue.payload",
                    reason: e.to_string(),
                })?;
            records.push(AlertQueueRecord {
                id,
                alert_type,
                symbol,
                timestamp,
                payload,
                attempt_count,
                last_error,
                processed_at,
                created_at,
            });
        }
        Ok(records)
    }

    pub fn mark_alert_attempt(&self, id: i64) -> Result<()> {
        self.with_transaction(|tx| {
            tx.execute(
                "UPDATE alert_queue SET attempt_count = attempt_count + 1 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    pub fn mark_alert_processed(&self, id: i64, clear_error: bool) -> Result<()> {
        self.with_transaction(|tx| {
            if clear_error {
                tx.execute(
                    "UPDATE alert_queue SET processed_at = ?1, last_error = NULL WHERE id = ?2",
                    params![crate::models::now_ms(), id],
                )?;
            } else {
                tx.execute(
                    "UPDATE alert_queue SET processed_at = ?1 WHERE id = ?2",
                    params![crate::models::now_ms(), id],
                )?;
            }
            Ok(())
        })
    }

    pub fn mark_alert_failure(&self, id: i64, message: &str) -> Result<()> {
        let truncated = truncate_error(message);
        self.with_transaction(|tx| {
            tx.execute(
                "UPDATE alert_queue SET last_error = ?1 WHERE id = ?2",
                params![truncated, id],
            )?;
            Ok(())
        })
    }

    /// True iff a pending queue entry exists for `(alert_type, symbol)`, or
    /// `AlertHistory` has a row with `timestamp >= since_ts`.
    pub fn has_recent_alert_or_pending(&self, alert_type: &str, symbol: &str, since_ts: i64) -> Result<bool> {
        let conn = self.conn();
        let pending: bool = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM alert_queue
                WHERE alert_type = ?1 AND symbol = ?2 AND processed_at IS NULL
            )",
            params![alert_type, symbol],
            |row| row.get(0),
        )?;
        if pending {
            return Ok(true);
        }
        let recent: bool = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM alert_history
                WHERE alert_type = ?1 AND symbol = ?2 AND timestamp >= ?3
            )",
            params![alert_type, symbol, since_ts],
            |row| row.get(0),
        )?;
        Ok(recent)
    }

    pub fn insert_alert_history(&self, alert_type: &str, symbol: &str, payload: &CvdAlertPayload) -> Result<i64> {
        self.with_transaction(|tx| {
            let payload_json = serde_json::to_string(payload)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                "INSERT INTO alert_history (alert_type, symbol, timestamp, payload, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![alert_type, symbol, payload.timestamp, payload_json, crate::models::now_ms()],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    #[cfg(test)]
    pub fn alert_history_records(&self, symbol: &str) -> Result<Vec<AlertHistoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, alert_type, symbol, timestamp, payload, sent_at FROM alert_history WHERE symbol = ?1",
        )?;
        let rows = stmt
            .query_map(params![symbol], |row| {
                let payload_json: String = row.get(4)?;
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, i64>(3)?, payload_json, row.get::<_, i64>(5)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(id, alert_type, symbol, timestamp, payload_json, sent_at)| AlertHistoryRecord {
                id,
                alert_type,
                symbol,
                timestamp,
                payload: serde_json::from_str(&payload_json).unwrap(),
                sent_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerSource;

    fn payload() -> CvdAlertPayload {
        CvdAlertPayload {
            alert_type: "cvd_zscore".to_string(),
            symbol: "BTC-PERP".to_string(),
            timestamp: 1000,
            trigger_source: TriggerSource::Cumulative,
            trigger_z_score: 3.0,
            z_score: 3.0,
            delta: 10.0,
            delta_z_score: 0.5,
            threshold: 2.0,
            raw_threshold: 7.389,
            log_trigger_z_score: 1.0986,
            raw_trigger_z_score: 3.0,
            cumulative_value: 100.0,
        }
    }

    #[test]
    fn queue_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let id = store.enqueue_alert("cvd_zscore", "BTC-PERP", &payload()).unwrap();
        assert_eq!(store.pending_alerts(10).unwrap().len(), 1);

        store.mark_alert_attempt(id).unwrap();
        store.mark_alert_processed(id, true).unwrap();
        assert_eq!(store.pending_alerts(10).unwrap().len(), 0);
    }

    #[test]
    fn failure_truncates_long_messages() {
        let store = Store::open_in_memory().unwrap();
        let id = store.enqueue_alert("cvd_zscore", "BTC-PERP", &payload()).unwrap();
        let long = "x".repeat(1000);
        store.mark_alert_failure(id, &long).unwrap();
        let pending = store.pending_alerts(10).unwrap();
        assert_eq!(pending[0].last_error.as_ref().unwrap().len(), MAX_ERROR_LEN);
    }

    #[test]
    fn recent_alert_or_pending_detects_both_sources() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.has_recent_alert_or_pending("cvd_zscore", "BTC-PERP", 0).unwrap());

        store.enqueue_alert("cvd_zscore", "BTC-PERP", &payload()).unwrap();
        assert!(store.has_recent_alert_or_pending("cvd_zscore", "BTC-PERP", 0).unwrap());
    }

    #[test]
    fn history_insert_is_queryable() {
        let store = Store::open_in_memory().unwrap();
        store.insert_alert_history("cvd_zscore", "BTC-PERP", &payload()).unwrap();
        let records = store.alert_history_records("BTC-PERP").unwrap();
        assert_eq!(records.len(), 1);
    }
}
