//! Alert queue dispatcher loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::store::Store;

use super::webhook::AlertService;

const EXHAUSTED_ERROR: &str = "Retry limit reached";

pub struct AlertDispatcher {
    store: Store,
    sink: AlertService,
    poll_interval: Duration,
    batch_size: i64,
    max_attempts: u32,
}

impl AlertDispatcher {
    pub fn new(store: Store, sink: AlertService, poll_interval_ms: u64, batch_size: i64, max_attempts: u32) -> Self {
        Self {
            store,
            sink,
            poll_interval: Duration::from_millis(poll_interval_ms.max(500)),
            batch_size,
            max_attempts,
        }
    }

    pub async fn run(&self, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            if let Err(e) = self.drain_once().await {
                warn!(error = %e, "alert dispatch cycle failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn drain_once(&self) -> Result<()> {
        let entries = self.store.pending_alerts(self.batch_size)?;

        let mut pending = Vec::new();
        for entry in entries {
            if entry.attempt_count >= self.max_attempts {
                self.store.mark_alert_failure(entry.id, EXHAUSTED_ERROR)?;
                self.store.mark_alert_processed(entry.id, false)?;
            } else {
                pending.push(entry);
            }
        }

        for entry in pending {
            self.store.mark_alert_attempt(entry.id)?;
            match self.sink.send_cvd_alert(&entry.alert_type, &entry.payload).await {
                Ok(()) => {
                    self.store.mark_alert_processed(entry.id, true)?;
                    info!(id = entry.id, symbol = %entry.symbol, "alert sent");
                }
                Err(e) => {
                    let message = e.to_string();
                    self.store.mark_alert_failure(entry.id, &message)?;
                    if entry.attempt_count + 1 >= self.max_attempts {
                        self.store.mark_alert_processed(entry.id, false)?;
                    }
                    warn!(id = entry.id, symbol = %entry.symbol, error = %message, "alert delivery failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CvdAlertPayload, TriggerSource};

    fn payload() -> CvdAlertPayload {
        CvdAlertPayload {
            alert_type: "cvd_zscore".to_string(),
            symbol: "BTC-PERP".to_string(),
            timestamp: 1000,
            trigger_source: TriggerSource::Cumulative,
            trigger_z_score: 3.0,
            z_score: 3.0,
            delta: 1.0,
            delta_z_score: 0.1,
            threshold: 1.0,
            raw_threshold: std::f64::consts::E,
            log_trigger_z_score: 1.0986,
            raw_trigger_z_score: 3.0,
            cumulative_value: 100.0,
        }
    }

    #[tokio::test]
    async fn no_webhook_url_still_processes_and_records_history() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_alert("cvd_zscore", "BTC-PERP", &payload()).unwrap();

        let sink = AlertService::new(None, store.clone()).unwrap();
        let dispatcher = AlertDispatcher::new(store.clone(), sink, 2000, 20, 5);
        dispatcher.drain_once().await.unwrap();

        assert_eq!(store.pending_alerts(10).unwrap().len(), 0);
        assert_eq!(store.alert_history_records("BTC-PERP").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_are_marked_processed_with_error() {
        let store = Store::open_in_memory().unwrap();
        let id = store.enqueue_alert("cvd_zscore", "BTC-PERP", &payload()).unwrap();
        for _ in 0..5 {
            store.mark_alert_attempt(id).unwrap();
        }

        let sink = AlertService::new(None, store.clone()).unwrap();
        let dispatcher = AlertDispatcher::new(store.clone(), sink, 2000, 20, 5);
        dispatcher.drain_once().await.unwrap();

        assert_eq!(store.pending_alerts(10).unwrap().len(), 0);
    }
}
