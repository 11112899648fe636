//! CVD aggregation worker.

pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::models::{
    now_ms, AggregatorConfig, CvdAlertPayload, CvdRecord, ProcessingState, TriggerSource, Venue,
};
use crate::store::Store;
use stats::{select_trigger, signed_log, CvdWindow};

const ALERT_TYPE: &str = "cvd_zscore";

struct AggregatorState {
    config: AggregatorConfig,
    window: CvdWindow,
    cvd_value: f64,
}

/// Single-threaded cooperative worker processing every configured
/// aggregator in declared order, non-reentrant via `processing`.
pub struct CvdAggregationWorker {
    store: Store,
    aggregators: Mutex<Vec<AggregatorState>>,
    batch_size: i64,
    poll_interval: Duration,
    zscore_threshold_log: f64,
    suppression_window_ms: i64,
    global_alerts_enabled: bool,
    processing: AtomicBool,
}

impl CvdAggregationWorker {
    pub fn new(
        store: Store,
        groups: Vec<AggregatorConfig>,
        history_window_ms: i64,
        batch_size: i64,
        poll_interval_ms: u64,
        zscore_threshold_log: f64,
        suppression_minutes: i64,
        global_alerts_enabled: bool,
    ) -> Self {
        let aggregators = groups
            .into_iter()
            .map(|config| AggregatorState {
                config,
                window: CvdWindow::new(history_window_ms),
                cvd_value: 0.0,
            })
            .collect();
        Self {
            store,
            aggregators: Mutex::new(aggregators),
            batch_size,
            poll_interval: Duration::from_millis(poll_interval_ms.max(500)),
            zscore_threshold_log,
            suppression_window_ms: suppression_minutes.max(0) * 60 * 1000,
            global_alerts_enabled,
            processing: AtomicBool::new(false),
        }
    }

    pub async fn run(&self, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            if self
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if let Err(e) = self.process_all_aggregators() {
                    warn!(error = %e, "cvd aggregation cycle failed");
                }
                self.processing.store(false, Ordering::SeqCst);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn process_all_aggregators(&self) -> Result<()> {
        let ids: Vec<String> = self
            .aggregators
            .lock()
            .iter()
            .map(|a| a.config.id.clone())
            .collect();

        for id in ids {
            loop {
                let processed = self.process_one_batch(&id)?;
                if processed < self.batch_size as usize {
                    break;
                }
            }
        }
        Ok(())
    }

    fn process_one_batch(&self, aggregator_id: &str) -> Result<usize> {
        let state_key = format!("cvd_aggregator/{aggregator_id}");
        let cursor = self.store.load_processing_state(&state_key)?;

        let streams: Vec<(String, Venue, crate::models::StreamType)> = {
            let aggregators = self.aggregators.lock();
            let Some(agg) = aggregators.iter().find(|a| a.config.id == aggregator_id) else {
                return Ok(0);
            };
            agg.config
                .streams
                .iter()
                .map(|s| (s.symbol.clone(), s.market_type, s.stream_type))
                .collect()
        };

        let batch = self
            .store
            .next_trade_batch(&streams, cursor.last_row_id, self.batch_size)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut max_row_id = cursor.last_row_id;
        let mut max_timestamp = cursor.last_timestamp;
        let mut alerts_enabled_for_aggregator = true;

        for trade in &batch {
            let row_id = trade.row_id.unwrap_or(max_row_id);
            max_row_id = max_row_id.max(row_id);
            max_timestamp = max_timestamp.max(trade.timestamp);

            let delta = trade.direction.sign() * trade.amount;
            let mut aggregators = self.aggregators.lock();
            let Some(agg) = aggregators.iter_mut().find(|a| a.config.id == aggregator_id) else {
                break;
            };
            agg.cvd_value += delta;
            alerts_enabled_for_aggregator = agg.config.alerts_enabled;
            let window_stats = agg.window.push(trade.timestamp, agg.cvd_value, delta);
            drop(aggregators);

            let record = CvdRecord {
                aggregator_id: aggregator_id.to_string(),
                timestamp: trade.timestamp,
                cvd_value: window_stats.cvd_value,
                z_score: window_stats.z_score,
                delta: window_stats.delta,
                delta_z_score: window_stats.delta_z_score,
            };
            self.store.insert_cvd_record(&record)?;

            self.maybe_alert(aggregator_id, &record, alerts_enabled_for_aggregator)?;
        }

        self.store.save_processing_state(
            &state_key,
            ProcessingState {
                last_row_id: max_row_id,
                last_timestamp: max_timestamp,
            },
        )?;

        Ok(batch.len())
    }

    fn maybe_alert(&self, aggregator_id: &str, record: &CvdRecord, aggregator_alerts_enabled: bool) -> Result<()> {
        if !self.global_alerts_enabled || !aggregator_alerts_enabled {
            return Ok(());
        }

        let (trigger_source, trigger_z_score) = select_trigger(record.z_score, record.delta_z_score);
        let log_trigger_z_score = signed_log(trigger_z_score);
        if log_trigger_z_score.abs() < self.zscore_threshold_log {
            return Ok(());
        }

        let now = now_ms();
        let since = now - self.suppression_window_ms;
        if self
            .store
            .has_recent_alert_or_pending(ALERT_TYPE, aggregator_id, since)?
        {
            debug!(aggregator_id, "cvd alert suppressed");
            return Ok(());
        }

        let raw_threshold = self.zscore_threshold_log.exp();
        let payload = CvdAlertPayload {
            alert_type: ALERT_TYPE.to_string(),
            symbol: aggregator_id.to_string(),
            timestamp: record.timestamp,
            trigger_source,
            trigger_z_score,
            z_score: record.z_score,
            delta: record.delta,
            delta_z_score: record.delta_z_score,
            threshold: self.zscore_threshold_log,
            raw_threshold,
            log_trigger_z_score,
            raw_trigger_z_score: trigger_z_score,
            cumulative_value: record.cvd_value,
        };

        self.store.enqueue_alert(ALERT_TYPE, aggregator_id, &payload)?;
        info!(aggregator_id, trigger_source = ?trigger_source, trigger_z_score, "cvd alert enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregatorStream, Side, StreamType, Trade};

    fn worker(store: Store) -> CvdAggregationWorker {
        CvdAggregationWorker::new(
            store,
            vec![AggregatorConfig {
                id: "BTC-PERP".to_string(),
                display_name: None,
                streams: vec![AggregatorStream {
                    symbol: "BTCUSDT".to_string(),
                    market_type: Venue::UsdtM,
                    stream_type: StreamType::AggTrade,
                }],
                alerts_enabled: true,
            }],
            72 * 3600 * 1000,
            500,
            2000,
            0.01,
            30,
            true,
        )
    }

    #[test]
    fn processes_batch_and_advances_cursor() {
        let store = Store::open_in_memory().unwrap();
        let trades = vec![
            Trade {
                row_id: None,
                symbol: "BTCUSDT".to_string(),
                venue: Venue::UsdtM,
                trade_id: 1,
                timestamp: 1000,
                price: 50000.0,
                amount: 1.0,
                direction: Side::Buy,
                stream_type: StreamType::AggTrade,
            },
            Trade {
                row_id: None,
                symbol: "BTCUSDT".to_string(),
                venue: Venue::UsdtM,
                trade_id: 2,
                timestamp: 1001,
                price: 50000.0,
                amount: 2.0,
                direction: Side::Sell,
                stream_type: StreamType::AggTrade,
            },
        ];
        store.insert_trades(&trades).unwrap();

        let worker = worker(store.clone());
        let processed = worker.process_one_batch("BTC-PERP").unwrap();
        assert_eq!(processed, 2);

        let state = store.load_processing_state("cvd_aggregator/BTC-PERP").unwrap();
        assert_eq!(state.last_row_id, 2);

        let latest = store.latest_cvd_record("BTC-PERP").unwrap().unwrap();
        assert_eq!(latest.cvd_value, -1.0);
    }

    #[test]
    fn low_threshold_enqueues_alert_once_then_suppresses() {
        let store = Store::open_in_memory().unwrap();
        let mut trades = Vec::new();
        for i in 0..10 {
            trades.push(Trade {
                row_id: None,
                symbol: "BTCUSDT".to_string(),
                venue: Venue::UsdtM,
                trade_id: i,
                timestamp: 1000 + i,
                price: 50000.0,
                amount: 1.0,
                direction: if i == 9 { Side::Buy } else { Side::Sell },
                stream_type: StreamType::AggTrade,
            });
        }
        store.insert_trades(&trades).unwrap();

        let worker = worker(store.clone());
        worker.process_one_batch("BTC-PERP").unwrap();
        let pending = store.pending_alerts(10).unwrap();
        assert!(!pending.is_empty());

        let pending_count = pending.len();
        worker.process_one_batch("BTC-PERP").unwrap();
        assert_eq!(store.pending_alerts(10).unwrap().len(), pending_count);
    }
}
