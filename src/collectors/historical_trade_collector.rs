//! Historical aggregated-trade backfill.
//!
//! Per-asset stores are independent SQLite files under `asset_store_dir`, one
//! per external asset symbol, so a stall on one asset never blocks another's
//! checkpoint writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::models::{now_ms, AggTradeSource, HistoricalTarget, Venue};
use crate::rest::{AggTradesParams, RestClient};
use crate::store::Store;

const MAX_REST_ITERATIONS: u32 = 50;
const REQUEST_COOLDOWN: Duration = Duration::from_millis(500);

pub struct HistoricalTradeCollector {
    rest: Arc<RestClient>,
    asset_store_dir: String,
    targets: Vec<HistoricalTarget>,
    fetch_interval: Duration,
    initial_lookback_ms: i64,
    rest_limit: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl HistoricalTradeCollector {
    pub fn new(
        rest: Arc<RestClient>,
        asset_store_dir: String,
        targets: Vec<HistoricalTarget>,
        fetch_interval_ms: u64,
        initial_lookback_ms: i64,
        rest_limit: u32,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            rest,
            asset_store_dir,
            targets,
            fetch_interval: Duration::from_millis(fetch_interval_ms.max(1)),
            initial_lookback_ms,
            rest_limit: rest_limit.max(1),
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_millis(retry_delay_ms.max(1)),
        }
    }

    fn store_path(&self, asset: &str) -> String {
        format!("{}/{}.db", self.asset_store_dir.trim_end_matches('/'), asset.to_lowercase())
    }

    fn store_for_asset(&self, asset: &str, cache: &mut HashMap<String, Store>) -> Result<Store> {
        if let Some(store) = cache.get(asset) {
            return Ok(store.clone());
        }
        let store = Store::open(&self.store_path(asset))?;
        cache.insert(asset.to_string(), store.clone());
        Ok(store)
    }

    pub async fn run(&self, running: Arc<AtomicBool>) {
        let mut first_run = true;
        while running.load(Ordering::Relaxed) {
            if let Err(e) = self.run_cycle(&running, first_run).await {
                warn!(error = %e, "historical backfill cycle failed");
            }
            first_run = false;
            if !running.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(self.fetch_interval).await;
        }
    }

    async fn run_cycle(&self, running: &Arc<AtomicBool>, first_run: bool) -> Result<()> {
        let mut stores: HashMap<String, Store> = HashMap::new();
        for target in &self.targets {
            if !running.load(Ordering::Relaxed) {
                return Ok(());
            }
            if let Err(e) = self.backfill_target(target, first_run, &mut stores).await {
                warn!(asset = %target.asset, venue = %target.venue, error = %e, "backfill target failed");
            }
        }
        Ok(())
    }

    async fn backfill_target(
        &self,
        target: &HistoricalTarget,
        first_run: bool,
        stores: &mut HashMap<String, Store>,
    ) -> Result<()> {
        let store = self.store_for_asset(&target.asset, stores)?;
        let now = now_ms();

        let checkpoint = store.last_agg_trade_checkpoint(&target.venue_symbol, target.venue)?;
        let mut cursor = match checkpoint {
            Some(cp) => cp.trade_time + 1,
            None => now - self.initial_lookback_ms,
        };
        if !first_run {
            cursor = cursor.max(now - self.fetch_interval.as_millis() as i64);
        }

        for _ in 0..MAX_REST_ITERATIONS {
            let trades = self
                .fetch_page_with_retry(&target.venue_symbol, target.venue, cursor)
                .await?;
            if trades.is_empty() {
                break;
            }
            let count = trades.len();
            store.upsert_agg_trades(&trades)?;
            let last = trades.last().expect("non-empty checked above");
            cursor = last.trade_time + 1;
            if (count as u32) < self.rest_limit {
                break;
            }
            tokio::time::sleep(REQUEST_COOLDOWN).await;
        }
        info!(asset = %target.asset, symbol = %target.venue_symbol, venue = %target.venue, "backfill cycle complete");
        Ok(())
    }

    async fn fetch_page_with_retry(
        &self,
        symbol: &str,
        venue: Venue,
        cursor: i64,
    ) -> Result<Vec<crate::models::AggregatedTrade>> {
        let mut last_err = None;
        for attempt in 0..self.max_retries {
            let params = AggTradesParams {
                start_time: Some(cursor),
                end_time: None,
                from_id: None,
                limit: self.rest_limit,
            };
            match self.rest.fetch_aggregated_trades(symbol, venue, params).await {
                Ok(trades) => {
                    return Ok(trades
                        .into_iter()
                        .map(|mut t| {
                            t.source = AggTradeSource::Rest;
                            t
                        })
                        .collect())
                }
                Err(e) => {
                    warn!(symbol, attempt, error = %e, "historical fetch attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("historical fetch exhausted retries for {symbol}")))
    }
}
