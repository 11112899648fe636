//! Top-trader long/short ratio polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::models::{now_ms, RatioSample, Venue};
use crate::rest::RestClient;
use crate::store::Store;

const SAMPLE_MAX_AGE_MS: i64 = 24 * 3600 * 1000;

pub struct RatioCollector {
    rest: Arc<RestClient>,
    store: Store,
    interval: Duration,
    request_delay: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl RatioCollector {
    pub fn new(
        rest: Arc<RestClient>,
        store: Store,
        interval_ms: u64,
        request_delay_ms: u64,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            rest,
            store,
            interval: Duration::from_millis(interval_ms.max(1)),
            request_delay: Duration::from_millis(request_delay_ms),
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_millis(retry_delay_ms.max(1)),
        }
    }

    pub async fn run(&self, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            if let Err(e) = self.run_cycle(&running).await {
                warn!(error = %e, "ratio collection cycle failed");
            }
            if !running.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn run_cycle(&self, running: &Arc<AtomicBool>) -> Result<()> {
        let symbols = self.store.active_symbols(Venue::UsdtM)?;
        for symbol in symbols {
            if !running.load(Ordering::Relaxed) {
                return Ok(());
            }
            let eligible = matches!(symbol.contract_type.as_deref(), Some("PERPETUAL") | None);
            if !eligible {
                continue;
            }

            match self.fetch_with_retry(&symbol.symbol, true).await {
                Ok(samples) => self.persist(samples)?,
                Err(e) => warn!(symbol = %symbol.symbol, error = %e, "top-trader positions fetch failed"),
            }
            tokio::time::sleep(self.request_delay).await;

            match self.fetch_with_retry(&symbol.symbol, false).await {
                Ok(samples) => self.persist(samples)?,
                Err(e) => warn!(symbol = %symbol.symbol, error = %e, "top-trader accounts fetch failed"),
            }
        }
        Ok(())
    }

    async fn fetch_with_retry(&self, symbol: &str, positions: bool) -> Result<Vec<RatioSample>> {
        let mut last_err = None;
        for attempt in 0..self.max_retries {
            let result = if positions {
                self.rest.fetch_top_trader_positions(symbol).await
            } else {
                self.rest.fetch_top_trader_accounts(symbol).await
            };
            match result {
                Ok(samples) => return Ok(samples),
                Err(e) => {
                    warn!(symbol, attempt, error = %e, "top-trader ratio fetch attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("ratio fetch exhausted retries for {symbol}")))
    }

    fn persist(&self, samples: Vec<RatioSample>) -> Result<()> {
        let cutoff = now_ms() - SAMPLE_MAX_AGE_MS;
        let fresh: Vec<RatioSample> = samples.into_iter().filter(|s| s.timestamp >= cutoff).collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.store.upsert_ratio_samples(&fresh)?;
        Ok(())
    }
}
