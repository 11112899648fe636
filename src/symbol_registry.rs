//! Daily symbol catalog refresh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::models::{Symbol, SymbolStatus, Venue};
use crate::rate_limiter::{CallOutcome, RateLimiter};
use crate::store::Store;

const RESCHEDULE_AFTER_FAILURE: Duration = Duration::from_secs(6 * 3600);

const STABLECOIN_EXCLUSIONS: &[&str] = &[
    "USDT", "USDC", "FDUSD", "TUSD", "DAI", "BUSD", "USDD", "USDP", "GUSD", "LUSD", "USDX", "EURT",
    "PYUSD",
];

pub fn default_excluded_assets() -> std::collections::HashSet<&'static str> {
    let mut set: std::collections::HashSet<&'static str> = STABLECOIN_EXCLUSIONS.iter().copied().collect();
    set.insert("BTC");
    set
}

pub struct SymbolRegistry {
    http: reqwest::Client,
    urls: crate::config::RestUrls,
    limiter: Arc<RateLimiter>,
    store: Store,
    update_hour_utc: u32,
    updated_tx: Option<UnboundedSender<()>>,
}

impl SymbolRegistry {
    pub fn new(
        urls: crate::config::RestUrls,
        limiter: Arc<RateLimiter>,
        store: Store,
        update_hour_utc: u32,
        updated_tx: Option<UnboundedSender<()>>,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("failed to build reqwest client")?,
            urls,
            limiter,
            store,
            update_hour_utc: update_hour_utc.min(23),
            updated_tx,
        })
    }

    /// Run the daily scheduling loop until `running` clears.
    pub async fn run(&self, running: Arc<std::sync::atomic::AtomicBool>) {
        loop {
            if !running.load(std::sync::atomic::Ordering::Relaxed) {
                return;
            }
            let wait = self.duration_until_next_run();
            tokio::time::sleep(wait).await;
            if !running.load(std::sync::atomic::Ordering::Relaxed) {
                return;
            }
            match self.refresh_all().await {
                Ok(()) => {
                    info!("symbol catalog refresh complete");
                    if let Some(tx) = &self.updated_tx {
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!(error = %e, "symbol catalog refresh failed, retrying in 6h");
                    tokio::time::sleep(RESCHEDULE_AFTER_FAILURE).await;
                }
            }
        }
    }

    fn duration_until_next_run(&self) -> Duration {
        let now = Utc::now();
        let mut next = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), self.update_hour_utc, 0, 0)
            .single()
            .unwrap_or(now);
        if next <= now {
            next += ChronoDuration::days(1);
        }
        (next - now).to_std().unwrap_or(Duration::from_secs(1))
    }

    /// Fetch all three venues concurrently and upsert each catalog.
    pub async fn refresh_all(&self) -> Result<()> {
        let (spot, usdm, coinm) = tokio::join!(
            self.fetch_spot_symbols(),
            self.fetch_usdm_symbols(),
            self.fetch_coinm_symbols(),
        );
        let spot = spot.context("failed to fetch spot exchange info")?;
        let usdm = usdm.context("failed to fetch usdt-m exchange info")?;
        let coinm = coinm.context("failed to fetch coin-m exchange info")?;

        self.store.upsert_symbol_catalog(Venue::Spot, &spot)?;
        self.store.upsert_symbol_catalog(Venue::UsdtM, &usdm)?;
        self.store.upsert_symbol_catalog(Venue::CoinM, &coinm)?;
        Ok(())
    }

    async fn fetch_exchange_info(&self, venue: Venue, base: &str, path: &str) -> Result<Value> {
        let endpoint = format!("rest:symbol-registry:{}", venue.as_str());
        self.limiter
            .execute(&endpoint, path, 1, 5, || async {
                let url = format!("{base}{path}");
                match self.http.get(&url).send().await {
                    Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                        CallOutcome::RateLimited
                    }
                    Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                        Ok(v) => CallOutcome::Success(v),
                        Err(e) => CallOutcome::Other(e.into()),
                    },
                    Ok(resp) => CallOutcome::Other(anyhow::anyhow!("exchangeInfo {url} returned {}", resp.status())),
                    Err(e) => CallOutcome::Other(e.into()),
                }
            })
            .await
    }

    async fn fetch_spot_symbols(&self) -> Result<Vec<Symbol>> {
        let body = self
            .fetch_exchange_info(Venue::Spot, &self.urls.spot, "/api/v3/exchangeInfo")
            .await?;
        let now = crate::models::now_ms();
        let mut out = Vec::new();
        for entry in body["symbols"].as_array().cloned().unwrap_or_default() {
            if !spot_permission_grants_trading(&entry) {
                continue;
            }
            let status = if entry["status"].as_str() == Some("TRADING") {
                SymbolStatus::Active
            } else {
                SymbolStatus::Inactive
            };
            let Some(symbol) = entry["symbol"].as_str() else { continue };
            out.push(Symbol {
                symbol: symbol.to_string(),
                venue: Venue::Spot,
                base_asset: entry["baseAsset"].as_str().unwrap_or_default().to_string(),
                quote_asset: entry["quoteAsset"].as_str().unwrap_or_default().to_string(),
                status,
                contract_type: None,
                delivery_date: None,
                onboard_date: None,
                tick_size: find_filter_value(&entry, "PRICE_FILTER", "tickSize"),
                step_size: find_filter_value(&entry, "LOT_SIZE", "stepSize"),
                min_notional: find_filter_value(&entry, "MIN_NOTIONAL", "minNotional"),
                updated_at: now,
            });
        }
        Ok(out)
    }

    async fn fetch_usdm_symbols(&self) -> Result<Vec<Symbol>> {
        self.fetch_futures_symbols(Venue::UsdtM, &self.urls.usdt_m, "/fapi/v1/exchangeInfo").await
    }

    async fn fetch_coinm_symbols(&self) -> Result<Vec<Symbol>> {
        self.fetch_futures_symbols(Venue::CoinM, &self.urls.coin_m, "/dapi/v1/exchangeInfo").await
    }

    async fn fetch_futures_symbols(&self, venue: Venue, base: &str, path: &str) -> Result<Vec<Symbol>> {
        let body = self.fetch_exchange_info(venue, base, path).await?;
        let now = crate::models::now_ms();
        let mut out = Vec::new();
        for entry in body["symbols"].as_array().cloned().unwrap_or_default() {
            let Some(symbol) = entry["symbol"].as_str() else { continue };
            let status = if entry["status"].as_str() == Some("TRADING") {
                SymbolStatus::Active
            } else {
                SymbolStatus::Inactive
            };
            out.push(Symbol {
                symbol: symbol.to_string(),
                venue,
                base_asset: entry["baseAsset"].as_str().unwrap_or_default().to_string(),
                quote_asset: entry["quoteAsset"].as_str().unwrap_or_default().to_string(),
                status,
                contract_type: entry["contractType"].as_str().map(str::to_string),
                delivery_date: entry["deliveryDate"].as_i64(),
                onboard_date: entry["onboardDate"].as_i64(),
                tick_size: find_filter_value(&entry, "PRICE_FILTER", "tickSize"),
                step_size: find_filter_value(&entry, "LOT_SIZE", "stepSize"),
                min_notional: find_filter_value(&entry, "MIN_NOTIONAL", "notional"),
                updated_at: now,
            });
        }
        Ok(out)
    }
}

/// Rate-limiter endpoint keys this registry calls through; `main.rs` must
/// register each with its own capacity before spawning the registry's loop.
pub const ENDPOINT_SPOT: &str = "rest:symbol-registry:SPOT";
pub const ENDPOINT_USDM: &str = "rest:symbol-registry:USDT-M";
pub const ENDPOINT_COINM: &str = "rest:symbol-registry:COIN-M";

fn spot_permission_grants_trading(entry: &Value) -> bool {
    if let Some(perms) = entry["permissions"].as_array() {
        if perms.iter().any(|p| p.as_str() == Some("SPOT")) {
            return true;
        }
    }
    if let Some(sets) = entry["permissionSets"].as_array() {
        if sets.iter().any(|set| {
            set.as_array()
                .map(|inner| inner.iter().any(|p| p.as_str() == Some("SPOT")))
                .unwrap_or(false)
        }) {
            return true;
        }
    }
    entry["isSpotTradingAllowed"].as_bool().unwrap_or(false)
}

fn find_filter_value(entry: &Value, filter_type: &str, field: &str) -> Option<f64> {
    entry["filters"].as_array()?.iter().find_map(|f| {
        if f["filterType"].as_str() == Some(filter_type) {
            f[field].as_str().and_then(|s| s.parse().ok())
        } else {
            None
        }
    })
}

/// Venue-independent assets to exclude from historical backfill targeting
///.
pub fn is_excluded_asset(asset: &str, excluded: &std::collections::HashSet<&'static str>) -> bool {
    excluded.contains(asset.to_ascii_uppercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spot_permission_detects_direct_flag_and_sets() {
        assert!(spot_permission_grants_trading(&json!({"permissions": ["SPOT"]})));
        assert!(spot_permission_grants_trading(&json!({"permissionSets": [["SPOT", "MARGIN"]]})));
        assert!(spot_permission_grants_trading(&json!({"isSpotTradingAllowed": true})));
        assert!(!spot_permission_grants_trading(&json!({"permissions": ["MARGIN"]})));
    }

    #[test]
    fn filter_value_extraction() {
        let entry = json!({
            "filters": [
                {"filterType": "LOT_SIZE", "stepSize": "0.001"},
                {"filterType": "PRICE_FILTER", "tickSize": "0.01"},
            ]
        });
        assert_eq!(find_filter_value(&entry, "LOT_SIZE", "stepSize"), Some(0.001));
        assert_eq!(find_filter_value(&entry, "PRICE_FILTER", "tickSize"), Some(0.01));
        assert_eq!(find_filter_value(&entry, "MIN_NOTIONAL", "notional"), None);
    }

    #[test]
    fn excluded_assets_cover_btc_and_stablecoins() {
        let excluded = default_excluded_assets();
        assert!(is_excluded_asset("btc", &excluded));
        assert!(is_excluded_asset("USDT", &excluded));
        assert!(!is_excluded_asset("ETH", &excluded));
    }
}
