//! Venue-aware REST client.
//!
//! A thin wrapper over `reqwest` whose every call goes through the shared
//! [`RateLimiter`]: a `reqwest::Client` plus a rate limiter called before
//! each request, JSON decoded with explicit field mapping rather than blind
//! `serde` structural typing since Binance returns mixed string/number
//! arrays for several endpoints.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::RestUrls;
use crate::error::PipelineError;
use crate::models::{AggTradeSource, AggregatedTrade, Candle, CandleInterval, RatioSample, RatioSeries, Venue};
use crate::rate_limiter::{CallOutcome, RateLimiter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENDPOINT_SPOT: &str = "rest:spot";
pub const ENDPOINT_USDM: &str = "rest:usdt-m";
pub const ENDPOINT_COINM: &str = "rest:coin-m";

/// Binance's declared per-minute request weights for a 1200-weight budget.
/// Capacities are registered by the caller (typically `main.rs`) after
/// applying `1 - RATE_LIMIT_BUFFER`; this module only declares per-call
/// weights.
pub mod weight {
    pub const CANDLES: u32 = 2;
    pub const AGG_TRADES_SPOT: u32 = 2;
    pub const AGG_TRADES_USDM: u32 = 20;
    pub const TOP_TRADER_RATIO: u32 = 20;
}

pub struct AggTradesParams {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub from_id: Option<i64>,
    pub limit: u32,
}

impl Default for AggTradesParams {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            from_id: None,
            limit: 500,
        }
    }
}

pub struct RestClient {
    http: Client,
    urls: RestUrls,
    limiter: std::sync::Arc<RateLimiter>,
}

impl RestClient {
    pub fn new(urls: RestUrls, limiter: std::sync::Arc<RateLimiter>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { http, urls, limiter })
    }

    fn base_url(&self, venue: Venue) -> &str {
        match venue {
            Venue::Spot => &self.urls.spot,
            Venue::UsdtM => &self.urls.usdt_m,
            Venue::CoinM => &self.urls.coin_m,
        }
    }

    fn endpoint_key(venue: Venue) -> &'static str {
        match venue {
            Venue::Spot => ENDPOINT_SPOT,
            Venue::UsdtM => ENDPOINT_USDM,
            Venue::CoinM => ENDPOINT_COINM,
        }
    }

    async fn get_json(
        &self,
        venue: Venue,
        path: &str,
        query: &[(&str, String)],
        weight: u32,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url(venue), path);
        let endpoint = Self::endpoint_key(venue);
        self.limiter
            .execute(endpoint, path, weight, 0, || async {
                let resp = match self.http.get(&url).query(query).send().await {
                    Ok(r) => r,
                    Err(e) => return CallOutcome::Other(anyhow!(e)),
                };
                if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                    return CallOutcome::RateLimited;
                }
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return CallOutcome::Other(anyhow!("request to {url} failed: {status} {body}"));
                }
                match resp.json::<Value>().await {
                    Ok(v) => CallOutcome::Success(v),
                    Err(e) => CallOutcome::Other(anyhow!(e)),
                }
            })
            .await
    }

    fn candles_path(venue: Venue) -> &'static str {
        match venue {
            Venue::Spot => "/api/v3/klines",
            Venue::UsdtM => "/fapi/v1/klines",
            Venue::CoinM => "/dapi/v1/klines",
        }
    }

    pub async fn fetch_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        venue: Venue,
        start_time: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let mut query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.as_str().to_string()),
            ("limit".to_string(), "1000".to_string()),
        ];
        if let Some(st) = start_time {
            query.push(("startTime".to_string(), st.to_string()));
        }
        let query: Vec<(&str, String)> = query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = self
            .get_json(venue, Self::candles_path(venue), &query, weight::CANDLES)
            .await?;
        let rows = body
            .as_array()
            .ok_or_else(|| decode_error("candles response", "expected a JSON array"))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = row
                .as_array()
                .ok_or_else(|| decode_error("candle row", "expected a JSON array"))?;
            candles.push(Candle {
                symbol: symbol.to_string(),
                open_time: as_i64(&arr[0])?,
                open: as_f64_str(&arr[1])?,
                high: as_f64_str(&arr[2])?,
                low: as_f64_str(&arr[3])?,
                close: as_f64_str(&arr[4])?,
                volume: as_f64_str(&arr[5])?,
                close_time: as_i64(&arr[6])?,
                quote_volume: as_f64_str(&arr[7])?,
                trade_count: as_i64(&arr[8])?,
            });
        }
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    fn agg_trades_path(venue: Venue) -> Result<&'static str> {
        match venue {
            Venue::Spot => Ok("/api/v3/aggTrades"),
            Venue::UsdtM => Ok("/fapi/v1/aggTrades"),
            Venue::CoinM => bail!(PipelineError::UnknownVenue(
                "coin-m does not support aggregated trade backfill".to_string()
            )),
        }
    }

    pub async fn fetch_aggregated_trades(
        &self,
        symbol: &str,
        venue: Venue,
        params: AggTradesParams,
    ) -> Result<Vec<AggregatedTrade>> {
        let path = Self::agg_trades_path(venue)?;
        let weight = match venue {
            Venue::Spot => weight::AGG_TRADES_SPOT,
            Venue::UsdtM => weight::AGG_TRADES_USDM,
            Venue::CoinM => unreachable!(),
        };
        let limit = params.limit.min(1000);
        let mut query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(v) = params.start_time {
            query.push(("startTime".to_string(), v.to_string()));
        }
        if let Some(v) = params.end_time {
            query.push(("endTime".to_string(), v.to_string()));
        }
        if let Some(v) = params.from_id {
            query.push(("fromId".to_string(), v.to_string()));
        }
        let query: Vec<(&str, String)> = query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = self.get_json(venue, path, &query, weight).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| decode_error("aggTrades response", "expected a JSON array"))?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            trades.push(AggregatedTrade {
                symbol: symbol.to_string(),
                venue,
                trade_id: as_i64(&row["a"])?,
                price: as_f64_str(&row["p"])?,
                quantity: as_f64_str(&row["q"])?,
                first_trade_id: as_i64(&row["f"])?,
                last_trade_id: as_i64(&row["l"])?,
                trade_time: as_i64(&row["T"])?,
                is_buyer_maker: row["m"].as_bool().unwrap_or(false),
                is_best_match: row["M"].as_bool().unwrap_or(true),
                source: AggTradeSource::Rest,
            });
        }
        trades.sort_by_key(|t| t.trade_time);
        Ok(trades)
    }

    async fn fetch_top_trader_ratio(
        &self,
        symbol: &str,
        path: &str,
        series: RatioSeries,
    ) -> Result<Vec<RatioSample>> {
        let query = [
            ("symbol", symbol.to_string()),
            ("period", "5m".to_string()),
            ("limit", "12".to_string()),
        ];
        let body = self
            .get_json(Venue::UsdtM, path, &query, weight::TOP_TRADER_RATIO)
            .await?;
        let rows = body
            .as_array()
            .ok_or_else(|| decode_error("top trader ratio response", "expected a JSON array"))?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            samples.push(RatioSample {
                symbol: symbol.to_string(),
                series,
                timestamp: as_i64(&row["timestamp"])?,
                long_short_ratio: as_f64_str(&row["longShortRatio"])?,
                long_account: as_f64_str(&row["longAccount"])?,
                short_account: as_f64_str(&row["shortAccount"])?,
            });
        }
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    pub async fn fetch_top_trader_positions(&self, symbol: &str) -> Result<Vec<RatioSample>> {
        self.fetch_top_trader_ratio(
            symbol,
            "/futures/data/topLongShortPositionRatio",
            RatioSeries::Position,
        )
        .await
    }

    pub async fn fetch_top_trader_accounts(&self, symbol: &str) -> Result<Vec<RatioSample>> {
        self.fetch_top_trader_ratio(
            symbol,
            "/futures/data/topLongShortAccountRatio",
            RatioSeries::Account,
        )
        .await
    }
}

fn decode_error(what: &'static str, reason: &str) -> PipelineError {
    PipelineError::Decode {
        what,
        reason: reason.to_string(),
    }
}

fn as_i64(v: &Value) -> Result<i64> {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .or_else(|| v.as_f64().map(|f| f as i64))
        .ok_or_else(|| decode_error("integer field", &format!("{v:?} is not an integer")).into())
}

fn as_f64_str(v: &Value) -> Result<f64> {
    if let Some(f) = v.as_f64() {
        return Ok(f);
    }
    v.as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| decode_error("numeric field", &format!("{v:?} is not a parseable number")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_f64_str_parses_both_shapes() {
        assert_eq!(as_f64_str(&Value::String("1.25".to_string())).unwrap(), 1.25);
        assert_eq!(as_f64_str(&serde_json::json!(2.5)).unwrap(), 2.5);
    }

    #[test]
    fn as_i64_parses_both_shapes() {
        assert_eq!(as_i64(&Value::String("42".to_string())).unwrap(), 42);
        assert_eq!(as_i64(&serde_json::json!(43)).unwrap(), 43);
    }

    #[test]
    fn coin_m_agg_trades_path_is_rejected() {
        assert!(RestClient::agg_trades_path(Venue::CoinM).is_err());
        assert!(RestClient::agg_trades_path(Venue::Spot).is_ok());
    }
}
