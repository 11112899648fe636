//! Environment-driven configuration.
//!
//! Permissive `env::var(...).ok().and_then(|v| v.parse().ok())` parsing with
//! a logged fallback to the default for non-critical knobs, strict
//! validation for safety-critical ones (process role, webhook URL).

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::AggregatorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Ingest,
    Aggregate,
    Alert,
}

impl ProcessRole {
    fn parse(s: &str) -> Option<ProcessRole> {
        match s {
            "ingest" => Some(ProcessRole::Ingest),
            "aggregate" => Some(ProcessRole::Aggregate),
            "alert" => Some(ProcessRole::Alert),
            _ => None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!(key, value = %v, "invalid value for env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct RestUrls {
    pub spot: String,
    pub usdt_m: String,
    pub coin_m: String,
}

#[derive(Debug, Clone)]
pub struct WsUrls {
    pub spot: String,
    pub usdt_m: String,
    pub coin_m: String,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Multiplier `1-x` applied to declared endpoint capacities.
    pub buffer: f64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: String,
    pub asset_store_dir: String,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub enabled: bool,
    pub path: String,
    pub interval_ms: u64,
    pub single_file: bool,
    pub daily_days: i64,
    pub weekly_weeks: i64,
}

#[derive(Debug, Clone)]
pub struct CvdConfig {
    pub zscore_threshold: f64,
    pub batch_size: i64,
    pub poll_interval_ms: u64,
    pub suppression_minutes: i64,
    pub groups: Vec<AggregatorConfig>,
}

#[derive(Debug, Clone)]
pub struct AlertQueueConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub max_attempts: u32,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub max_symbols_per_stream: usize,
}

#[derive(Debug, Clone)]
pub struct HistoricalConfig {
    pub fetch_interval_ms: u64,
    pub initial_lookback_ms: i64,
    pub rest_limit: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub ranked_asset_list_path: String,
}

#[derive(Debug, Clone)]
pub struct RatioConfig {
    pub interval_ms: u64,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: ProcessRole,
    pub rest_urls: RestUrls,
    pub ws_urls: WsUrls,
    pub rate_limiter: RateLimiterConfig,
    pub store: StoreConfig,
    pub backup: BackupConfig,
    pub symbol_update_hour_utc: u32,
    pub cvd: CvdConfig,
    pub alert_queue: AlertQueueConfig,
    pub push: PushConfig,
    pub historical: HistoricalConfig,
    pub ratio: RatioConfig,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let role_str = env::var("BINANCE_PROCESS_ROLE")
            .context("BINANCE_PROCESS_ROLE must be set to one of: ingest, aggregate, alert")?;
        let role = ProcessRole::parse(&role_str)
            .with_context(|| format!("unknown BINANCE_PROCESS_ROLE: {role_str}"))?;

        let database_path = env_string(
            "DATABASE_PATH",
            "~/workspace/crypto-data/data/binance.db",
        );
        let asset_store_dir = env_string(
            "DATABASE_ASSET_DIR",
            "~/workspace/crypto-data/data/assets",
        );

        let symbol_update_hour_utc = env_parse("SYMBOL_UPDATE_HOUR_UTC", 1u32).min(23);

        let webhook_url = env::var("DISCORD_WEBHOOK_URL").ok();
        if let Some(url) = &webhook_url {
            validate_webhook_url(url)?;
        }

        let cvd_groups = match env::var("BINANCE_CVD_GROUPS") {
            Ok(raw) => serde_json::from_str(&raw)
                .context("BINANCE_CVD_GROUPS is not valid aggregator-config JSON")?,
            Err(_) => default_cvd_groups(),
        };

        let config = Config {
            role,
            rest_urls: RestUrls {
                spot: env_string("BINANCE_REST_URL", "https://api.binance.com"),
                usdt_m: env_string("BINANCE_USDM_REST_URL", "https://fapi.binance.com"),
                coin_m: env_string("BINANCE_COINM_REST_URL", "https://dapi.binance.com"),
            },
            ws_urls: WsUrls {
                spot: env_string("BINANCE_SPOT_WS_URL", "wss://stream.binance.com:9443"),
                usdt_m: env_string("BINANCE_USDM_WS_URL", "wss://fstream.binance.com"),
                coin_m: env_string("BINANCE_COINM_WS_URL", "wss://dstream.binance.com"),
            },
            rate_limiter: RateLimiterConfig {
                buffer: env_parse("RATE_LIMIT_BUFFER", 0.1),
            },
            store: StoreConfig {
                database_path,
                asset_store_dir,
            },
            backup: BackupConfig {
                enabled: env_parse("DATABASE_BACKUP_ENABLED", true),
                path: env_string("DATABASE_BACKUP_PATH", "~/workspace/crypto-data/data/backup"),
                interval_ms: env_parse("DATABASE_BACKUP_INTERVAL_MS", 6 * 3600 * 1000u64),
                single_file: env_parse("DATABASE_BACKUP_SINGLE_FILE", false),
                daily_days: env_parse("DATABASE_BACKUP_DAILY_DAYS", 7i64),
                weekly_weeks: env_parse("DATABASE_BACKUP_WEEKLY_WEEKS", 1i64),
            },
            symbol_update_hour_utc,
            cvd: CvdConfig {
                zscore_threshold: env_parse("CVD_ZSCORE_THRESHOLD", 2.0),
                batch_size: env_parse("CVD_AGGREGATION_BATCH_SIZE", 500i64),
                poll_interval_ms: env_parse("CVD_AGGREGATION_POLL_INTERVAL_MS", 2000u64).max(500),
                suppression_minutes: env_parse("CVD_ALERT_SUPPRESSION_MINUTES", 30i64),
                groups: cvd_groups,
            },
            alert_queue: AlertQueueConfig {
                poll_interval_ms: env_parse("ALERT_QUEUE_POLL_INTERVAL_MS", 2000u64).max(500),
                batch_size: env_parse("ALERT_QUEUE_BATCH_SIZE", 20i64),
                max_attempts: env_parse("ALERT_QUEUE_MAX_ATTEMPTS", 5u32),
                webhook_url,
            },
            push: PushConfig {
                max_symbols_per_stream: env_parse("WS_MAX_SYMBOLS_PER_STREAM", 300usize),
            },
            historical: HistoricalConfig {
                fetch_interval_ms: env_parse("HISTORICAL_FETCH_INTERVAL_MS", 3600 * 1000u64),
                initial_lookback_ms: env_parse("HISTORICAL_INITIAL_LOOKBACK_MS", 12 * 3600 * 1000i64),
                rest_limit: env_parse("HISTORICAL_REST_LIMIT", 1000u32),
                max_retries: env_parse("HISTORICAL_MAX_RETRIES", 3u32),
                retry_delay_ms: env_parse("HISTORICAL_RETRY_DELAY_MS", 5000u64),
                ranked_asset_list_path: env_string(
                    "RANKED_ASSET_LIST_PATH",
                    "~/workspace/crypto-data/data/ranked_assets.csv",
                ),
            },
            ratio: RatioConfig {
                interval_ms: env_parse("TOP_TRADER_INTERVAL_MS", 5 * 60 * 1000u64),
                request_delay_ms: env_parse("TOP_TRADER_REQUEST_DELAY_MS", 3000u64),
                max_retries: env_parse("TOP_TRADER_MAX_RETRIES", 3u32),
                retry_delay_ms: env_parse("TOP_TRADER_RETRY_DELAY_MS", 5000u64),
            },
        };

        if config.alert_queue.webhook_url.is_none() {
            warn!("DISCORD_WEBHOOK_URL not set; alert dispatch will be a no-op sink");
        }

        Ok(config)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_millis(self.backup.interval_ms)
    }
}

fn validate_webhook_url(url: &str) -> Result<()> {
    let ok = (url.starts_with("https://discord.com/api/webhooks/")
        || url.starts_with("https://discordapp.com/api/webhooks/"))
        && url.len() > "https://discord.com/api/webhooks/".len();
    if !ok {
        bail!(crate::error::PipelineError::InvalidWebhookUrl);
    }
    Ok(())
}

fn default_cvd_groups() -> Vec<AggregatorConfig> {
    vec![AggregatorConfig {
        id: "BTC-PERP".to_string(),
        display_name: Some("Bitcoin Perpetual CVD".to_string()),
        streams: vec![crate::models::AggregatorStream {
            symbol: "BTCUSDT".to_string(),
            market_type: crate::models::Venue::UsdtM,
            stream_type: crate::models::StreamType::AggTrade,
        }],
        alerts_enabled: true,
    }]
}

/// Aggregator config JSON item, mirrored here for `serde` round-tripping
/// documentation purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfigSchemaDoc {
    pub id: String,
    pub display_name: Option<String>,
    pub streams: Vec<StreamSchemaDoc>,
    pub alerts_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSchemaDoc {
    pub symbol: String,
    pub market_type: String,
    pub stream_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_url_validation() {
        assert!(validate_webhook_url("https://discord.com/api/webhooks/123/abc").is_ok());
        assert!(validate_webhook_url("https://discordapp.com/api/webhooks/123/abc").is_ok());
        assert!(validate_webhook_url("https://evil.com/api/webhooks/123/abc").is_err());
        assert!(validate_webhook_url("https://discord.com/api/webhooks/").is_err());
    }

    #[test]
    fn default_groups_non_empty() {
        assert!(!default_cvd_groups().is_empty());
    }
}
