//! Core domain types shared across the pipeline.
//!
//! Representation choices favor plain, `serde`-friendly structs over newtype
//! wrappers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the three venues this pipeline ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Spot,
    UsdtM,
    CoinM,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Spot => "SPOT",
            Venue::UsdtM => "USDT-M",
            Venue::CoinM => "COIN-M",
        }
    }

    pub fn parse(s: &str) -> Option<Venue> {
        match s.to_ascii_uppercase().as_str() {
            "SPOT" => Some(Venue::Spot),
            "USDT-M" | "USDTM" | "USDT_M" => Some(Venue::UsdtM),
            "COIN-M" | "COINM" | "COIN_M" => Some(Venue::CoinM),
            _ => None,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Active,
    Inactive,
}

impl SymbolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolStatus::Active => "ACTIVE",
            SymbolStatus::Inactive => "INACTIVE",
        }
    }
}

/// A catalog entry for one `(symbol, venue)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol: String,
    pub venue: Venue,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: SymbolStatus,
    pub contract_type: Option<String>,
    pub delivery_date: Option<i64>,
    pub onboard_date: Option<i64>,
    pub tick_size: Option<f64>,
    pub step_size: Option<f64>,
    pub min_notional: Option<f64>,
    pub updated_at: i64,
}

/// Candle interval, one of the three the pipeline polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleInterval {
    OneMinute,
    ThirtyMinutes,
    OneDay,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::ThirtyMinutes => "30m",
            CandleInterval::OneDay => "1d",
        }
    }

    /// Table name this interval's candles live in.
    pub fn table_name(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "candles_1m",
            CandleInterval::ThirtyMinutes => "candles_30m",
            CandleInterval::OneDay => "candles_1d",
        }
    }

    pub fn all() -> [CandleInterval; 3] {
        [
            CandleInterval::OneMinute,
            CandleInterval::ThirtyMinutes,
            CandleInterval::OneDay,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggTradeSource {
    Push,
    Rest,
}

impl AggTradeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggTradeSource::Push => "push",
            AggTradeSource::Rest => "rest",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedTrade {
    pub symbol: String,
    pub venue: Venue,
    pub trade_id: i64,
    pub price: f64,
    pub quantity: f64,
    pub first_trade_id: i64,
    pub last_trade_id: i64,
    pub trade_time: i64,
    pub is_buyer_maker: bool,
    pub is_best_match: bool,
    pub source: AggTradeSource,
}

/// Buy/sell direction for both real-time trades and liquidation fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Signed multiplier for CVD accumulation: `+1` for buys, `-1` for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamType {
    AggTrade,
    Trade,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::AggTrade => "aggTrade",
            StreamType::Trade => "trade",
        }
    }

    pub fn parse(s: &str) -> Option<StreamType> {
        match s {
            "aggTrade" => Some(StreamType::AggTrade),
            "trade" => Some(StreamType::Trade),
            _ => None,
        }
    }
}

/// A real-time trade observed on a push channel (or, transitionally,
/// inserted by a historical backfill prior to CVD processing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Monotone surrogate assigned by the store on insert; `None` before insert.
    pub row_id: Option<i64>,
    pub symbol: String,
    pub venue: Venue,
    pub trade_id: i64,
    pub timestamp: i64,
    pub price: f64,
    pub amount: f64,
    pub direction: Side,
    pub stream_type: StreamType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub event_id: String,
    pub symbol: String,
    pub venue: Venue,
    pub side: Side,
    pub price: f64,
    pub original_quantity: f64,
    pub filled_quantity: f64,
    pub event_time: i64,
    pub trade_time: i64,
    pub order_id: Option<i64>,
}

impl LiquidationEvent {
    /// `venue:orderId` when an order id is present, else a composite key
    /// derived from symbol/time/side/quantity.
    pub fn derive_event_id(
        venue: Venue,
        order_id: Option<i64>,
        symbol: &str,
        event_time: i64,
        trade_time: i64,
        side: Side,
        filled_quantity: f64,
    ) -> String {
        match order_id {
            Some(id) => format!("{}:{}", venue.as_str(), id),
            None => format!(
                "{}:{}-{}-{}-{}-{}",
                venue.as_str(),
                symbol,
                event_time,
                trade_time,
                side.as_str(),
                filled_quantity
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioSeries {
    Position,
    Account,
}

impl RatioSeries {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatioSeries::Position => "position",
            RatioSeries::Account => "account",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioSample {
    pub symbol: String,
    pub series: RatioSeries,
    pub timestamp: i64,
    pub long_short_ratio: f64,
    pub long_account: f64,
    pub short_account: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvdRecord {
    pub aggregator_id: String,
    pub timestamp: i64,
    pub cvd_value: f64,
    pub z_score: f64,
    pub delta: f64,
    pub delta_z_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Cumulative,
    Delta,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Cumulative => "cumulative",
            TriggerSource::Delta => "delta",
        }
    }
}

/// Payload persisted to the alert queue and forwarded to the webhook sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvdAlertPayload {
    pub alert_type: String,
    pub symbol: String,
    pub timestamp: i64,
    pub trigger_source: TriggerSource,
    pub trigger_z_score: f64,
    pub z_score: f64,
    pub delta: f64,
    pub delta_z_score: f64,
    pub threshold: f64,
    pub raw_threshold: f64,
    pub log_trigger_z_score: f64,
    pub raw_trigger_z_score: f64,
    pub cumulative_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertQueueRecord {
    pub id: i64,
    pub alert_type: String,
    pub symbol: String,
    pub timestamp: i64,
    pub payload: CvdAlertPayload,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub processed_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryRecord {
    pub id: i64,
    pub alert_type: String,
    pub symbol: String,
    pub timestamp: i64,
    pub payload: CvdAlertPayload,
    pub sent_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessingState {
    pub last_row_id: i64,
    pub last_timestamp: i64,
}

/// A symbol/venue/stream-type tuple an aggregator subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorStream {
    pub symbol: String,
    pub market_type: Venue,
    #[serde(default = "default_stream_type")]
    pub stream_type: StreamType,
}

fn default_stream_type() -> StreamType {
    StreamType::AggTrade
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub streams: Vec<AggregatorStream>,
    #[serde(default = "default_alerts_enabled")]
    pub alerts_enabled: bool,
}

fn default_alerts_enabled() -> bool {
    true
}

/// One row of the ranked external asset list (CSV, RFC 4180).
#[derive(Debug, Clone, Deserialize)]
pub struct RankedAsset {
    pub rank: u32,
    pub name: String,
    pub symbol: String,
}

/// A resolved historical-backfill target: one asset paired with one venue's
/// matching listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalTarget {
    pub asset: String,
    pub venue_symbol: String,
    pub venue: Venue,
}

/// Timestamp helper: current time in integer milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert an integer-millisecond timestamp to a `DateTime<Utc>`.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
