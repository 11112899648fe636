//! Ingestion collectors.

pub mod historical_trade_collector;
pub mod liquidation_collector;
pub mod ratio_collector;
pub mod streaming;
pub mod targets;
pub mod trade_collector;

pub use historical_trade_collector::HistoricalTradeCollector;
pub use liquidation_collector::LiquidationCollector;
pub use ratio_collector::RatioCollector;
pub use trade_collector::TradeCollector;
