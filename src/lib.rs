//! Binance multi-venue market-data acquisition pipeline.
//!
//! Ingests streamed trades and liquidations, polled candles and top-trader
//! ratios, and historical aggregated trades across spot, USDT-margined and
//! coin-margined venues; persists them to an embedded SQLite store; computes
//! a cumulative-volume-delta anomaly signal; and dispatches alerts through a
//! durable at-least-once queue.

pub mod alerts;
pub mod collectors;
pub mod config;
pub mod cvd;
pub mod error;
pub mod models;
pub mod push;
pub mod rate_limiter;
pub mod rest;
pub mod store;
pub mod symbol_registry;

mod backup;
pub use backup::BackupScheduler;
