//! Process entrypoint: bootstrap, role dispatch, graceful shutdown.
//!
//! `dotenv::dotenv()` then `tracing_subscriber::registry()` with an
//! env-filter and an optional JSON layer selected by an env var, then a
//! role-scoped orchestration function that spawns each component's
//! `run(running)` loop and awaits all handles once `running` clears.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use binance_cvd_pipeline::alerts::{AlertDispatcher, AlertService};
use binance_cvd_pipeline::collectors::targets;
use binance_cvd_pipeline::collectors::{HistoricalTradeCollector, LiquidationCollector, RatioCollector, TradeCollector};
use binance_cvd_pipeline::config::{Config, ProcessRole};
use binance_cvd_pipeline::cvd::CvdAggregationWorker;
use binance_cvd_pipeline::models::Venue;
use binance_cvd_pipeline::rate_limiter::RateLimiter;
use binance_cvd_pipeline::rest::{self, RestClient};
use binance_cvd_pipeline::store::Store;
use binance_cvd_pipeline::symbol_registry::{self, SymbolRegistry};
use binance_cvd_pipeline::BackupScheduler;

/// Rolling window length for CVD statistics; fixed per the aggregation
/// contract rather than exposed as a knob.
const CVD_HISTORY_WINDOW_MS: i64 = 72 * 3600 * 1000;

/// Declared weight budgets for a 1-minute window, before `RATE_LIMIT_BUFFER`
/// is applied.
const SPOT_REST_CAPACITY_PER_MINUTE: f64 = 1200.0;
const USDM_REST_CAPACITY_PER_MINUTE: f64 = 2400.0;
const COINM_REST_CAPACITY_PER_MINUTE: f64 = 2400.0;
const SYMBOL_REGISTRY_CAPACITY_PER_MINUTE: f64 = 60.0;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn build_rate_limiter(config: &Config) -> Arc<RateLimiter> {
    let limiter = RateLimiter::new();
    let scale = (1.0 - config.rate_limiter.buffer).max(0.0);
    let minute = Duration::from_secs(60);

    limiter.register_endpoint(rest::ENDPOINT_SPOT, SPOT_REST_CAPACITY_PER_MINUTE * scale, minute);
    limiter.register_endpoint(rest::ENDPOINT_USDM, USDM_REST_CAPACITY_PER_MINUTE * scale, minute);
    limiter.register_endpoint(rest::ENDPOINT_COINM, COINM_REST_CAPACITY_PER_MINUTE * scale, minute);

    limiter.register_endpoint(
        symbol_registry::ENDPOINT_SPOT,
        SYMBOL_REGISTRY_CAPACITY_PER_MINUTE * scale,
        minute,
    );
    limiter.register_endpoint(
        symbol_registry::ENDPOINT_USDM,
        SYMBOL_REGISTRY_CAPACITY_PER_MINUTE * scale,
        minute,
    );
    limiter.register_endpoint(
        symbol_registry::ENDPOINT_COINM,
        SYMBOL_REGISTRY_CAPACITY_PER_MINUTE * scale,
        minute,
    );

    Arc::new(limiter)
}

/// Installs a background task that flips `running` to false on SIGINT or
/// (on unix) SIGTERM, matching the exit-code-0 "clean shutdown" contract.
fn install_shutdown_hook(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler, watching SIGINT only");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("received SIGINT, shutting down");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                _ = term.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c, shutting down");
        }
        running.store(false, Ordering::SeqCst);
    });
}

fn ws_url_for(config: &Config, venue: Venue) -> String {
    match venue {
        Venue::Spot => config.ws_urls.spot.clone(),
        Venue::UsdtM => config.ws_urls.usdt_m.clone(),
        Venue::CoinM => config.ws_urls.coin_m.clone(),
    }
}

/// Deduplicated `venue -> symbols` map drawn from the configured aggregator
/// streams; real-time trade and liquidation subscriptions both key off this
/// set, since liquidations are not separately configurable.
fn symbols_by_venue(config: &Config) -> HashMap<Venue, Vec<String>> {
    let mut by_venue: HashMap<Venue, Vec<String>> = HashMap::new();
    for group in &config.cvd.groups {
        for stream in &group.streams {
            by_venue.entry(stream.market_type).or_default().push(stream.symbol.clone());
        }
    }
    for symbols in by_venue.values_mut() {
        symbols.sort();
        symbols.dedup();
    }
    by_venue
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    let store = Store::open(&config.store.database_path).context("failed to open primary store")?;
    let limiter = build_rate_limiter(&config);
    let rest = Arc::new(RestClient::new(config.rest_urls.clone(), limiter.clone())?);

    let running = Arc::new(AtomicBool::new(true));
    install_shutdown_hook(running.clone());

    let role = config.role;
    let result = match role {
        ProcessRole::Ingest => run_ingest(config, store, rest, limiter, running).await,
        ProcessRole::Aggregate => run_aggregate(config, store, running).await,
        ProcessRole::Alert => run_alert(config, store, running).await,
    };

    if let Err(e) = &result {
        error!(error = %e, role = ?role, "process exiting with error");
    } else {
        info!(role = ?role, "process shut down cleanly");
    }
    result
}

async fn run_ingest(
    config: Config,
    store: Store,
    rest: Arc<RestClient>,
    limiter: Arc<RateLimiter>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let mut handles = Vec::new();

    let (updated_tx, _updated_rx) = tokio::sync::mpsc::unbounded_channel();
    let registry = Arc::new(SymbolRegistry::new(
        config.rest_urls.clone(),
        limiter.clone(),
        store.clone(),
        config.symbol_update_hour_utc,
        Some(updated_tx),
    )?);
    registry
        .refresh_all()
        .await
        .context("initial symbol catalog refresh failed")?;
    {
        let registry = registry.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move { registry.run(running).await }));
    }

    let by_venue = symbols_by_venue(&config);
    for (venue, symbols) in &by_venue {
        let ws_url = ws_url_for(&config, *venue);
        let trade_collector = Arc::new(TradeCollector::new(*venue, &ws_url, symbols, store.clone()));
        let running_trade = running.clone();
        handles.push(tokio::spawn(async move { trade_collector.run(running_trade).await }));

        let liq_collector = Arc::new(LiquidationCollector::new(*venue, &ws_url, symbols, store.clone()));
        let running_liq = running.clone();
        handles.push(tokio::spawn(async move { liq_collector.run(running_liq).await }));
    }

    let ranked = targets::read_ranked_assets(&config.historical.ranked_asset_list_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to read ranked asset list, historical backfill has no targets");
        Vec::new()
    });
    let excluded = symbol_registry::default_excluded_assets();
    let spot_symbols = store.active_symbols(Venue::Spot)?;
    let usdm_symbols = store.active_symbols(Venue::UsdtM)?;
    let historical_targets = targets::resolve_targets(&ranked, &spot_symbols, &usdm_symbols, &excluded);
    info!(count = historical_targets.len(), "resolved historical backfill targets");

    let historical = Arc::new(HistoricalTradeCollector::new(
        rest.clone(),
        config.store.asset_store_dir.clone(),
        historical_targets,
        config.historical.fetch_interval_ms,
        config.historical.initial_lookback_ms,
        config.historical.rest_limit,
        config.historical.max_retries,
        config.historical.retry_delay_ms,
    ));
    {
        let running = running.clone();
        handles.push(tokio::spawn(async move { historical.run(running).await }));
    }

    let ratio = Arc::new(RatioCollector::new(
        rest,
        store.clone(),
        config.ratio.interval_ms,
        config.ratio.request_delay_ms,
        config.ratio.max_retries,
        config.ratio.retry_delay_ms,
    ));
    {
        let running = running.clone();
        handles.push(tokio::spawn(async move { ratio.run(running).await }));
    }

    if config.backup.enabled {
        let backup = Arc::new(BackupScheduler::new(
            store,
            config.backup.path.clone(),
            config.backup.interval_ms,
            config.backup.single_file,
            config.backup.daily_days,
            config.backup.weekly_weeks,
        ));
        let running = running.clone();
        handles.push(tokio::spawn(async move { backup.run(running).await }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn run_aggregate(config: Config, store: Store, running: Arc<AtomicBool>) -> Result<()> {
    let worker = CvdAggregationWorker::new(
        store,
        config.cvd.groups,
        CVD_HISTORY_WINDOW_MS,
        config.cvd.batch_size,
        config.cvd.poll_interval_ms,
        config.cvd.zscore_threshold,
        config.cvd.suppression_minutes,
        true,
    );
    worker.run(running).await;
    Ok(())
}

async fn run_alert(config: Config, store: Store, running: Arc<AtomicBool>) -> Result<()> {
    let sink = AlertService::new(config.alert_queue.webhook_url.clone(), store.clone())?;
    let dispatcher = AlertDispatcher::new(
        store,
        sink,
        config.alert_queue.poll_interval_ms,
        config.alert_queue.batch_size,
        config.alert_queue.max_attempts,
    );
    dispatcher.run(running).await;
    Ok(())
}
