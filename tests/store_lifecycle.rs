//! End-to-end store lifecycle tests against a real file-backed database,
//! complementing the in-memory unit tests beside each `src/store/*.rs`
//! module. Covers scenarios that depend on surviving a reopen (migrations,
//! backup checkpoint) rather than a single in-process `Connection`.

use binance_cvd_pipeline::models::{
    AggTradeSource, AggregatedTrade, LiquidationEvent, Side, Symbol, SymbolStatus, Venue,
};
use binance_cvd_pipeline::store::Store;

fn db_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

fn sample_symbol(symbol: &str, venue: Venue) -> Symbol {
    Symbol {
        symbol: symbol.to_string(),
        venue,
        base_asset: symbol.trim_end_matches("USDT").to_string(),
        quote_asset: "USDT".to_string(),
        status: SymbolStatus::Active,
        contract_type: None,
        delivery_date: None,
        onboard_date: None,
        tick_size: Some(0.01),
        step_size: Some(0.001),
        min_notional: Some(10.0),
        updated_at: 0,
    }
}

#[test]
fn migrations_are_idempotent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "binance.db");

    let store = Store::open(&path).unwrap();
    store
        .upsert_symbol_catalog(Venue::Spot, &[sample_symbol("BTCUSDT", Venue::Spot)])
        .unwrap();
    drop(store);

    // Reopening re-runs migration application; it must be a no-op against
    // already-applied migrations and must not disturb existing data.
    let reopened = Store::open(&path).unwrap();
    let active = reopened.active_symbols(Venue::Spot).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].symbol, "BTCUSDT");
}

#[test]
fn symbol_deactivation_scenario_survives_reopen() {
    // Against a real file rather than an in-memory connection, since this
    // is the shape a restarted ingest process sees.
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "binance.db");

    {
        let store = Store::open(&path).unwrap();
        store
            .upsert_symbol_catalog(Venue::Spot, &[sample_symbol("LTCUSDT", Venue::Spot)])
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    store
        .upsert_symbol_catalog(Venue::Spot, &[sample_symbol("BTCUSDT", Venue::Spot)])
        .unwrap();

    let active = store.active_symbols(Venue::Spot).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].symbol, "BTCUSDT");
}

#[test]
fn agg_trade_checkpoint_scenario_against_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&db_path(&dir, "asset.db")).unwrap();

    let trade = |trade_id: i64, trade_time: i64| AggregatedTrade {
        symbol: "ETHUSDT".to_string(),
        venue: Venue::Spot,
        trade_id,
        price: 2000.0,
        quantity: 1.0,
        first_trade_id: trade_id,
        last_trade_id: trade_id,
        trade_time,
        is_buyer_maker: false,
        is_best_match: true,
        source: AggTradeSource::Rest,
    };

    store.upsert_agg_trades(&[trade(101, 1000)]).unwrap();
    store.upsert_agg_trades(&[trade(102, 2000)]).unwrap();
    store.upsert_agg_trades(&[trade(102, 2000)]).unwrap();

    let checkpoint = store.last_agg_trade_checkpoint("ETHUSDT", Venue::Spot).unwrap().unwrap();
    assert_eq!(checkpoint.trade_id, 102);
    assert_eq!(checkpoint.trade_time, 2000);
    assert_eq!(store.agg_trade_count("ETHUSDT", Venue::Spot).unwrap(), 2);
}

#[test]
fn liquidation_dedup_scenario_keeps_first_insert() {
    // A second insert with the same event_id must not overwrite the first.
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&db_path(&dir, "binance.db")).unwrap();

    let event = |price: f64| LiquidationEvent {
        event_id: "USDT-M:liquidation-1".to_string(),
        symbol: "BTCUSDT".to_string(),
        venue: Venue::UsdtM,
        side: Side::Sell,
        price,
        original_quantity: 1.0,
        filled_quantity: 1.0,
        event_time: 1000,
        trade_time: 999,
        order_id: Some(1),
    };

    store.insert_liquidations(&[event(25000.0)]).unwrap();
    store.insert_liquidations(&[event(26000.0)]).unwrap();

    assert_eq!(store.liquidation_count("BTCUSDT").unwrap(), 1);
}

#[test]
fn backup_checkpoint_and_copy_produces_a_readable_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&db_path(&dir, "binance.db")).unwrap();
    store
        .upsert_symbol_catalog(Venue::Spot, &[sample_symbol("BTCUSDT", Venue::Spot)])
        .unwrap();

    let dest = db_path(&dir, "backup_copy.sqlite");
    let size = store.checkpoint_and_copy_to(&dest).unwrap();
    assert!(size > 0);

    let copy = Store::open(&dest).unwrap();
    assert_eq!(copy.active_symbols(Venue::Spot).unwrap().len(), 1);
}
