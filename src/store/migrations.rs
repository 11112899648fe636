//! Numbered schema migrations.
//!
//! Each migration is a named DDL batch applied inside a single transaction,
//! tracked in `schema_migrations`. Additive "ensure column" steps run last so
//! that new nullable columns can be appended to existing tables without a
//! dedicated numbered migration per column.

use anyhow::{Context, Result};
use rusqlite::Connection;

struct Migration {
    id: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        name: "symbols",
        sql: r#"
            CREATE TABLE IF NOT EXISTS symbols (
                symbol TEXT NOT NULL,
                venue TEXT NOT NULL,
                base_asset TEXT NOT NULL,
                quote_asset TEXT NOT NULL,
                status TEXT NOT NULL,
                contract_type TEXT,
                delivery_date INTEGER,
                onboard_date INTEGER,
                tick_size REAL,
                step_size REAL,
                min_notional REAL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (symbol, venue)
            );
            CREATE INDEX IF NOT EXISTS idx_symbols_venue_status ON symbols(venue, status);
        "#,
    },
    Migration {
        id: 2,
        name: "candles",
        sql: r#"
            CREATE TABLE IF NOT EXISTS candles_1m (
                symbol TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                quote_volume REAL NOT NULL,
                trade_count INTEGER NOT NULL,
                PRIMARY KEY (symbol, open_time)
            );
            CREATE TABLE IF NOT EXISTS candles_30m (
                symbol TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                quote_volume REAL NOT NULL,
                trade_count INTEGER NOT NULL,
                PRIMARY KEY (symbol, open_time)
            );
            CREATE TABLE IF NOT EXISTS candles_1d (
                symbol TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                quote_volume REAL NOT NULL,
                trade_count INTEGER NOT NULL,
                PRIMARY KEY (symbol, open_time)
            );
        "#,
    },
    Migration {
        id: 3,
        name: "agg_trades",
        sql: r#"
            CREATE TABLE IF NOT EXISTS agg_trades (
                symbol TEXT NOT NULL,
                venue TEXT NOT NULL,
                trade_id INTEGER NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL,
                first_trade_id INTEGER NOT NULL,
                last_trade_id INTEGER NOT NULL,
                trade_time INTEGER NOT NULL,
                is_buyer_maker INTEGER NOT NULL,
                is_best_match INTEGER NOT NULL,
                source TEXT NOT NULL,
                PRIMARY KEY (symbol, venue, trade_id)
            );
            CREATE INDEX IF NOT EXISTS idx_agg_trades_time ON agg_trades(symbol, venue, trade_time);
        "#,
    },
    Migration {
        id: 4,
        name: "trade_data",
        sql: r#"
            CREATE TABLE IF NOT EXISTS trade_data (
                symbol TEXT NOT NULL,
                venue TEXT NOT NULL,
                trade_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                price REAL NOT NULL,
                amount REAL NOT NULL,
                direction TEXT NOT NULL,
                stream_type TEXT NOT NULL,
                UNIQUE (symbol, venue, trade_id, stream_type)
            );
            CREATE INDEX IF NOT EXISTS idx_trade_data_rowid_filter
                ON trade_data(symbol, venue, stream_type, rowid);
        "#,
    },
    Migration {
        id: 5,
        name: "liquidations",
        sql: r#"
            CREATE TABLE IF NOT EXISTS liquidations (
                event_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                venue TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                original_quantity REAL NOT NULL,
                filled_quantity REAL NOT NULL,
                event_time INTEGER NOT NULL,
                trade_time INTEGER NOT NULL,
                order_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_liquidations_time ON liquidations(symbol, venue, event_time);
        "#,
    },
    Migration {
        id: 6,
        name: "ratio_samples",
        sql: r#"
            CREATE TABLE IF NOT EXISTS ratio_samples (
                symbol TEXT NOT NULL,
                series TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                long_short_ratio REAL NOT NULL,
                long_account REAL NOT NULL,
                short_account REAL NOT NULL,
                PRIMARY KEY (symbol, series, timestamp)
            );
        "#,
    },
    Migration {
        id: 7,
        name: "cvd_records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS cvd_records (
                aggregator_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                cvd_value REAL NOT NULL,
                z_score REAL NOT NULL,
                delta REAL NOT NULL,
                delta_z_score REAL NOT NULL,
                PRIMARY KEY (aggregator_id, timestamp)
            );
        "#,
    },
    Migration {
        id: 8,
        name: "alert_queue_and_history",
        sql: r#"
            CREATE TABLE IF NOT EXISTS alert_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_type TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                payload TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                processed_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alert_queue_pending
                ON alert_queue(processed_at, timestamp, id);
            CREATE TABLE IF NOT EXISTS alert_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_type TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                payload TEXT NOT NULL,
                sent_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alert_history_lookup
                ON alert_history(alert_type, symbol, timestamp);
        "#,
    },
    Migration {
        id: 9,
        name: "processing_state",
        sql: r#"
            CREATE TABLE IF NOT EXISTS processing_state (
                key TEXT PRIMARY KEY,
                last_row_id INTEGER NOT NULL,
                last_timestamp INTEGER NOT NULL
            );
        "#,
    },
];

/// Additive columns appended after the numbered list, keyed by
/// `(table, column, ddl_fragment)`. Applied best-effort: `ALTER TABLE ...
/// ADD COLUMN` fails if the column already exists, which we treat as success.
const ENSURE_COLUMNS: &[(&str, &str, &str)] = &[];

pub fn apply(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (id INTEGER PRIMARY KEY, name TEXT NOT NULL, applied_at INTEGER NOT NULL)",
    )
    .context("failed to create schema_migrations table")?;

    let tx = conn.transaction().context("failed to open migration transaction")?;
    for migration in MIGRATIONS {
        let already_applied: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE id = ?1)",
                [migration.id],
                |row| row.get(0),
            )
            .context("failed to check schema_migrations")?;
        if already_applied {
            continue;
        }
        tx.execute_batch(migration.sql)
            .with_context(|| format!("migration {} ({}) failed", migration.id, migration.name))?;
        tx.execute(
            "INSERT INTO schema_migrations (id, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.id, migration.name, crate::models::now_ms()],
        )
        .context("failed to record applied migration")?;
    }
    tx.commit().context("failed to commit migrations")?;

    for (table, column, ddl) in ENSURE_COLUMNS {
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}");
        let _ = conn.execute(&sql, []);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_cleanly_twice() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply(&mut conn).unwrap();
        apply(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }
}
