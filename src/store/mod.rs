//! Embedded SQLite persistence layer.
//!
//! A single `rusqlite::Connection` behind a lock, WAL pragmas applied on
//! open, idempotent upsert forms per row kind. The lock doubles as this
//! store's single-writer serialization chain — every write path takes it
//! for the duration of one `BEGIN IMMEDIATE … COMMIT` transaction, so
//! concurrent callers within this process simply queue on the mutex;
//! concurrent *processes* sharing the same file fall back to SQLite's own
//! `BEGIN IMMEDIATE` contention plus `busy_timeout`.

pub mod alerts;
pub mod candles;
pub mod cvd;
pub mod liquidations;
mod migrations;
pub mod processing_state;
pub mod ratios;
pub mod symbols;
pub mod trades;

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let expanded = expand_home(path);
        if let Some(parent) = std::path::Path::new(&expanded).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut conn = Connection::open_with_flags(&expanded, flags)
            .with_context(|| format!("failed to open database at {expanded}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to apply pragmas")?;

        migrations::apply(&mut conn).context("failed to apply schema migrations")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        migrations::apply(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside a `BEGIN IMMEDIATE … COMMIT/ROLLBACK` transaction,
    /// serialized against every other write on this store.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(v) => {
                tx.commit()?;
                Ok(v)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e.into())
            }
        }
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Path of the backing file, or `:memory:` for the in-memory test store.
    pub fn database_path(&self) -> Result<String> {
        let conn = self.conn.lock();
        Ok(conn.path().unwrap_or(":memory:").to_string())
    }

    /// Checkpoint the WAL into the main file, then copy it to `dest`. Holds
    /// the write lock for the duration so no writer can interleave a
    /// partial page into the copied file.
    pub fn checkpoint_and_copy_to(&self, dest: &str) -> Result<u64> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .context("failed to checkpoint WAL before backup")?;
        let source = conn.path().context("store has no backing file")?.to_string();
        std::fs::copy(&source, dest).with_context(|| format!("failed to copy {source} to {dest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_applies_migrations() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert!(count > 0);
    }
}
