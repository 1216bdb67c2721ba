//! SQLite storage engine with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `categories` - Category directory
//! - `patterns` - Learned patterns, reinforcement and learning sources
//! - `transactions` - Transaction persistence keyed by identity hash
//!
//! Each domain exposes synchronous methods on [`Database`] and implements the
//! matching async store trait by running them on the blocking thread pool.

use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod categories;
mod patterns;
mod transactions;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Convert stored epoch millis back into a timestamp
pub(crate) fn datetime_from_ms(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations
    pub fn new(path: &str) -> Result<Self> {
        let busy_ms = BUSY_TIMEOUT.as_millis();
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
                busy_ms
            ))
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` so every pooled connection
    /// sees the same database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run `f` against this database on the blocking thread pool
    pub(crate) async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the single writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Categories (owned by the surrounding budgeting system)
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            -- Learned description patterns
            CREATE TABLE IF NOT EXISTS patterns (
                id INTEGER PRIMARY KEY,
                pattern TEXT NOT NULL,                      -- normalized text
                category_id INTEGER NOT NULL,
                confidence REAL NOT NULL,                   -- recomputed on every reinforcement
                frequency INTEGER NOT NULL DEFAULT 1,       -- times confirmed
                last_updated_ms INTEGER NOT NULL,           -- epoch millis
                UNIQUE(pattern, category_id)
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_pattern ON patterns(pattern);

            -- Sources (accepted transactions) that already taught a category
            CREATE TABLE IF NOT EXISTS pattern_sources (
                source TEXT NOT NULL,
                category_id INTEGER NOT NULL,
                learned_at_ms INTEGER NOT NULL,
                PRIMARY KEY (source, category_id)
            );

            -- Transactions, deduplicated per period by identity hash
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                date_ms INTEGER NOT NULL,
                description TEXT NOT NULL,
                amount REAL NOT NULL,
                card_type TEXT,
                period_scope TEXT NOT NULL DEFAULT '',     -- '' when no period
                identity_hash TEXT NOT NULL,
                category_id INTEGER,
                updated_at_ms INTEGER NOT NULL,
                UNIQUE(identity_hash, period_scope)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_period ON transactions(period_scope, date_ms);
            "#,
        )?;

        info!("Database schema initialized at {}", self.db_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
