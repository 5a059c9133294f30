//! Single-file relational store: one `rusqlite::Connection` behind a
//! `parking_lot::Mutex`, shared (via `Arc`) across the scheduler, the
//! HTTP handlers, and the peer registry. The mutex is the single-writer
//! discipline called for in §5 — SQLite would also serialize writes, but
//! making it explicit in the type keeps write ordering visible and avoids
//! `SQLITE_BUSY` churn.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Forward-only, idempotent schema migration. Safe to call on every
    /// startup: tables are created if absent, and each expected column is
    /// added defensively if an older schema version is missing it.
    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS facts (
                fact_id               TEXT PRIMARY KEY,
                content               BLOB NOT NULL,
                adl_summary           TEXT NOT NULL DEFAULT '',
                source_url            TEXT NOT NULL DEFAULT '',
                ingest_timestamp_utc  TEXT NOT NULL,
                status                TEXT NOT NULL DEFAULT 'uncorroborated',
                trust_score           INTEGER NOT NULL DEFAULT 1,
                fragment_state        TEXT NOT NULL DEFAULT 'unknown',
                fragment_score        REAL NOT NULL DEFAULT 0.0,
                fragment_reason       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_facts_fragment_state ON facts(fragment_state);

            CREATE TABLE IF NOT EXISTS fact_sources (
                fact_id     TEXT NOT NULL,
                source_url  TEXT NOT NULL,
                PRIMARY KEY (fact_id, source_url)
            );

            CREATE TABLE IF NOT EXISTS blocks (
                block_id            TEXT PRIMARY KEY,
                previous_block_id   TEXT NOT NULL,
                height              INTEGER NOT NULL,
                created_at_utc      TEXT NOT NULL,
                fact_ids            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks(height);

            CREATE TABLE IF NOT EXISTS fact_relationships (
                fact_a  TEXT NOT NULL,
                fact_b  TEXT NOT NULL,
                kind    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fact_relationships_pair
                ON fact_relationships(fact_a, fact_b);

            CREATE TABLE IF NOT EXISTS peers (
                url             TEXT PRIMARY KEY,
                last_seen_utc   TEXT NOT NULL,
                reputation      REAL NOT NULL DEFAULT 0.1
            );",
        )?;

        for (table, column, decl) in [
            ("facts", "adl_summary", "TEXT NOT NULL DEFAULT ''"),
            ("facts", "fragment_reason", "TEXT"),
            ("facts", "fragment_score", "REAL NOT NULL DEFAULT 0.0"),
        ] {
            ensure_column(&conn, table, column, decl)?;
        }

        Ok(())
    }
}

fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    if !existing.iter().any(|c| c == column) {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
        info!(table, column, "added missing column via forward migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let store = Store::open(":memory:").unwrap();
        store.migrate().unwrap();
        store.migrate().unwrap();
        let conn = store.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", [], |r| r.get(0))
            .unwrap();
        assert!(count >= 5);
    }
}
