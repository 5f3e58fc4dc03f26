//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply a list of statements atomically; the transaction rolls back on drop
fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: submission queue and photos
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS submissions (
                local_id TEXT PRIMARY KEY,
                server_id TEXT,
                record_number TEXT,
                payload TEXT NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('pending', 'syncing', 'synced', 'failed')),
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                retryable INTEGER NOT NULL DEFAULT 1,
                next_attempt_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced_at INTEGER
            )",
            "CREATE INDEX IF NOT EXISTS idx_submissions_created
                ON submissions(created_at ASC, local_id ASC)",
            "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status)",
            "CREATE TABLE IF NOT EXISTS submission_photos (
                local_id TEXT NOT NULL REFERENCES submissions(local_id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                asset_ref TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'uploaded', 'failed')),
                remote_url TEXT,
                last_error TEXT,
                PRIMARY KEY (local_id, position)
            )",
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )?;

    tracing::info!("Migrated queue database to version 1");
    Ok(())
}

/// Migration to version 2: drain history for last-sync reporting
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS sync_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at INTEGER NOT NULL,
                completed_at INTEGER NOT NULL,
                succeeded INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                interrupted INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_runs_completed ON sync_runs(completed_at DESC)",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )?;

    tracing::info!("Migrated queue database to version {CURRENT_VERSION}");
    Ok(())
}
