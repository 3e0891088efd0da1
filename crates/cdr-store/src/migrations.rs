//! Schema migrations, run in order and tracked in the `migrations`
//! table.

use crate::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_cdr_outbox(conn)?;
    }
    if current_version < 2 {
        migrate_v2_pending_recordings(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: the durable call-record outbox.
fn migrate_v1_cdr_outbox(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cdr (
            unique_id TEXT PRIMARY KEY,
            inner_number TEXT NOT NULL,
            opponent_number TEXT NOT NULL,
            caller_id TEXT NOT NULL,
            call_type INTEGER NOT NULL,
            country TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            disposition TEXT NOT NULL,
            start_time TEXT NOT NULL,
            billable_seconds INTEGER NOT NULL,
            extra TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    record_migration(conn, 1, "cdr_outbox")
}

/// V2: recordings waiting to be announced.
fn migrate_v2_pending_recordings(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pending_recording (
            unique_id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            inner_number TEXT NOT NULL,
            country TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    record_migration(conn, 2, "pending_recordings")
}
