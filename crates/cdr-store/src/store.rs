//! Durable outbox backed by SQLite.
//!
//! One writer path (the event ingest) and one reader path (the
//! delivery pipeline) share the store; the connection sits behind a
//! mutex and every operation is a single short transaction.

use crate::{migrations, CallRecord, PendingRecording, StoreResult};
use call_routing::CallType;
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// SQLite-backed store for undelivered records and recordings.
pub struct CdrStore {
    conn: Mutex<Connection>,
}

impl CdrStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist a record, replacing any previous version with the same
    /// unique id. Re-delivered PBX events therefore collapse into one
    /// outbox row.
    pub fn put_cdr(&self, record: &CallRecord) -> StoreResult<()> {
        let extra = serde_json::to_string(&record.extra)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cdr (unique_id, inner_number, opponent_number, caller_id,
                              call_type, country, tenant_id, disposition, start_time,
                              billable_seconds, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(unique_id) DO UPDATE SET
                 inner_number = excluded.inner_number,
                 opponent_number = excluded.opponent_number,
                 caller_id = excluded.caller_id,
                 call_type = excluded.call_type,
                 country = excluded.country,
                 tenant_id = excluded.tenant_id,
                 disposition = excluded.disposition,
                 start_time = excluded.start_time,
                 billable_seconds = excluded.billable_seconds,
                 extra = excluded.extra",
            params![
                record.unique_id,
                record.inner_number,
                record.opponent_number,
                record.caller_id,
                record.call_type.code(),
                record.country,
                record.tenant_id,
                record.disposition,
                record.start_time,
                record.billable_seconds,
                extra,
            ],
        )?;
        debug!(unique_id = %record.unique_id, "Call record persisted");
        Ok(())
    }

    /// Fetch one record by its unique id.
    pub fn get_cdr(&self, unique_id: &str) -> StoreResult<Option<CallRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT unique_id, inner_number, opponent_number, caller_id, call_type,
                    country, tenant_id, disposition, start_time, billable_seconds, extra
             FROM cdr WHERE unique_id = ?1",
        )?;
        let result = stmt.query_row(params![unique_id], row_to_record);
        match result {
            Ok(record) => Ok(Some(record?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Oldest undelivered records, insertion order, at most `limit`.
    pub fn select_pending(&self, limit: usize) -> StoreResult<Vec<CallRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT unique_id, inner_number, opponent_number, caller_id, call_type,
                    country, tenant_id, disposition, start_time, billable_seconds, extra
             FROM cdr ORDER BY rowid LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Remove a delivered record. Returns false when the row was
    /// already gone, which is not an error.
    pub fn delete_cdr(&self, unique_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM cdr WHERE unique_id = ?1", params![unique_id])?;
        Ok(affected > 0)
    }

    /// Number of undelivered records.
    pub fn cdr_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cdr", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remember a recording for later announcement. Duplicate
    /// announcements for one call are ignored.
    pub fn add_recording(&self, recording: &PendingRecording) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO pending_recording (unique_id, file_name, inner_number, country)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                recording.unique_id,
                recording.file_name,
                recording.inner_number,
                recording.country,
            ],
        )?;
        Ok(())
    }

    /// Oldest unannounced recordings, at most `limit`.
    pub fn select_recordings(&self, limit: usize) -> StoreResult<Vec<PendingRecording>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT unique_id, file_name, inner_number, country
             FROM pending_recording ORDER BY rowid LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PendingRecording {
                unique_id: row.get(0)?,
                file_name: row.get(1)?,
                inner_number: row.get(2)?,
                country: row.get(3)?,
            })
        })?;
        let mut recordings = Vec::new();
        for row in rows {
            recordings.push(row?);
        }
        Ok(recordings)
    }

    /// Remove an announced recording.
    pub fn delete_recording(&self, unique_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM pending_recording WHERE unique_id = ?1",
            params![unique_id],
        )?;
        Ok(affected > 0)
    }

    pub fn recording_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_recording", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// The extra column holds JSON; its parse error has to travel through
/// the rusqlite row-mapping signature, hence the nested result.
fn row_to_record(row: &Row<'_>) -> Result<StoreResult<CallRecord>, rusqlite::Error> {
    let extra_raw: String = row.get(10)?;
    let extra: Result<BTreeMap<String, String>, _> = serde_json::from_str(&extra_raw);
    Ok(match extra {
        Ok(extra) => Ok(CallRecord {
            unique_id: row.get(0)?,
            inner_number: row.get(1)?,
            opponent_number: row.get(2)?,
            caller_id: row.get(3)?,
            call_type: CallType::from_code(row.get::<_, i64>(4)?),
            country: row.get(5)?,
            tenant_id: row.get(6)?,
            disposition: row.get(7)?,
            start_time: row.get(8)?,
            billable_seconds: row.get(9)?,
            extra,
        }),
        Err(e) => Err(e.into()),
    })
}
