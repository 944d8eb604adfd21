//! Status ledger backed by SQLite.

use super::{LoginState, StatusLedger, StatusRecord, StatusUpdate};
use crate::error::StoreError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Primary key of the singleton row.
const RECORD_ID: &str = "login_status";

/// Single-row status ledger in SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE session_status (
///     id          TEXT PRIMARY KEY,     -- always 'login_status'
///     state       TEXT NOT NULL,
///     message     TEXT NOT NULL,
///     fetched_at  TEXT,                 -- RFC 3339, set on SUCCESS only
///     force_renew INTEGER NOT NULL,
///     attempt_id  TEXT,
///     updated_at  TEXT NOT NULL         -- RFC 3339
/// );
/// ```
pub struct SqliteStatusLedger {
    conn: Mutex<Connection>,
}

impl SqliteStatusLedger {
    /// Opens (or creates) the ledger database and ensures the table exists.
    ///
    /// Does not seed the record; call [`StatusLedger::seed_default`] once at startup.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open status ledger at {}", path.display()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session_status (
                id          TEXT PRIMARY KEY,
                state       TEXT NOT NULL,
                message     TEXT NOT NULL,
                fetched_at  TEXT,
                force_renew INTEGER NOT NULL DEFAULT 0,
                attempt_id  TEXT,
                updated_at  TEXT NOT NULL
            );",
        )
        .context("Failed to create session_status table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Status ledger connection lock poisoned"))
    }

    fn read(&self) -> Result<Option<StatusRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT state, message, fetched_at, force_renew, attempt_id, updated_at
                 FROM session_status WHERE id = ?1",
                params![RECORD_ID],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read status record")?;

        let Some((state, message, fetched_at, force_renew, attempt_id, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(StatusRecord {
            state: state.parse().context("Corrupt state column")?,
            message,
            fetched_at: fetched_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .context("Corrupt fetched_at column")?,
            force_renew,
            updated_at: parse_timestamp(&updated_at).context("Corrupt updated_at column")?,
            attempt_id,
        }))
    }

    fn write(&self, update: &StatusUpdate) -> Result<usize> {
        let (attempt_set, attempt_value) = match &update.attempt_id {
            Some(value) => (true, value.clone()),
            None => (false, None),
        };

        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE session_status SET
                    state       = COALESCE(?2, state),
                    message     = COALESCE(?3, message),
                    fetched_at  = COALESCE(?4, fetched_at),
                    force_renew = COALESCE(?5, force_renew),
                    updated_at  = COALESCE(?6, updated_at),
                    attempt_id  = CASE WHEN ?7 THEN ?8 ELSE attempt_id END
                 WHERE id = ?1",
                params![
                    RECORD_ID,
                    update.state.map(|s| s.as_str()),
                    update.message,
                    update.fetched_at.map(|t| t.to_rfc3339()),
                    update.force_renew,
                    update.updated_at.map(|t| t.to_rfc3339()),
                    attempt_set,
                    attempt_value,
                ],
            )
            .context("Failed to update status record")?;

        Ok(rows)
    }

    fn insert_default(&self, record: &StatusRecord) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO session_status
                    (id, state, message, fetched_at, force_renew, attempt_id, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, NULL, ?5)",
                params![
                    RECORD_ID,
                    record.state.as_str(),
                    record.message,
                    record.force_renew,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to seed status record")?;

        Ok(rows > 0)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[async_trait]
impl StatusLedger for SqliteStatusLedger {
    async fn get(&self) -> Result<StatusRecord, StoreError> {
        self.read()?.ok_or(StoreError::NotFound)
    }

    async fn set(&self, update: StatusUpdate) -> Result<(), StoreError> {
        match self.write(&update)? {
            0 => Err(StoreError::NotFound),
            _ => Ok(()),
        }
    }

    async fn seed_default(&self) -> Result<bool, StoreError> {
        let record = StatusRecord::initial(Utc::now());
        Ok(self.insert_default(&record)?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("Status ledger ping failed")?;
        Ok(())
    }
}
