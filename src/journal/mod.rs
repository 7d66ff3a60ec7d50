//! Redelivery journal backed by SQLite.
//!
//! Records every submission and forgets it on completion, so whatever is
//! left after a crash is exactly the work that never finished. Only the
//! most recent pending item is offered back ([`latest_pending`]); whether
//! to resubmit it is the integrator's call, not the dispatcher's.
//!
//! [`latest_pending`]: Journal::latest_pending

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Mutex;

/// Persistent record of submitted-but-unfinished work.
pub struct Journal {
    conn: Mutex<Connection>,
}

impl Journal {
    /// Open or create the journal in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open journal database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS journal (
                token        INTEGER PRIMARY KEY,
                submitted_at TEXT NOT NULL DEFAULT (datetime('now')),
                payload      TEXT NOT NULL
            )",
        )
        .context("failed to create journal table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record a submission. Call before (or right after) `submit`.
    pub fn record<T: Serialize>(&self, token: u64, payload: &T) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO journal (token, payload) VALUES (?1, ?2)",
            (token as i64, &json),
        )?;
        Ok(())
    }

    /// Forget a submission. Call when its completion notice arrives.
    pub fn complete(&self, token: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM journal WHERE token = ?1", [token as i64])?;
        Ok(())
    }

    /// The most recent recorded-but-uncompleted item, if any. Only the
    /// latest pending item is redeliverable, older ones are not.
    pub fn latest_pending<T: DeserializeOwned>(&self) -> Result<Option<(u64, T)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT token, payload FROM journal ORDER BY token DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let token: i64 = row.get(0)?;
                let json: String = row.get(1)?;
                let payload = serde_json::from_str(&json)?;
                Ok(Some((token as u64, payload)))
            }
            None => Ok(None),
        }
    }

    /// Number of pending entries.
    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM journal", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Drop every pending entry.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM journal", [])?;
        Ok(())
    }
}
