//! SQLite mirror of the JSONL ledger.
//!
//! The mirror exists for fast querying (operator UI, CLI status). The
//! JSONL file is authoritative; the verifier never reads the mirror, and a
//! mirror failure never blocks an append.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OpenFlags};

use super::{LedgerEntry, LedgerError};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS entries (
    seq            INTEGER PRIMARY KEY,
    ts             TEXT NOT NULL,
    session_id     TEXT NOT NULL,
    role           TEXT NOT NULL,
    action         TEXT NOT NULL,
    payload_hash   TEXT NOT NULL,
    prev_hash      TEXT NOT NULL,
    this_hash      TEXT NOT NULL,
    signature      TEXT NOT NULL,
    signer_key_id  TEXT NOT NULL,
    config_hash    TEXT NOT NULL,
    soft_signals   TEXT,
    hard_actions   TEXT
);
CREATE INDEX IF NOT EXISTS idx_entries_session ON entries(session_id);
CREATE INDEX IF NOT EXISTS idx_entries_action ON entries(action);
";

/// The SQLite mirror. Mutex poisoning indicates a panic in another
/// thread, which is unrecoverable.
pub struct Mirror {
    conn: Mutex<Connection>,
}

impl Mirror {
    /// Opens or creates the mirror database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory mirror for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts one entry tuple.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (duplicate seq, disk error).
    pub fn insert(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entries (seq, ts, session_id, role, action, payload_hash, prev_hash, this_hash, signature, signer_key_id, config_hash, soft_signals, hard_actions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                entry.seq,
                entry.ts,
                entry.session_id,
                entry.role,
                entry.action,
                entry.payload_hash,
                entry.prev_hash,
                entry.this_hash,
                entry.signature,
                entry.signer_key_id,
                entry.config_hash,
                entry.soft_signals.as_ref().map(|s| s.join(",")),
                entry.hard_actions.as_ref().map(|s| s.join(",")),
            ],
        )?;
        Ok(())
    }

    /// Total mirrored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<u64, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    /// Sequence numbers and actions for one session, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn session_actions(&self, session_id: &str) -> Result<Vec<(u64, String)>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seq, action FROM entries WHERE session_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                #[allow(clippy::cast_sign_loss)]
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
