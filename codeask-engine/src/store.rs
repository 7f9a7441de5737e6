//! `SQLite`-backed storage for thread → agent session bindings.

use chrono::Utc;
use codeask_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Durable binding between a conversation thread and an agent-runtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSession {
    pub thread_key: String,
    pub session_id: String,
    pub compacted: bool,
    /// Unix timestamp (seconds) of the first insert
    pub created_at: i64,
}

/// `SQLite` session store.
///
/// One row per `thread_key`. The session id is written once and never
/// updated; only the `compacted` flag changes afterwards.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) a store at the given database path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                thread_key  TEXT PRIMARY KEY,
                session_id  TEXT NOT NULL,
                compacted   INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("Session store lock poisoned: {e}")))
    }

    /// Look up the full record for a thread.
    pub fn get(&self, thread_key: &str) -> Result<Option<ThreadSession>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT thread_key, session_id, compacted, created_at
                 FROM sessions WHERE thread_key = ?1",
                params![thread_key],
                |row| {
                    Ok(ThreadSession {
                        thread_key: row.get(0)?,
                        session_id: row.get(1)?,
                        compacted: row.get::<_, i64>(2)? != 0,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a binding unless the thread already has one.
    ///
    /// Returns the stored session id and whether this call inserted it.
    /// When another writer won the race, its session id is returned.
    pub fn insert_if_absent(&self, thread_key: &str, session_id: &str) -> Result<(String, bool)> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO sessions (thread_key, session_id, compacted, created_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(thread_key) DO NOTHING",
            params![thread_key, session_id, Utc::now().timestamp()],
        )?;

        let stored: String = conn.query_row(
            "SELECT session_id FROM sessions WHERE thread_key = ?1",
            params![thread_key],
            |row| row.get(0),
        )?;

        Ok((stored, inserted == 1))
    }

    /// Read the compacted flag. Unknown threads report `false`.
    pub fn is_compacted(&self, thread_key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let flag: Option<i64> = conn
            .query_row(
                "SELECT compacted FROM sessions WHERE thread_key = ?1",
                params![thread_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    /// Write the compacted flag for an existing thread.
    pub fn set_compacted(&self, thread_key: &str, compacted: bool) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sessions SET compacted = ?2 WHERE thread_key = ?1",
            params![thread_key, i64::from(compacted)],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("no session for thread '{thread_key}'")));
        }
        Ok(())
    }

    /// Number of stored thread bindings.
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Health check: verify database is accessible.
    pub fn health_check(&self) -> bool {
        self.conn
            .lock()
            .map(|c| c.execute_batch("SELECT 1").is_ok())
            .unwrap_or(false)
    }
}
