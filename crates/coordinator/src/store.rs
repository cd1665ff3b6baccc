//! SQLite persistence for signing requests
//!
//! One row per request. The whole aggregate is stored as JSON next to a few
//! indexed columns; rows are replaced on every committed transition and are
//! never deleted.

use coldsign_core::SigningRequest;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

/// Errors from the request store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Durable store behind the request registry
pub struct RequestStore {
    conn: Mutex<Connection>,
}

impl RequestStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// In-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS signing_requests (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                body_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_signing_requests_status
                ON signing_requests(status);
            CREATE INDEX IF NOT EXISTS idx_signing_requests_kind
                ON signing_requests(kind);
            CREATE INDEX IF NOT EXISTS idx_signing_requests_created
                ON signing_requests(created_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a request
    pub fn save(&self, request: &SigningRequest) -> Result<(), StoreError> {
        let body = serde_json::to_string(request)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO signing_requests
             (id, kind, status, created_at, expires_at, body_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id,
                request.kind.to_string(),
                request.status.to_string(),
                request.created_at.to_rfc3339(),
                request.expires_at.to_rfc3339(),
                body,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<SigningRequest>, StoreError> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body_json FROM signing_requests WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|json| decode_row(id, &json)).transpose()
    }

    /// Every stored request, oldest first
    pub fn load_all(&self) -> Result<Vec<SigningRequest>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, body_json FROM signing_requests ORDER BY created_at, id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter().map(|(id, json)| decode_row(id, json)).collect()
    }

    /// Remove a request; only used to undo a creation that was never audited
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM signing_requests WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM signing_requests", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn decode_row(id: &str, json: &str) -> Result<SigningRequest, StoreError> {
    let request: SigningRequest = serde_json::from_str(json)?;
    if request.id != id {
        return Err(StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("body carries id {}", request.id),
        });
    }
    request.check_invariants().map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    Ok(request)
}
