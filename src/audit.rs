//! Append-only audit trail of signing operations.
//!
//! One record per successful signing, written as the last pipeline step and
//! never updated afterwards. The SQLite schema enforces that with triggers.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::hash::Digest;

/// A durable record linking a document, both digests and the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub document_id: String,
    pub original_hash: Digest,
    pub signed_hash: Digest,
    pub signed_file_path: String,
    pub requester_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything about a record except the store-assigned timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub id: Uuid,
    pub document_id: String,
    pub original_hash: Digest,
    pub signed_hash: Digest,
    pub signed_file_path: String,
    pub requester_address: Option<String>,
}

/// Sink for audit records. Implementations must accept concurrent appends.
pub trait AuditSink: Send + Sync {
    /// Durably store `record`, stamping it with the write time.
    fn append(&self, record: NewAuditRecord) -> Result<AuditRecord, PersistenceError>;
}

/// SQLite backed audit trail.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_trail (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        original_hash TEXT NOT NULL,
        signed_hash TEXT NOT NULL,
        signed_file_path TEXT NOT NULL,
        requester_address TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_trail_document ON audit_trail(document_id);

    CREATE TRIGGER IF NOT EXISTS audit_trail_no_update
    BEFORE UPDATE ON audit_trail
    BEGIN
        SELECT RAISE(ABORT, 'audit_trail is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS audit_trail_no_delete
    BEFORE DELETE ON audit_trail
    BEGIN
        SELECT RAISE(ABORT, 'audit_trail is append-only');
    END;
"#;

impl SqliteAuditStore {
    /// Open or create the audit database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Unavailable {
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
        }

        let conn = Connection::open(path).map_err(PersistenceError::Connection)?;
        // WAL lets readers run alongside the single writer.
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(PersistenceError::Query)?;
        Self::with_connection(conn)
    }

    /// A throwaway store, mostly for tests.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(PersistenceError::Connection)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA).map_err(PersistenceError::Query)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Unavailable {
            message: "audit store lock poisoned".to_owned(),
        })
    }

    /// All records for `document_id`, oldest first.
    pub fn records_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<AuditRecord>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, document_id, original_hash, signed_hash, signed_file_path,
                       requester_address, created_at
                FROM audit_trail
                WHERE document_id = ?1
                ORDER BY created_at, rowid
                "#,
            )
            .map_err(PersistenceError::Query)?;

        let rows = stmt
            .query_map(params![document_id], |row| {
                let id: String = row.get(0)?;
                let created_at: String = row.get(6)?;
                Ok(AuditRecord {
                    id: Uuid::parse_str(&id).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    document_id: row.get(1)?,
                    original_hash: row.get(2)?,
                    signed_hash: row.get(3)?,
                    signed_file_path: row.get(4)?,
                    requester_address: row.get(5)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                6,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                })
            })
            .map_err(PersistenceError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(PersistenceError::Query)
    }
}

impl AuditSink for SqliteAuditStore {
    fn append(&self, record: NewAuditRecord) -> Result<AuditRecord, PersistenceError> {
        let record = AuditRecord {
            id: record.id,
            document_id: record.document_id,
            original_hash: record.original_hash,
            signed_hash: record.signed_hash,
            signed_file_path: record.signed_file_path,
            requester_address: record.requester_address,
            created_at: Utc::now(),
        };

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO audit_trail (id, document_id, original_hash, signed_hash, signed_file_path, requester_address, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.id.to_string(),
                record.document_id,
                record.original_hash,
                record.signed_hash,
                record.signed_file_path,
                record.requester_address,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(PersistenceError::Query)?;

        info!(
            "audit record {} stored for document {}",
            record.id, record.document_id
        );
        Ok(record)
    }
}
