//! Durable metadata index backing the object store.
//!
//! A single SQLite database holds the `artifacts` table and the append-only
//! `deletions` log. Writes serialize on the connection mutex; every mutating
//! operation is a single statement and therefore a single transaction.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct ArtifactRow {
    pub job_id: Uuid,
    pub content_hash: String,
    pub ciphertext_path: String,
    pub algorithm_tag: String,
    pub key_fingerprint: String,
    pub original_size: u64,
    pub stored_size: u64,
    pub created_at_ms: i64,
}

impl ArtifactRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let job_id: String = row.get("job_id")?;
        Ok(Self {
            job_id: job_id.parse().map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    "job_id".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            content_hash: row.get("content_hash")?,
            ciphertext_path: row.get("ciphertext_path")?,
            algorithm_tag: row.get("algorithm_tag")?,
            key_fingerprint: row.get("key_fingerprint")?,
            original_size: row.get::<_, i64>("original_size")? as u64,
            stored_size: row.get::<_, i64>("stored_size")? as u64,
            created_at_ms: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeletionRow {
    pub job_id: Uuid,
    pub content_hash: String,
    pub deletion_ts_ms: i64,
    pub proof_digest: String,
}

impl DeletionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let job_id: String = row.get("job_id")?;
        Ok(Self {
            job_id: job_id.parse().map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    "job_id".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            content_hash: row.get("content_hash")?,
            deletion_ts_ms: row.get("deletion_ts")?,
            proof_digest: row.get("proof_digest")?,
        })
    }
}

pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS artifacts (
                 job_id          TEXT PRIMARY KEY,
                 content_hash    TEXT NOT NULL,
                 ciphertext_path TEXT NOT NULL,
                 algorithm_tag   TEXT NOT NULL,
                 key_fingerprint TEXT NOT NULL,
                 original_size   INTEGER NOT NULL,
                 stored_size     INTEGER NOT NULL,
                 created_at      INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_artifacts_hash ON artifacts(content_hash);
             CREATE TABLE IF NOT EXISTS deletions (
                 job_id       TEXT PRIMARY KEY,
                 content_hash TEXT NOT NULL,
                 deletion_ts  INTEGER NOT NULL,
                 proof_digest TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE artifacts (
                 job_id          TEXT PRIMARY KEY,
                 content_hash    TEXT NOT NULL,
                 ciphertext_path TEXT NOT NULL,
                 algorithm_tag   TEXT NOT NULL,
                 key_fingerprint TEXT NOT NULL,
                 original_size   INTEGER NOT NULL,
                 stored_size     INTEGER NOT NULL,
                 created_at      INTEGER NOT NULL
             );
             CREATE TABLE deletions (
                 job_id       TEXT PRIMARY KEY,
                 content_hash TEXT NOT NULL,
                 deletion_ts  INTEGER NOT NULL,
                 proof_digest TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn).map_err(StoreError::from)
    }

    pub fn insert_artifact(&self, row: &ArtifactRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO artifacts
                 (job_id, content_hash, ciphertext_path, algorithm_tag, key_fingerprint,
                  original_size, stored_size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.job_id.to_string(),
                    row.content_hash,
                    row.ciphertext_path,
                    row.algorithm_tag,
                    row.key_fingerprint,
                    row.original_size as i64,
                    row.stored_size as i64,
                    row.created_at_ms,
                ],
            )?;
            Ok(())
        })
    }

    pub fn artifact_by_hash(&self, content_hash: &str) -> Result<Option<ArtifactRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM artifacts WHERE content_hash = ?1 LIMIT 1",
                params![content_hash],
                ArtifactRow::from_row,
            )
            .optional()
        })
    }

    pub fn artifact_by_job(&self, job_id: Uuid) -> Result<Option<ArtifactRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM artifacts WHERE job_id = ?1",
                params![job_id.to_string()],
                ArtifactRow::from_row,
            )
            .optional()
        })
    }

    /// Returns the number of rows removed (0 or 1; the call is idempotent).
    pub fn remove_artifact(&self, job_id: Uuid) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM artifacts WHERE job_id = ?1",
                params![job_id.to_string()],
            )
        })
    }

    /// True when some other job still references the same content.
    pub fn hash_still_referenced(&self, content_hash: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM artifacts WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn insert_deletion(&self, row: &DeletionRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO deletions (job_id, content_hash, deletion_ts, proof_digest)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.job_id.to_string(),
                    row.content_hash,
                    row.deletion_ts_ms,
                    row.proof_digest,
                ],
            )?;
            Ok(())
        })
    }

    pub fn deletion_by_job(&self, job_id: Uuid) -> Result<Option<DeletionRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM deletions WHERE job_id = ?1",
                params![job_id.to_string()],
                DeletionRow::from_row,
            )
            .optional()
        })
    }
}
