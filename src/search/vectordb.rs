//! Note and vector storage in SQLite
//!
//! Notes live in `notes`; each note has at most one embedding in
//! `note_embeddings`, stored as a little-endian f32 BLOB of exactly `dim * 4`
//! bytes. Similarity is computed in Rust, not in SQL.
//!
//! The store's dimension is recorded in `index_meta` when the database is
//! created; opening it with another dimension fails.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use crate::core::error::{Error, Result};
use crate::core::note::{Note, NoteSummary};

const META_DIMENSIONS: &str = "dimensions";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed note table plus one vector per note key
pub struct VectorDB {
    conn: Connection,
    dim: usize,
}

impl VectorDB {
    /// Open or create database at path
    pub fn open(db_path: &Path, dim: usize) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init(conn, dim)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory(dim: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, dim)
    }

    fn init(conn: Connection, dim: usize) -> Result<Self> {
        let db = Self { conn, dim };
        db.init_schema()?;
        db.check_dimensions()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        // journal_mode answers with a row, so it cannot go through execute_batch
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "opened note database");
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',  -- JSON array
                created_at INTEGER NOT NULL,      -- unix millis
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS note_embeddings (
                key TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                FOREIGN KEY (key) REFERENCES notes(key) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at);
            "#,
        )?;

        Ok(())
    }

    fn check_dimensions(&self) -> Result<()> {
        match self.get_meta(META_DIMENSIONS)? {
            Some(stored) => {
                let stored: usize = stored.parse().map_err(|_| Error::CorruptMetadata {
                    key: META_DIMENSIONS.to_string(),
                    value: stored.clone(),
                })?;
                if stored != self.dim {
                    return Err(Error::DimensionMismatch {
                        expected: stored,
                        got: self.dim,
                    });
                }
            }
            None => self.set_meta(META_DIMENSIONS, &self.dim.to_string())?,
        }
        Ok(())
    }

    /// Vector dimension, fixed for the lifetime of the database.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// `BEGIN IMMEDIATE`: the write lock is taken before the first read.
    fn write_transaction(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn validate(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        Ok(())
    }

    // ----- notes -----

    /// Insert or update a note and, in the same transaction, its embedding.
    ///
    /// `None` removes any previous embedding, since it no longer matches the
    /// body. The vector is validated before anything is written.
    pub fn write_note(
        &self,
        key: &str,
        body: &str,
        tags: &[String],
        embedding: Option<&[f32]>,
    ) -> Result<Note> {
        if let Some(vector) = embedding {
            self.validate(vector)?;
        }

        let tags_json = serde_json::to_string(tags)?;
        let now = Utc::now().timestamp_millis();

        let tx = self.write_transaction()?;
        tx.execute(
            r#"
            INSERT INTO notes (key, body, tags, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                tags = excluded.tags,
                updated_at = excluded.updated_at
            "#,
            params![key, body, tags_json, now],
        )?;

        match embedding {
            Some(vector) => {
                tx.execute(
                    r#"
                    INSERT INTO note_embeddings (key, embedding)
                    VALUES (?1, ?2)
                    ON CONFLICT(key) DO UPDATE SET embedding = excluded.embedding
                    "#,
                    params![key, embedding_to_blob(vector)],
                )?;
            }
            None => {
                tx.execute("DELETE FROM note_embeddings WHERE key = ?1", params![key])?;
            }
        }
        tx.commit()?;

        debug!(key, embedded = embedding.is_some(), "wrote note");
        self.get_note(key)?
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Replace only the tags of an existing note.
    pub fn set_tags(&self, key: &str, tags: &[String]) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE notes SET tags = ?2, updated_at = ?3 WHERE key = ?1",
            params![key, serde_json::to_string(tags)?, Utc::now().timestamp_millis()],
        )?;
        if updated == 0 {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    pub fn get_note(&self, key: &str) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                "SELECT key, body, tags, created_at, updated_at FROM notes WHERE key = ?1",
                params![key],
                note_from_row,
            )
            .optional()?;
        Ok(note)
    }

    /// All notes, most recently updated first.
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, body, tags, created_at, updated_at FROM notes ORDER BY updated_at DESC, key",
        )?;
        let notes = stmt
            .query_map([], note_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    /// Note summaries ordered by key, optionally limited to one exact tag.
    pub fn list_summaries(&self, tag: Option<&str>) -> Result<Vec<NoteSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, body, tags, created_at, updated_at FROM notes ORDER BY key")?;
        let notes = stmt
            .query_map([], note_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(notes
            .into_iter()
            .filter(|n| tag.map_or(true, |t| n.has_tag(t)))
            .map(|n| n.summary())
            .collect())
    }

    /// Delete a note; its embedding goes with it. Returns whether it existed.
    pub fn delete_note(&self, key: &str) -> Result<bool> {
        let tx = self.write_transaction()?;
        tx.execute("DELETE FROM note_embeddings WHERE key = ?1", params![key])?;
        let deleted = tx.execute("DELETE FROM notes WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Notes without a usable embedding: none stored, or a BLOB of the wrong size.
    pub fn notes_needing_embedding(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT n.key, n.body, n.tags, n.created_at, n.updated_at
            FROM notes n
            LEFT JOIN note_embeddings e ON n.key = e.key
            WHERE e.key IS NULL OR length(e.embedding) != ?1
            ORDER BY n.key
            "#,
        )?;
        let notes = stmt
            .query_map(params![(self.dim * 4) as i64], note_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    // ----- vectors -----

    /// Upsert the vector for `key`. The note must exist.
    ///
    /// On a dimension mismatch nothing is written.
    pub fn put(&self, key: &str, vector: &[f32]) -> Result<()> {
        self.validate(vector)?;

        let tx = self.write_transaction()?;
        let exists = tx
            .query_row("SELECT 1 FROM notes WHERE key = ?1", params![key], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(Error::KeyNotFound(key.to_string()));
        }

        tx.execute(
            r#"
            INSERT INTO note_embeddings (key, embedding)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET embedding = excluded.embedding
            "#,
            params![key, embedding_to_blob(vector)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Vector for `key`, or `None` if the note was never embedded.
    pub fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM note_embeddings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        blob.map(|b| self.decode(key, &b)).transpose()
    }

    /// Every stored `(key, vector)` pair, in no particular order.
    ///
    /// Corrupt BLOBs are logged and skipped.
    pub fn all(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, embedding FROM note_embeddings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (key, blob) = row?;
            match self.decode(&key, &blob) {
                Ok(vector) => result.push((key, vector)),
                Err(e) => warn!(error = %e, "skipping embedding"),
            }
        }
        Ok(result)
    }

    /// Remove the vector for `key`. Absent keys are not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM note_embeddings WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn decode(&self, key: &str, blob: &[u8]) -> Result<Vec<f32>> {
        if blob.len() != self.dim * 4 {
            return Err(Error::CorruptEmbedding {
                key: key.to_string(),
                len: blob.len(),
                expected: self.dim * 4,
            });
        }
        Ok(blob_to_embedding(blob))
    }

    // ----- stats and metadata -----

    pub fn get_stats(&self) -> Result<IndexStats> {
        let note_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;

        let embedding_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM note_embeddings", [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(
            "SELECT key FROM note_embeddings WHERE length(embedding) != ?1 ORDER BY key",
        )?;
        let corrupt_keys = stmt
            .query_map(params![(self.dim * 4) as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let last_updated: Option<i64> = self
            .conn
            .query_row("SELECT MAX(updated_at) FROM notes", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(IndexStats {
            dimensions: self.dim,
            note_count: note_count as usize,
            embedding_count: embedding_count as usize,
            missing_count: (note_count - embedding_count).max(0) as usize,
            corrupt_keys,
            last_updated: last_updated.and_then(DateTime::from_timestamp_millis),
        })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn put_raw_blob(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO note_embeddings (key, embedding) VALUES (?1, ?2)",
            params![key, blob],
        )?;
        Ok(())
    }
}

/// Index statistics
#[derive(Debug, serde::Serialize)]
pub struct IndexStats {
    pub dimensions: usize,
    pub note_count: usize,
    pub embedding_count: usize,
    pub missing_count: usize,
    pub corrupt_keys: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let tags_json: String = row.get(2)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let created_at: i64 = row.get(3)?;
    let updated_at: i64 = row.get(4)?;

    Ok(Note {
        key: row.get(0)?,
        body: row.get(1)?,
        tags,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
    })
}

/// Convert f32 embedding to BLOB
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding. Length is checked by the caller.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
