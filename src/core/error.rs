//! Error taxonomy shared by the note store, encoder, ranker and graph builder.

use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The embedding model could not be loaded. Semantic mode is unusable
    /// for the rest of the process; keyword search still works.
    #[error("semantic search unavailable ({0}); use keyword search instead")]
    ModelUnavailable(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("corrupt embedding for '{key}': {len} bytes, expected {expected}")]
    CorruptEmbedding {
        key: String,
        len: usize,
        expected: usize,
    },

    #[error("corrupt index metadata: {key} = '{value}'")]
    CorruptMetadata { key: String, value: String },

    #[error("note '{0}' not found")]
    KeyNotFound(String),

    #[error("invalid note key: {0}")]
    InvalidKey(String),

    #[error("graph build cancelled after {rows_done} of {rows_total} rows")]
    GraphCancelled { rows_done: usize, rows_total: usize },

    #[error("invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the caller should fall back to keyword search.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Error::ModelUnavailable(_))
    }
}
