use thiserror::Error;

use crate::storage::{is_locked_error, StorageError};

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Collection is closed")]
    Closed,

    #[error("Unsupported scheduler version: {0}")]
    UnsupportedSchedulerVersion(i64),

    #[error("Note type not found: {0}")]
    ModelNotFound(i64),

    #[error("Note not found: {0}")]
    NoteNotFound(i64),

    #[error("Card not found: {0}")]
    CardNotFound(i64),

    #[error("Deck not found: {0}")]
    DeckNotFound(i64),

    #[error("This change requires a full sync; confirm before continuing")]
    ConfirmModSchema,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl CollectionError {
    /// True when the database file was busy or locked by another handle.
    pub fn is_locked(&self) -> bool {
        match self {
            CollectionError::Storage(e) => e.is_locked(),
            CollectionError::Sqlite(e) => is_locked_error(e),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CollectionError>;
