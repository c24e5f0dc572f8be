//! Error types for DREAM

use thiserror::Error;

/// Main error type for the episodic memory system
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The summarizer collaborator failed
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// The embedder collaborator failed
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// An episode id was generated twice
    #[error("Episode already exists: {0}")]
    DuplicateEpisode(String),

    /// Episode not found
    #[error("Episode not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for MemoryError {
    fn from(err: bincode::Error) -> Self {
        MemoryError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MemoryError>;
