//! Error types for the store crate.

use thiserror::Error;

use crate::codec::CodecError;
use crate::validation::ValidationError;

/// Errors that can occur in the store crate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Fragment failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Schema creation failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Invalid data or state.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
