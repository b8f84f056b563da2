//! Engine error types.

use std::time::Duration;

use recollect_store::{FragmentId, StoreError, ValidationError};
use thiserror::Error;

use crate::enrichment::TaskKind;

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected before buffering.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// One or more batches could not be committed during a forced flush.
    /// The batches stay buffered for retry.
    #[error("Commit failed for {failed_batches} batch(es), {failed_fragments} fragments retained: {last_error}")]
    Commit {
        failed_batches: usize,
        failed_fragments: usize,
        last_error: String,
    },

    /// Enrichment queue is full.
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),

    /// Store read or open failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine was started outside a tokio runtime.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The engine has been shut down.
    #[error("Engine is shut down")]
    ShutDown,

    /// Internal error (e.g., a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The enrichment queue stayed full for the whole schedule timeout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("enrichment queue full (capacity {capacity}, waited {waited:?})")]
pub struct QueueFullError {
    /// Queue capacity.
    pub capacity: usize,
    /// How long the caller waited for a free slot.
    pub waited: Duration,
}

/// A single enrichment task failed. Logged and counted, never propagated.
#[derive(Debug, Error)]
pub enum EnrichmentTaskError {
    /// The fragment was not found when the task read it back.
    #[error("{task} for {id}: fragment not found")]
    NotFound { task: TaskKind, id: FragmentId },

    /// A store read or update failed.
    #[error("{task} for {id}: {source}")]
    Store {
        task: TaskKind,
        id: FragmentId,
        #[source]
        source: StoreError,
    },

    /// The blocking task running the enrichment panicked or was cancelled.
    #[error("{task} for {id}: {reason}")]
    Aborted {
        task: TaskKind,
        id: FragmentId,
        reason: String,
    },
}

impl EnrichmentTaskError {
    /// Which task failed.
    pub fn task(&self) -> TaskKind {
        match self {
            Self::NotFound { task, .. } | Self::Store { task, .. } | Self::Aborted { task, .. } => {
                *task
            }
        }
    }
}
