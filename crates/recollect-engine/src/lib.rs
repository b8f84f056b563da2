//! Write-ahead buffered fragment engine for Recollect.
//!
//! Absorbs high-frequency "remember" calls without a synchronous commit per
//! call. Writes are acknowledged as soon as they are buffered, committed to
//! the SQLite store in batches, and then enriched asynchronously.
//!
//! - **Write-ahead buffer**: validated fragments accumulate in memory and are
//!   sealed into a batch on a size or time trigger
//! - **Flusher**: a tokio task commits sealed batches in one transaction each,
//!   retrying failures with exponential backoff
//! - **Enrichment**: workers link and tag each committed fragment
//! - **Metrics**: counters, gauges and rolling latency windows
//!
//! # Example
//!
//! ```no_run
//! use recollect_engine::{EngineConfig, FragmentEngine};
//! use recollect_store::{FragmentInput, StoreOptions};
//!
//! # async fn run() -> recollect_engine::Result<()> {
//! let engine = FragmentEngine::open("fragments.db", &StoreOptions::default(), EngineConfig::default())?;
//!
//! let id = engine.store(FragmentInput::new("Fed the cat", "home"))?;
//! engine.force_flush_all().await?;
//! assert!(engine.get_fragment(&id)?.is_some());
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod engine;
pub mod enrichment;
mod error;
pub mod metrics;
pub mod retry;

pub use buffer::{FlushReport, HealthStatus, WriteAheadBuffer};
pub use config::{BufferOptions, EngineConfig, EnrichmentOptions, MAX_QUEUE_CAPACITY};
pub use engine::FragmentEngine;
pub use enrichment::{EnrichmentQueue, EnrichmentWorkers, TaskKind};
pub use error::{EngineError, EnrichmentTaskError, QueueFullError, Result};
pub use metrics::{Metrics, MetricsSnapshot};
