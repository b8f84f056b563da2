//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [store]        # database location and SQLite tuning
//! [buffer]       # write-ahead buffer policy
//! [enrichment]   # post-commit enrichment workers
//! [logging]      # log levels and files
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of fragments that triggers an immediate flush.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default maximum age of a buffered fragment before a timed flush.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

/// Default number of commit attempts before a batch is stranded.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default initial retry backoff.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

/// Default ceiling for the doubling retry backoff.
pub const DEFAULT_MAX_RETRY_BACKOFF_MS: u64 = 2_000;

/// Default number of failed batches held for retry.
pub const DEFAULT_RETRY_CAPACITY: usize = 16;

/// Safety cap on the enrichment queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default page cache size (64 MiB).
pub const DEFAULT_CACHE_SIZE_KIB: u32 = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecollectConfig {
    /// Durable store configuration.
    pub store: Option<StoreConfig>,

    /// Write-ahead buffer configuration.
    pub buffer: Option<BufferConfig>,

    /// Enrichment pipeline configuration.
    pub enrichment: Option<EnrichmentConfig>,

    /// Logging configuration.
    pub logging: Option<LoggingConfig>,
}

impl RecollectConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: RecollectConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }

        if other.buffer.is_some() {
            self.buffer = other.buffer;
        }

        if other.enrichment.is_some() {
            self.enrichment = other.enrichment;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Store section, or defaults when absent.
    pub fn store_or_default(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    /// Buffer section, or defaults when absent.
    pub fn buffer_or_default(&self) -> BufferConfig {
        self.buffer.clone().unwrap_or_default()
    }

    /// Enrichment section, or defaults when absent.
    pub fn enrichment_or_default(&self) -> EnrichmentConfig {
        self.enrichment.clone().unwrap_or_default()
    }

    /// Logging section, or defaults when absent.
    pub fn logging_or_default(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(buffer) = &self.buffer {
            if buffer.batch_size == 0 {
                return Err(invalid("buffer.batch_size", "must be >= 1"));
            }
            if buffer.flush_interval_ms == 0 {
                return Err(invalid("buffer.flush_interval_ms", "must be >= 1"));
            }
            if buffer.retry_capacity == 0 {
                return Err(invalid("buffer.retry_capacity", "must be >= 1"));
            }
        }

        if let Some(enrichment) = &self.enrichment {
            if enrichment.queue_capacity == 0 || enrichment.queue_capacity > DEFAULT_QUEUE_CAPACITY
            {
                return Err(invalid(
                    "enrichment.queue_capacity",
                    &format!("must be between 1 and {}", DEFAULT_QUEUE_CAPACITY),
                ));
            }
            if enrichment.max_links == 0 {
                return Err(invalid("enrichment.max_links", "must be >= 1"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Durable store configuration.
///
/// ```toml
/// [store]
/// database = "fragments.db"
/// cache_size_kib = 65536
/// busy_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    /// Relative paths are resolved from the data directory.
    pub database: Option<PathBuf>,
    /// SQLite page cache size in KiB.
    pub cache_size_kib: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Resolve the database path, falling back to the platform data directory.
    pub fn resolve_database(&self) -> PathBuf {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("recollect"))
            .unwrap_or_else(|| PathBuf::from("."));
        match &self.database {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => data_dir.join(path),
            None => data_dir.join("fragments.db"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Buffer Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Write-ahead buffer configuration.
///
/// ```toml
/// [buffer]
/// batch_size = 50
/// flush_interval_ms = 100
/// max_retry_attempts = 5
/// retry_backoff_ms = 50
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Pending fragment count that triggers an immediate flush.
    pub batch_size: usize,
    /// Maximum time a fragment waits in the buffer before a timed flush.
    pub flush_interval_ms: u64,
    /// How often the flusher checks the time trigger.
    /// Defaults to a quarter of the flush interval.
    pub flush_check_interval_ms: Option<u64>,
    /// Commit attempts before a batch is stranded.
    pub max_retry_attempts: u32,
    /// Initial retry backoff, doubled after each failure.
    pub retry_backoff_ms: u64,
    /// Upper bound for the retry backoff.
    pub max_retry_backoff_ms: u64,
    /// Number of failed batches held on the retry list.
    pub retry_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            flush_check_interval_ms: None,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_retry_backoff_ms: DEFAULT_MAX_RETRY_BACKOFF_MS,
            retry_capacity: DEFAULT_RETRY_CAPACITY,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Enrichment Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Enrichment pipeline configuration.
///
/// ```toml
/// [enrichment]
/// enabled = true
/// workers = 2
/// queue_capacity = 10000
/// schedule_timeout_ms = 50
/// post_commit_delay_ms = 1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Whether committed fragments are enriched at all.
    pub enabled: bool,
    /// Number of concurrent worker loops.
    pub workers: usize,
    /// Bounded queue capacity (capped at 10,000).
    pub queue_capacity: usize,
    /// How long scheduling waits on a full queue before giving up.
    pub schedule_timeout_ms: u64,
    /// Minimum delay before each task reads back a committed fragment.
    pub post_commit_delay_ms: u64,
    /// Maximum associative links per fragment.
    pub max_links: usize,
    /// Maximum symbolic tags per fragment.
    pub max_tags: usize,
    /// Same-category fragments linked by concept clustering.
    pub cluster_fanout: usize,
    /// Neighbouring fragments linked by timeline integration.
    pub timeline_fanout: usize,
    /// Half-width of the timeline neighbourhood, in seconds.
    pub timeline_window_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 2,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            schedule_timeout_ms: 50,
            post_commit_delay_ms: 1,
            max_links: 20,
            max_tags: 32,
            cluster_fanout: 5,
            timeline_fanout: 3,
            timeline_window_secs: 3_600,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
///
/// ```toml
/// [logging]
/// level = "info"
/// json_file = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console log level for recollect crates.
    pub level: String,
    /// Whether to write a rotating JSON log file.
    pub json_file: bool,
    /// Directory for log files. Defaults to `<config dir>/logs`.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_file: true,
            directory: None,
        }
    }
}
