//! Runtime configuration for the engine.
//!
//! The TOML sections in `recollect-config` are plain millisecond integers;
//! these types carry `Duration`s and are what the buffer and workers read.

use std::time::Duration;

use recollect_config::{BufferConfig, DEFAULT_QUEUE_CAPACITY, EnrichmentConfig, RecollectConfig};

use crate::error::{EngineError, Result};

/// Hard cap on the enrichment queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = DEFAULT_QUEUE_CAPACITY;

// ─────────────────────────────────────────────────────────────────────────────
// Buffer Options
// ─────────────────────────────────────────────────────────────────────────────

/// Write-ahead buffer settings.
#[derive(Debug, Clone)]
pub struct BufferOptions {
    /// Pending count that triggers an immediate flush.
    pub batch_size: usize,
    /// Longest a fragment waits in the buffer before a timed flush.
    pub flush_interval: Duration,
    /// How often the flusher evaluates the time trigger and due retries.
    pub flush_check_interval: Duration,
    /// Failed attempts before a batch is stranded.
    pub max_retry_attempts: u32,
    /// First retry delay, doubled after each failure.
    pub retry_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_retry_backoff: Duration,
    /// Batches that may wait for retry at once.
    pub retry_capacity: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self::from(&BufferConfig::default())
    }
}

impl From<&BufferConfig> for BufferOptions {
    fn from(config: &BufferConfig) -> Self {
        let flush_interval = Duration::from_millis(config.flush_interval_ms);
        let flush_check_interval = config
            .flush_check_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(flush_interval / 4);

        Self {
            batch_size: config.batch_size,
            flush_interval,
            flush_check_interval,
            max_retry_attempts: config.max_retry_attempts,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_retry_backoff: Duration::from_millis(config.max_retry_backoff_ms),
            retry_capacity: config.retry_capacity,
        }
    }
}

impl BufferOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the flush interval. The check interval follows at a quarter of it.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self.flush_check_interval = interval / 4;
        self
    }

    /// Set the flusher's check interval.
    pub fn with_flush_check_interval(mut self, interval: Duration) -> Self {
        self.flush_check_interval = interval;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration, max_backoff: Duration) -> Self {
        self.max_retry_attempts = max_attempts;
        self.retry_backoff = backoff;
        self.max_retry_backoff = max_backoff;
        self
    }

    /// Set the retry list capacity.
    pub fn with_retry_capacity(mut self, capacity: usize) -> Self {
        self.retry_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be >= 1".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(EngineError::Config("flush_interval must be > 0".into()));
        }
        if self.flush_check_interval.is_zero() {
            return Err(EngineError::Config("flush_check_interval must be > 0".into()));
        }
        if self.max_retry_attempts == 0 {
            return Err(EngineError::Config("max_retry_attempts must be >= 1".into()));
        }
        if self.retry_capacity == 0 {
            return Err(EngineError::Config("retry_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Enrichment Options
// ─────────────────────────────────────────────────────────────────────────────

/// Enrichment queue and worker settings.
#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    /// Whether committed fragments are scheduled for enrichment at all.
    pub enabled: bool,
    /// Concurrent worker tasks.
    pub workers: usize,
    /// Bounded queue capacity (at most [`MAX_QUEUE_CAPACITY`]).
    pub queue_capacity: usize,
    /// How long `schedule` waits for a free slot.
    pub schedule_timeout: Duration,
    /// Wait before each task so the commit is visible to its read.
    pub post_commit_delay: Duration,
    /// Cap on associative links per fragment.
    pub max_links: usize,
    /// Cap on symbolic tags per fragment.
    pub max_tags: usize,
    /// Same-category fragments linked by concept clustering.
    pub cluster_fanout: usize,
    /// Nearby fragments linked by timeline integration.
    pub timeline_fanout: usize,
    /// Half-width of the timeline neighbourhood.
    pub timeline_window: Duration,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self::from(&EnrichmentConfig::default())
    }
}

impl From<&EnrichmentConfig> for EnrichmentOptions {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            enabled: config.enabled,
            workers: config.workers,
            queue_capacity: config.queue_capacity.min(MAX_QUEUE_CAPACITY),
            schedule_timeout: Duration::from_millis(config.schedule_timeout_ms),
            post_commit_delay: Duration::from_millis(config.post_commit_delay_ms),
            max_links: config.max_links,
            max_tags: config.max_tags,
            cluster_fanout: config.cluster_fanout,
            timeline_fanout: config.timeline_fanout,
            timeline_window: Duration::from_secs(config.timeline_window_secs),
        }
    }
}

impl EnrichmentOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable enrichment entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the number of workers. Zero leaves scheduled ids queued.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity (clamped to [`MAX_QUEUE_CAPACITY`]).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.min(MAX_QUEUE_CAPACITY);
        self
    }

    /// Set how long `schedule` waits on a full queue.
    pub fn with_schedule_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_timeout = timeout;
        self
    }

    /// Set the post-commit delay.
    pub fn with_post_commit_delay(mut self, delay: Duration) -> Self {
        self.post_commit_delay = delay;
        self
    }

    /// Set the link and tag caps.
    pub fn with_caps(mut self, max_links: usize, max_tags: usize) -> Self {
        self.max_links = max_links;
        self.max_tags = max_tags;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(EngineError::Config("queue_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine Config
// ─────────────────────────────────────────────────────────────────────────────

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub buffer: BufferOptions,
    pub enrichment: EnrichmentOptions,
}

impl From<&RecollectConfig> for EngineConfig {
    fn from(config: &RecollectConfig) -> Self {
        Self {
            buffer: BufferOptions::from(&config.buffer_or_default()),
            enrichment: EnrichmentOptions::from(&config.enrichment_or_default()),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffer options.
    pub fn with_buffer(mut self, buffer: BufferOptions) -> Self {
        self.buffer = buffer;
        self
    }

    /// Replace the enrichment options.
    pub fn with_enrichment(mut self, enrichment: EnrichmentOptions) -> Self {
        self.enrichment = enrichment;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        self.enrichment.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_config::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS};

    #[test]
    fn test_defaults_match_config_crate() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(
            config.buffer.flush_interval,
            Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS)
        );
        assert_eq!(config.buffer.flush_check_interval, Duration::from_millis(25));
        assert_eq!(config.enrichment.queue_capacity, MAX_QUEUE_CAPACITY);
        assert_eq!(config.enrichment.post_commit_delay, Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_recollect_config() {
        let toml = r#"
[buffer]
batch_size = 10
flush_interval_ms = 40
flush_check_interval_ms = 5

[enrichment]
workers = 4
queue_capacity = 200
"#;
        let config = RecollectConfig::from_toml(toml).unwrap();
        let engine = EngineConfig::from(&config);

        assert_eq!(engine.buffer.batch_size, 10);
        assert_eq!(engine.buffer.flush_interval, Duration::from_millis(40));
        assert_eq!(engine.buffer.flush_check_interval, Duration::from_millis(5));
        assert_eq!(engine.enrichment.workers, 4);
        assert_eq!(engine.enrichment.queue_capacity, 200);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_buffer(
                BufferOptions::new()
                    .with_batch_size(5)
                    .with_flush_interval(Duration::from_millis(80)),
            )
            .with_enrichment(EnrichmentOptions::new().with_queue_capacity(50_000));

        assert_eq!(config.buffer.flush_check_interval, Duration::from_millis(20));
        assert_eq!(config.enrichment.queue_capacity, MAX_QUEUE_CAPACITY);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = EngineConfig::new().with_buffer(BufferOptions::new().with_batch_size(0));
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }
}
