//! Engine facade.
//!
//! [`FragmentEngine`] wires the durable store, the write-ahead buffer, its
//! flusher task and the enrichment workers together, and is the only type the
//! business layer needs. It is a cheap clonable handle; construct it once and
//! pass it around.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use recollect_store::{
    Fragment, FragmentBackend, FragmentId, FragmentInput, FragmentStore, StoreOptions,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buffer::{FlushReport, HealthStatus, WriteAheadBuffer};
use crate::config::EngineConfig;
use crate::enrichment::{EnrichmentQueue, EnrichmentWorkers};
use crate::error::{EngineError, Result};
use crate::metrics::{Metrics, MetricsSnapshot};

/// Background tasks owned by a running engine.
struct Background {
    flusher: JoinHandle<()>,
    workers: Option<EnrichmentWorkers>,
}

struct EngineInner {
    config: EngineConfig,
    backend: Arc<dyn FragmentBackend>,
    buffer: Arc<WriteAheadBuffer>,
    metrics: Arc<Metrics>,
    enrichment: Option<EnrichmentQueue>,
    flusher_cancel: CancellationToken,
    background: Mutex<Option<Background>>,
    shut_down: AtomicBool,
}

/// Write-ahead buffered fragment store with asynchronous enrichment.
#[derive(Clone)]
pub struct FragmentEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for FragmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentEngine")
            .field("config", &self.inner.config)
            .field("shut_down", &self.inner.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction
// ─────────────────────────────────────────────────────────────────────────────

impl FragmentEngine {
    /// Open (or create) a SQLite store at `path` and start the engine on it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>, store: &StoreOptions, config: EngineConfig) -> Result<Self> {
        let store = FragmentStore::open_with_options(path, store)?;
        Self::start(config, Arc::new(store))
    }

    /// Start the engine on an in-memory store.
    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        Self::start(config, Arc::new(FragmentStore::open_in_memory()?))
    }

    /// Start the engine on any backend: spawns the flusher and, when
    /// enrichment is enabled, the worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: EngineConfig, backend: Arc<dyn FragmentBackend>) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|e| EngineError::Runtime(e.to_string()))?;

        let metrics = Arc::new(Metrics::new());

        let (enrichment, workers) = if config.enrichment.enabled {
            let (queue, receiver) = EnrichmentQueue::new(
                config.enrichment.queue_capacity,
                config.enrichment.schedule_timeout,
                Arc::clone(&metrics),
            );
            let workers = EnrichmentWorkers::spawn(
                receiver,
                Arc::clone(&backend),
                Arc::new(config.enrichment.clone()),
                Arc::clone(&metrics),
            );
            (Some(queue), Some(workers))
        } else {
            (None, None)
        };

        let buffer = Arc::new(WriteAheadBuffer::new(
            config.buffer.clone(),
            Arc::clone(&backend),
            Arc::clone(&metrics),
            enrichment.clone(),
        ));

        let flusher_cancel = CancellationToken::new();
        let flusher = tokio::spawn(Arc::clone(&buffer).run_flusher(flusher_cancel.clone()));

        info!(
            batch_size = config.buffer.batch_size,
            flush_interval_ms = config.buffer.flush_interval.as_millis() as u64,
            enrichment = config.enrichment.enabled,
            workers = workers.as_ref().map(EnrichmentWorkers::len).unwrap_or(0),
            "Fragment engine started"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                backend,
                buffer,
                metrics,
                enrichment,
                flusher_cancel,
                background: Mutex::new(Some(Background { flusher, workers })),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// The configuration the engine was started with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Write Path
// ─────────────────────────────────────────────────────────────────────────────

impl FragmentEngine {
    /// Buffer a new fragment and return its id.
    ///
    /// The fragment is durable within one flush interval; call
    /// [`force_flush_all`](Self::force_flush_all) when it must be durable now.
    pub fn store(&self, input: FragmentInput) -> Result<FragmentId> {
        self.ensure_running()?;
        Ok(self.inner.buffer.enqueue(input.into_fragment())?)
    }

    /// Buffer many fragments with one lock acquisition. All inputs are
    /// validated first; if any is invalid, none is buffered.
    pub fn store_batch(&self, inputs: Vec<FragmentInput>) -> Result<Vec<FragmentId>> {
        self.ensure_running()?;
        let fragments = inputs.into_iter().map(FragmentInput::into_fragment).collect();
        Ok(self.inner.buffer.enqueue_many(fragments)?)
    }

    /// Commit everything buffered, including retrying and stranded batches.
    pub async fn force_flush_all(&self) -> Result<FlushReport> {
        self.inner.buffer.force_flush().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read Path & Observability
// ─────────────────────────────────────────────────────────────────────────────

impl FragmentEngine {
    /// Read a committed fragment. Buffered fragments are not visible.
    pub fn get_fragment(&self, id: &FragmentId) -> Result<Option<Fragment>> {
        Ok(self.inner.backend.get(id)?)
    }

    /// Number of committed fragments.
    pub fn count(&self) -> Result<usize> {
        Ok(self.inner.backend.count()?)
    }

    /// Snapshot of every metric.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        if let Some(queue) = &self.inner.enrichment {
            self.inner.metrics.set_queue_depth(queue.depth());
        }
        self.inner.metrics.snapshot()
    }

    /// Durability health.
    pub fn health(&self) -> HealthStatus {
        self.inner.buffer.health()
    }

    /// The enrichment queue, when enrichment is enabled.
    pub fn enrichment_queue(&self) -> Option<&EnrichmentQueue> {
        self.inner.enrichment.as_ref()
    }

    /// Wait until every scheduled enrichment has run, or `timeout` passes.
    ///
    /// Only committed fragments are considered, so flush first. Returns
    /// `false` on timeout.
    pub async fn wait_for_enrichment(&self, timeout: Duration) -> bool {
        let Some(queue) = &self.inner.enrichment else {
            return true;
        };
        let deadline = Instant::now() + timeout;

        self.inner.buffer.wait_for_notifications().await;
        loop {
            let snapshot = self.inner.metrics.snapshot();
            if queue.depth() == 0 && snapshot.enrichment_completed >= snapshot.enrichment_scheduled {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

impl FragmentEngine {
    /// Stop the engine.
    ///
    /// Stops the flusher, force-flushes everything buffered, waits for
    /// in-flight enrichment scheduling, then stops the workers (a job in
    /// progress completes). New writes are rejected from the start.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(FlushReport::default());
        }

        self.inner.flusher_cancel.cancel();
        let background = self.inner.background.lock().take();
        let workers = match background {
            Some(Background { flusher, workers }) => {
                if let Err(e) = flusher.await {
                    warn!(error = %e, "Flusher task panicked");
                }
                workers
            }
            None => None,
        };

        let flushed = self.inner.buffer.force_flush().await;
        self.inner.buffer.wait_for_notifications().await;

        if let Some(workers) = workers {
            let remaining = self
                .inner
                .enrichment
                .as_ref()
                .map(EnrichmentQueue::depth)
                .unwrap_or(0);
            if remaining > 0 {
                warn!(remaining, "Stopping enrichment with ids still queued");
            }
            workers.shutdown().await;
        }

        match &flushed {
            Ok(report) => info!(
                batches = report.batches,
                committed = report.committed,
                "Fragment engine stopped"
            ),
            Err(e) => warn!(error = %e, "Fragment engine stopped with uncommitted batches"),
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferOptions, EnrichmentOptions};

    #[test]
    fn test_start_requires_runtime() {
        let err = FragmentEngine::open_in_memory(EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = EngineConfig::new().with_buffer(BufferOptions::new().with_batch_size(0));
        let err = FragmentEngine::open_in_memory(config).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_store_flush_and_read() {
        let engine = FragmentEngine::open_in_memory(
            EngineConfig::new().with_enrichment(EnrichmentOptions::disabled()),
        )
        .unwrap();

        let id = engine
            .store(FragmentInput::new("Booked flights", "travel").with_tag("trip"))
            .unwrap();
        assert!(engine.get_fragment(&id).unwrap().is_none());

        engine.force_flush_all().await.unwrap();
        let fragment = engine.get_fragment(&id).unwrap().unwrap();
        assert_eq!(fragment.content.body, "Booked flights");
        assert!(fragment.symbolic_tags.contains("trip"));

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_after_shutdown_is_rejected() {
        let engine = FragmentEngine::open_in_memory(EngineConfig::default()).unwrap();
        engine.shutdown().await.unwrap();

        assert!(matches!(
            engine.store(FragmentInput::new("late", "t")),
            Err(EngineError::ShutDown)
        ));
        // Second shutdown is a no-op.
        assert_eq!(engine.shutdown().await.unwrap(), FlushReport::default());
    }

    #[tokio::test]
    async fn test_wait_for_enrichment() {
        let engine = FragmentEngine::open_in_memory(EngineConfig::default()).unwrap();
        let id = engine
            .store(FragmentInput::new("Watered the ferns", "garden"))
            .unwrap();
        engine.force_flush_all().await.unwrap();

        assert!(engine.wait_for_enrichment(Duration::from_secs(5)).await);
        let fragment = engine.get_fragment(&id).unwrap().unwrap();
        assert!(fragment.symbolic_tags.contains("cluster:garden"));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_enrichment_times_out_without_workers() {
        let engine = FragmentEngine::open_in_memory(
            EngineConfig::new().with_enrichment(EnrichmentOptions::default().with_workers(0)),
        )
        .unwrap();
        engine.store(FragmentInput::new("idle", "t")).unwrap();
        engine.force_flush_all().await.unwrap();

        assert!(!engine.wait_for_enrichment(Duration::from_millis(30)).await);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffer() {
        let engine = FragmentEngine::open_in_memory(EngineConfig::default()).unwrap();
        engine
            .store_batch(vec![
                FragmentInput::new("one", "t"),
                FragmentInput::new("two", "t"),
            ])
            .unwrap();

        let report = engine.shutdown().await.unwrap();
        assert_eq!(report.committed, 2);
        assert_eq!(engine.count().unwrap(), 2);
    }
}
