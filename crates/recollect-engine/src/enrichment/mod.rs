//! Asynchronous post-commit enrichment.
//!
//! Committed fragment ids flow through a bounded [`EnrichmentQueue`] to a pool
//! of worker tasks. Each worker takes one id at a time and runs concept
//! clustering, timeline integration and tag enhancement in that order, waiting
//! the post-commit delay before each. Task failures are logged and counted;
//! they never stop the worker or reach the write path.

mod tasks;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use recollect_store::{FragmentBackend, FragmentId};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EnrichmentOptions;
use crate::error::{EnrichmentTaskError, QueueFullError};
use crate::metrics::Metrics;

pub use tasks::run_task;

// ─────────────────────────────────────────────────────────────────────────────
// Task Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The enrichment tasks, in the order a worker runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ConceptClustering,
    TimelineIntegration,
    TagEnhancement,
}

impl TaskKind {
    /// Every task, in execution order.
    pub const ALL: [TaskKind; 3] = [
        TaskKind::ConceptClustering,
        TaskKind::TimelineIntegration,
        TaskKind::TagEnhancement,
    ];

    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConceptClustering => "concept_clustering",
            Self::TimelineIntegration => "timeline_integration",
            Self::TagEnhancement => "tag_enhancement",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// Sending half of the bounded enrichment queue.
#[derive(Debug, Clone)]
pub struct EnrichmentQueue {
    sender: mpsc::Sender<FragmentId>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl EnrichmentQueue {
    /// Create a queue and its receiving half.
    pub fn new(
        capacity: usize,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::Receiver<FragmentId>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                timeout,
                metrics,
            },
            receiver,
        )
    }

    /// Push an id, waiting up to the schedule timeout for a free slot.
    ///
    /// A zero timeout behaves like [`try_schedule`](Self::try_schedule).
    /// A closed queue is reported as full.
    pub async fn schedule(&self, id: FragmentId) -> Result<(), QueueFullError> {
        if self.timeout.is_zero() {
            return self.try_schedule(id);
        }

        match self.sender.send_timeout(id, self.timeout).await {
            Ok(()) => {
                self.metrics.record_scheduled(self.depth());
                Ok(())
            }
            Err(_) => Err(self.full(self.timeout)),
        }
    }

    /// Push an id without waiting.
    pub fn try_schedule(&self, id: FragmentId) -> Result<(), QueueFullError> {
        match self.sender.try_send(id) {
            Ok(()) => {
                self.metrics.record_scheduled(self.depth());
                Ok(())
            }
            Err(_) => Err(self.full(Duration::ZERO)),
        }
    }

    /// Ids currently waiting.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    fn full(&self, waited: Duration) -> QueueFullError {
        QueueFullError {
            capacity: self.capacity(),
            waited,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workers
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the running worker pool.
pub struct EnrichmentWorkers {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    // Held so the queue stays open even with zero workers.
    _receiver: Arc<AsyncMutex<mpsc::Receiver<FragmentId>>>,
}

impl EnrichmentWorkers {
    /// Spawn `options.workers` workers sharing one receiver.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        receiver: mpsc::Receiver<FragmentId>,
        backend: Arc<dyn FragmentBackend>,
        options: Arc<EnrichmentOptions>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let cancel = CancellationToken::new();

        let handles = (0..options.workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&backend),
                    Arc::clone(&options),
                    Arc::clone(&metrics),
                    cancel.clone(),
                ))
            })
            .collect();

        Self {
            handles,
            cancel,
            _receiver: receiver,
        }
    }

    /// Number of running workers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop pulling new ids, let in-flight jobs finish, and join every worker.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Enrichment worker panicked");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<AsyncMutex<mpsc::Receiver<FragmentId>>>,
    backend: Arc<dyn FragmentBackend>,
    options: Arc<EnrichmentOptions>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) {
    debug!(worker, "Enrichment worker started");

    loop {
        let id = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = async {
                let mut rx = receiver.lock().await;
                let id = rx.recv().await;
                metrics.set_queue_depth(rx.len());
                id
            } => match next {
                Some(id) => id,
                None => break,
            },
        };

        enrich_fragment(&id, &backend, &options, &metrics).await;
    }

    debug!(worker, "Enrichment worker stopped");
}

/// Run the three tasks for one fragment.
///
/// Failures are logged and counted per task; the remaining tasks still run.
pub async fn enrich_fragment(
    id: &FragmentId,
    backend: &Arc<dyn FragmentBackend>,
    options: &Arc<EnrichmentOptions>,
    metrics: &Metrics,
) {
    for kind in TaskKind::ALL {
        if !options.post_commit_delay.is_zero() {
            tokio::time::sleep(options.post_commit_delay).await;
        }

        let started = Instant::now();
        let result = {
            let backend = Arc::clone(backend);
            let options = Arc::clone(options);
            let task_id = id.clone();
            tokio::task::spawn_blocking(move || {
                run_task(kind, backend.as_ref(), &task_id, &options)
            })
            .await
            .unwrap_or_else(|e| {
                Err(EnrichmentTaskError::Aborted {
                    task: kind,
                    id: id.clone(),
                    reason: e.to_string(),
                })
            })
        };
        metrics.record_task(kind, started.elapsed(), result.is_err());

        match result {
            Ok(changed) => debug!(id = %id, task = %kind, changed, "Enrichment task finished"),
            Err(e) => warn!(id = %id, task = %e.task(), error = %e, "Enrichment task failed"),
        }
    }

    metrics.record_enrichment_completed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_store::{Fragment, FragmentStore};

    #[tokio::test]
    async fn test_schedule_zero_timeout_fails_fast_when_full() {
        let metrics = Arc::new(Metrics::new());
        let (queue, _rx) = EnrichmentQueue::new(2, Duration::ZERO, Arc::clone(&metrics));

        queue.schedule(FragmentId::from("a")).await.unwrap();
        queue.schedule(FragmentId::from("b")).await.unwrap();
        let err = queue.schedule(FragmentId::from("c")).await.unwrap_err();

        assert_eq!(err.capacity, 2);
        assert_eq!(err.waited, Duration::ZERO);
        assert_eq!(queue.depth(), 2);
        assert_eq!(metrics.snapshot().enrichment_scheduled, 2);
    }

    #[tokio::test]
    async fn test_schedule_waits_for_timeout() {
        let metrics = Arc::new(Metrics::new());
        let (queue, _rx) = EnrichmentQueue::new(1, Duration::from_millis(20), metrics);

        queue.schedule(FragmentId::from("a")).await.unwrap();
        let started = Instant::now();
        let err = queue.schedule(FragmentId::from("b")).await.unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(err.waited, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_schedule_succeeds_when_slot_frees() {
        let metrics = Arc::new(Metrics::new());
        let (queue, mut rx) = EnrichmentQueue::new(1, Duration::from_secs(2), metrics);
        queue.schedule(FragmentId::from("a")).await.unwrap();

        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            rx.recv().await
        });

        queue.schedule(FragmentId::from("b")).await.unwrap();
        assert_eq!(drain.await.unwrap(), Some(FragmentId::from("a")));
    }

    #[tokio::test]
    async fn test_workers_enrich_and_stop_on_cancel() {
        let store = FragmentStore::open_in_memory().unwrap();
        let fragment = Fragment::new("Replaced the bike chain", "maintenance");
        store.batch_commit(std::slice::from_ref(&fragment)).unwrap();
        let backend: Arc<dyn FragmentBackend> = Arc::new(store);

        let metrics = Arc::new(Metrics::new());
        let options = Arc::new(EnrichmentOptions::default().with_workers(2));
        let (queue, rx) = EnrichmentQueue::new(16, Duration::ZERO, Arc::clone(&metrics));
        let workers = EnrichmentWorkers::spawn(
            rx,
            Arc::clone(&backend),
            options,
            Arc::clone(&metrics),
        );
        assert_eq!(workers.len(), 2);

        queue.schedule(fragment.id.clone()).await.unwrap();
        for _ in 0..200 {
            if metrics.snapshot().enrichment_completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        workers.shutdown().await;

        let enriched = backend.get(&fragment.id).unwrap().unwrap();
        assert!(enriched.symbolic_tags.contains("cluster:maintenance"));
        assert!(enriched.symbolic_tags.contains("type:episodic"));
        assert_eq!(metrics.snapshot().enrichment_task_failures, 0);
    }

    #[tokio::test]
    async fn test_task_failure_does_not_stop_other_tasks() {
        let backend: Arc<dyn FragmentBackend> = Arc::new(FragmentStore::open_in_memory().unwrap());
        let metrics = Metrics::new();
        let options = Arc::new(EnrichmentOptions::default());

        enrich_fragment(&FragmentId::from("frag-0-missing"), &backend, &options, &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.enrichment_task_failures, 3);
        assert_eq!(snapshot.enrichment_completed, 1);
    }
}
