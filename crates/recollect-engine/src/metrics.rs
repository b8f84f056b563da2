//! Engine metrics.
//!
//! All counters, gauges and latency windows live behind one mutex so
//! [`Metrics::snapshot`] is a single cheap, consistent copy. Components only
//! record; nothing here touches fragment data.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::enrichment::TaskKind;

/// Samples kept per latency window.
pub const WINDOW_SIZE: usize = 256;

/// Fixed-size window of the most recent latency samples.
#[derive(Debug, Clone, Default)]
struct RollingWindow {
    samples: VecDeque<Duration>,
}

impl RollingWindow {
    fn push(&mut self, sample: Duration) {
        if self.samples.len() == WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        total.as_secs_f64() * 1_000.0 / self.samples.len() as f64
    }

    fn last_ms(&self) -> f64 {
        self.samples
            .back()
            .map(|d| d.as_secs_f64() * 1_000.0)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    enqueue_calls: u64,
    validation_rejections: u64,
    batches_flushed: u64,
    fragments_committed: u64,
    commit_failures: u64,
    retries: u64,
    stranded_batches: u64,
    enrichment_scheduled: u64,
    enrichment_completed: u64,
    dropped_enrichments: u64,
    enrichment_task_failures: u64,
    pending_size: usize,
    queue_depth: usize,
    retry_len: usize,
    flush_latency: RollingWindow,
    clustering_latency: RollingWindow,
    timeline_latency: RollingWindow,
    tagging_latency: RollingWindow,
}

impl MetricsState {
    fn task_window(&mut self, kind: TaskKind) -> &mut RollingWindow {
        match kind {
            TaskKind::ConceptClustering => &mut self.clustering_latency,
            TaskKind::TimelineIntegration => &mut self.timeline_latency,
            TaskKind::TagEnhancement => &mut self.tagging_latency,
        }
    }
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Fragments offered to `enqueue` (accepted or rejected).
    pub enqueue_calls: u64,
    /// Fragments rejected by validation.
    pub validation_rejections: u64,
    /// Batches committed successfully.
    pub batches_flushed: u64,
    /// Fragments written by successful commits.
    pub fragments_committed: u64,
    /// Failed commit attempts.
    pub commit_failures: u64,
    /// Commit attempts that were retries.
    pub retries: u64,
    /// Batches that exhausted their retries or overflowed the retry list.
    pub stranded_batches: u64,
    /// Ids accepted by the enrichment queue.
    pub enrichment_scheduled: u64,
    /// Ids fully processed by a worker.
    pub enrichment_completed: u64,
    /// Ids dropped because the enrichment queue was full.
    pub dropped_enrichments: u64,
    /// Individual enrichment task failures.
    pub enrichment_task_failures: u64,
    /// Fragments currently buffered (not yet handed to a commit).
    pub pending_size: usize,
    /// Ids waiting in the enrichment queue.
    pub queue_depth: usize,
    /// Batches waiting for retry or stranded.
    pub retry_len: usize,
    /// Average commit latency over the window.
    pub avg_flush_latency_ms: f64,
    /// Latency of the most recent commit.
    pub last_flush_latency_ms: f64,
    /// Average concept-clustering latency.
    pub avg_clustering_ms: f64,
    /// Average timeline-integration latency.
    pub avg_timeline_ms: f64,
    /// Average tag-enhancement latency.
    pub avg_tagging_ms: f64,
}

/// Shared metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    state: Mutex<MetricsState>,
}

impl Metrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted enqueue of `count` fragments.
    pub fn record_enqueue(&self, count: usize, pending_size: usize) {
        let mut state = self.state.lock();
        state.enqueue_calls += count as u64;
        state.pending_size = pending_size;
    }

    /// Record fragments rejected by validation.
    pub fn record_rejection(&self, count: usize) {
        let mut state = self.state.lock();
        state.enqueue_calls += count as u64;
        state.validation_rejections += 1;
    }

    /// Update the pending buffer gauge.
    pub fn set_pending_size(&self, pending_size: usize) {
        self.state.lock().pending_size = pending_size;
    }

    /// Record a successful commit.
    pub fn record_flush(&self, latency: Duration, fragments: usize, retry: bool) {
        let mut state = self.state.lock();
        state.batches_flushed += 1;
        state.fragments_committed += fragments as u64;
        if retry {
            state.retries += 1;
        }
        state.flush_latency.push(latency);
    }

    /// Record a failed commit attempt.
    pub fn record_commit_failure(&self, retry: bool) {
        let mut state = self.state.lock();
        state.commit_failures += 1;
        if retry {
            state.retries += 1;
        }
    }

    /// Record a batch moving to the stranded list.
    pub fn record_stranded(&self) {
        self.state.lock().stranded_batches += 1;
    }

    /// Update the retry list gauge.
    pub fn set_retry_len(&self, len: usize) {
        self.state.lock().retry_len = len;
    }

    /// Record an id accepted by the enrichment queue.
    pub fn record_scheduled(&self, queue_depth: usize) {
        let mut state = self.state.lock();
        state.enrichment_scheduled += 1;
        state.queue_depth = queue_depth;
    }

    /// Record an id dropped on a full queue.
    pub fn record_dropped(&self) {
        self.state.lock().dropped_enrichments += 1;
    }

    /// Update the queue depth gauge.
    pub fn set_queue_depth(&self, queue_depth: usize) {
        self.state.lock().queue_depth = queue_depth;
    }

    /// Record one enrichment task run.
    pub fn record_task(&self, kind: TaskKind, latency: Duration, failed: bool) {
        let mut state = self.state.lock();
        state.task_window(kind).push(latency);
        if failed {
            state.enrichment_task_failures += 1;
        }
    }

    /// Record an id whose three tasks have all run.
    pub fn record_enrichment_completed(&self) {
        self.state.lock().enrichment_completed += 1;
    }

    /// Copy every metric under one lock.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            enqueue_calls: state.enqueue_calls,
            validation_rejections: state.validation_rejections,
            batches_flushed: state.batches_flushed,
            fragments_committed: state.fragments_committed,
            commit_failures: state.commit_failures,
            retries: state.retries,
            stranded_batches: state.stranded_batches,
            enrichment_scheduled: state.enrichment_scheduled,
            enrichment_completed: state.enrichment_completed,
            dropped_enrichments: state.dropped_enrichments,
            enrichment_task_failures: state.enrichment_task_failures,
            pending_size: state.pending_size,
            queue_depth: state.queue_depth,
            retry_len: state.retry_len,
            avg_flush_latency_ms: state.flush_latency.average_ms(),
            last_flush_latency_ms: state.flush_latency.last_ms(),
            avg_clustering_ms: state.clustering_latency.average_ms(),
            avg_timeline_ms: state.timeline_latency.average_ms(),
            avg_tagging_ms: state.tagging_latency.average_ms(),
        }
    }
}
