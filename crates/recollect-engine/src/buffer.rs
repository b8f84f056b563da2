//! Write-ahead buffer.
//!
//! `enqueue` validates a fragment, appends it to the pending list and checks
//! the flush policy, all under one short-held mutex, then returns the id. No
//! storage I/O happens on that path.
//!
//! ```text
//! enqueue ──► pending ──(size or time trigger)──► ready ──► flusher ──► batch_commit
//!                                                              │            │
//!                                                   retry list ◄── failure  └─► enrichment
//! ```
//!
//! A batch is sealed when the pending list reaches `batch_size`, or when the
//! oldest buffered fragment has waited `flush_interval`. Sealed batches are
//! committed by the flusher task on a blocking thread. Flusher and
//! [`WriteAheadBuffer::force_flush`] share a commit lock, so at most one of
//! them is committing at any time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use recollect_store::{
    CommitReport, Fragment, FragmentBackend, FragmentId, ValidationError, validate_fragment,
};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::BufferOptions;
use crate::enrichment::EnrichmentQueue;
use crate::error::{EngineError, Result};
use crate::metrics::Metrics;
use crate::retry::{FailedBatch, RetryDecision, RetryQueue};

/// A batch about to be committed.
struct Work {
    fragments: Arc<Vec<Fragment>>,
    /// Attempts that already failed.
    previous_attempts: u32,
    /// Handle on the retry list, for a batch that failed before.
    retry_key: Option<u64>,
}

impl Work {
    fn sealed(fragments: Arc<Vec<Fragment>>) -> Self {
        Self {
            fragments,
            previous_attempts: 0,
            retry_key: None,
        }
    }

    fn retry(batch: FailedBatch) -> Self {
        Self {
            fragments: batch.fragments,
            previous_attempts: batch.attempts,
            retry_key: Some(batch.key),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Batches committed.
    pub batches: usize,
    /// Fragments made durable. For a retried batch this includes rows an
    /// earlier, unacknowledged attempt had already written.
    pub committed: usize,
    /// Fragments of first-attempt batches whose id was already stored.
    pub skipped: usize,
}

impl FlushReport {
    fn add(&mut self, report: &CommitReport, is_retry: bool) {
        self.batches += 1;
        if is_retry {
            self.committed += report.total();
        } else {
            self.committed += report.inserted;
            self.skipped += report.skipped;
        }
    }
}

/// Durability health derived from the retry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing is waiting for retry.
    Healthy,
    /// Some batches failed and are being retried.
    Degraded { retrying_batches: usize },
    /// Some batches exhausted their retries. They are kept in memory and
    /// only retried by a forced flush.
    Failed {
        stranded_batches: usize,
        stranded_fragments: usize,
        last_error: String,
    },
}

impl HealthStatus {
    /// Whether the status is [`HealthStatus::Healthy`].
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// What a round of commits produced.
#[derive(Debug, Default)]
struct FlushOutcome {
    report: FlushReport,
    failed_batches: usize,
    failed_fragments: usize,
    last_error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Buffer State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct BufferState {
    /// Fragments not yet sealed into a batch.
    pending: Vec<Fragment>,
    /// When the current flush window opened (first fragment into an empty buffer).
    window_start: Option<Instant>,
    /// When a batch was last sealed.
    last_flush: Instant,
    /// Sealed batches waiting for the flusher.
    ready: VecDeque<Arc<Vec<Fragment>>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Write-Ahead Buffer
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory staging area in front of the durable store.
pub struct WriteAheadBuffer {
    state: Mutex<BufferState>,
    retry: Mutex<RetryQueue>,
    options: BufferOptions,
    backend: Arc<dyn FragmentBackend>,
    metrics: Arc<Metrics>,
    enrichment: Option<EnrichmentQueue>,
    flush_signal: Notify,
    commit_lock: AsyncMutex<()>,
    notifications: TaskTracker,
}

impl WriteAheadBuffer {
    /// Create a buffer in front of `backend`.
    ///
    /// Committed ids are scheduled on `enrichment` when one is given.
    pub fn new(
        options: BufferOptions,
        backend: Arc<dyn FragmentBackend>,
        metrics: Arc<Metrics>,
        enrichment: Option<EnrichmentQueue>,
    ) -> Self {
        Self {
            state: Mutex::new(BufferState {
                pending: Vec::with_capacity(options.batch_size),
                window_start: None,
                last_flush: Instant::now(),
                ready: VecDeque::new(),
            }),
            retry: Mutex::new(RetryQueue::new(&options)),
            options,
            backend,
            metrics,
            enrichment,
            flush_signal: Notify::new(),
            commit_lock: AsyncMutex::new(()),
            notifications: TaskTracker::new(),
        }
    }

    /// Buffer options.
    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Validate and buffer a fragment.
    ///
    /// Returns as soon as the fragment is buffered; it becomes durable on a
    /// later flush. Invalid fragments are rejected and nothing is buffered.
    pub fn enqueue(&self, fragment: Fragment) -> std::result::Result<FragmentId, ValidationError> {
        if let Err(e) = validate_fragment(&fragment) {
            self.metrics.record_rejection(1);
            return Err(e);
        }

        let id = fragment.id.clone();
        let (pending, sealed) = {
            let mut state = self.state.lock();
            let now = Instant::now();
            if state.pending.is_empty() {
                state.window_start = Some(now);
            }
            state.pending.push(fragment);
            let sealed = self.seal_triggered(&mut state, now);
            (state.pending.len(), sealed)
        };

        self.metrics.record_enqueue(1, pending);
        if sealed {
            self.flush_signal.notify_one();
        }
        Ok(id)
    }

    /// Validate and buffer several fragments with one lock acquisition.
    ///
    /// All fragments are validated first; if any is invalid, none is buffered.
    pub fn enqueue_many(
        &self,
        fragments: Vec<Fragment>,
    ) -> std::result::Result<Vec<FragmentId>, ValidationError> {
        if let Err(e) = fragments.iter().try_for_each(validate_fragment) {
            self.metrics.record_rejection(fragments.len());
            return Err(e);
        }
        if fragments.is_empty() {
            return Ok(Vec::new());
        }

        let count = fragments.len();
        let ids: Vec<FragmentId> = fragments.iter().map(|f| f.id.clone()).collect();
        let (pending, sealed) = {
            let mut state = self.state.lock();
            let now = Instant::now();
            if state.pending.is_empty() {
                state.window_start = Some(now);
            }
            state.pending.extend(fragments);
            let sealed = self.seal_triggered(&mut state, now);
            (state.pending.len(), sealed)
        };

        self.metrics.record_enqueue(count, pending);
        if sealed {
            self.flush_signal.notify_one();
        }
        Ok(ids)
    }

    /// Seal batches whose size or time trigger has fired. Returns whether any
    /// batch was sealed.
    fn seal_triggered(&self, state: &mut BufferState, now: Instant) -> bool {
        let mut sealed = false;

        while state.pending.len() >= self.options.batch_size {
            let rest = state.pending.split_off(self.options.batch_size);
            let batch = std::mem::replace(&mut state.pending, rest);
            state.ready.push_back(Arc::new(batch));
            state.last_flush = now;
            state.window_start = (!state.pending.is_empty()).then_some(now);
            sealed = true;
        }

        let window_elapsed = state
            .window_start
            .is_some_and(|start| now.duration_since(start.max(state.last_flush)) >= self.options.flush_interval);
        if !state.pending.is_empty() && window_elapsed {
            Self::seal_pending(state, now);
            sealed = true;
        }

        sealed
    }

    fn seal_pending(state: &mut BufferState, now: Instant) {
        let batch = std::mem::take(&mut state.pending);
        state.ready.push_back(Arc::new(batch));
        state.last_flush = now;
        state.window_start = None;
    }

    /// Fragments buffered but not yet sealed.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Current durability health.
    pub fn health(&self) -> HealthStatus {
        let retry = self.retry.lock();
        if retry.stranded_batches() > 0 {
            HealthStatus::Failed {
                stranded_batches: retry.stranded_batches(),
                stranded_fragments: retry.stranded_fragments(),
                last_error: retry.last_stranded_error().unwrap_or_default().to_string(),
            }
        } else if retry.retrying_batches() > 0 {
            HealthStatus::Degraded {
                retrying_batches: retry.retrying_batches(),
            }
        } else {
            HealthStatus::Healthy
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Flushing
    // ─────────────────────────────────────────────────────────────────────

    /// Flusher loop: wakes on a sealed batch or every check interval, then
    /// commits whatever is due. Returns once `cancel` fires; a round already
    /// in progress finishes first.
    pub async fn run_flusher(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.flush_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            check_interval_ms = self.options.flush_check_interval.as_millis() as u64,
            "Flusher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.flush_signal.notified() => {}
                _ = ticker.tick() => {}
            }
            self.flush_due().await;
        }

        debug!("Flusher stopped");
    }

    /// Commit sealed batches, the pending list if its window has elapsed, and
    /// retry batches whose backoff is over.
    pub async fn flush_due(&self) -> FlushReport {
        let _guard = self.commit_lock.lock().await;
        let now = Instant::now();

        let mut work: Vec<Work> = self
            .retry
            .lock()
            .claim_due(now)
            .into_iter()
            .map(Work::retry)
            .collect();
        {
            let mut state = self.state.lock();
            self.seal_triggered(&mut state, now);
            work.extend(state.ready.drain(..).map(Work::sealed));
            self.metrics.set_pending_size(state.pending.len());
        }

        self.commit_all(work).await.report
    }

    /// Commit everything held in memory, ignoring backoff: sealed batches,
    /// the pending list and every retrying or stranded batch.
    ///
    /// Fails with [`EngineError::Commit`] if any batch still cannot be
    /// committed; such batches remain held for retry.
    pub async fn force_flush(&self) -> Result<FlushReport> {
        let _guard = self.commit_lock.lock().await;

        let mut work: Vec<Work> = self
            .retry
            .lock()
            .claim_all()
            .into_iter()
            .map(Work::retry)
            .collect();
        {
            let mut state = self.state.lock();
            if !state.pending.is_empty() {
                Self::seal_pending(&mut state, Instant::now());
            }
            work.extend(state.ready.drain(..).map(Work::sealed));
            self.metrics.set_pending_size(0);
        }

        let outcome = self.commit_all(work).await;
        match outcome.last_error {
            Some(last_error) => Err(EngineError::Commit {
                failed_batches: outcome.failed_batches,
                failed_fragments: outcome.failed_fragments,
                last_error,
            }),
            None => {
                debug!(
                    batches = outcome.report.batches,
                    committed = outcome.report.committed,
                    "Forced flush complete"
                );
                Ok(outcome.report)
            }
        }
    }

    async fn commit_all(&self, work: Vec<Work>) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();

        for item in work {
            let size = item.fragments.len();
            let is_retry = item.previous_attempts > 0;
            match self.commit_batch(item).await {
                Ok(report) => outcome.report.add(&report, is_retry),
                Err(e) => {
                    outcome.failed_batches += 1;
                    outcome.failed_fragments += size;
                    outcome.last_error = Some(e);
                }
            }
        }

        self.metrics.set_retry_len(self.retry.lock().len());
        outcome
    }

    /// Commit one batch on a blocking thread. On failure the batch is filed
    /// with the retry list and the error text is returned.
    async fn commit_batch(&self, work: Work) -> std::result::Result<CommitReport, String> {
        let Work {
            fragments,
            previous_attempts,
            retry_key,
        } = work;
        let is_retry = previous_attempts > 0;
        let started = Instant::now();

        let result = {
            let backend = Arc::clone(&self.backend);
            let batch = Arc::clone(&fragments);
            tokio::task::spawn_blocking(move || backend.batch_commit(&batch)).await
        };
        let result = match result {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("commit task failed: {}", e)),
        };

        match result {
            Ok(report) => {
                let latency = started.elapsed();
                if let Some(key) = retry_key {
                    self.retry.lock().complete(key);
                }
                // A replay skips rows its unacknowledged earlier attempt wrote.
                let committed = if is_retry {
                    report.total()
                } else {
                    report.inserted
                };
                self.metrics.record_flush(latency, committed, is_retry);
                debug!(
                    inserted = report.inserted,
                    skipped = report.skipped,
                    attempt = previous_attempts + 1,
                    latency_ms = latency.as_secs_f64() * 1_000.0,
                    "Batch committed"
                );
                if is_retry {
                    info!(
                        fragments = fragments.len(),
                        attempts = previous_attempts + 1,
                        "Batch committed after retry"
                    );
                }
                self.notify_enrichment(&fragments);
                Ok(report)
            }
            Err(e) => {
                self.metrics.record_commit_failure(is_retry);
                let decision = self.retry.lock().record_failure(
                    retry_key,
                    Arc::clone(&fragments),
                    previous_attempts,
                    e.clone(),
                    Instant::now(),
                );

                match decision {
                    RetryDecision::Scheduled { attempt, delay } => {
                        warn!(
                            fragments = fragments.len(),
                            attempt,
                            max_attempts = self.options.max_retry_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Batch commit failed, will retry"
                        );
                    }
                    RetryDecision::Stranded(reason) => {
                        self.metrics.record_stranded();
                        error!(
                            fragments = fragments.len(),
                            attempts = previous_attempts + 1,
                            reason = ?reason,
                            error = %e,
                            "Batch stranded; held in memory until a forced flush succeeds"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Hand committed ids to the enrichment queue without waiting.
    fn notify_enrichment(&self, fragments: &[Fragment]) {
        let Some(queue) = &self.enrichment else {
            return;
        };

        let ids: Vec<FragmentId> = fragments.iter().map(|f| f.id.clone()).collect();
        let queue = queue.clone();
        let metrics = Arc::clone(&self.metrics);
        self.notifications.spawn(async move {
            for id in ids {
                if let Err(e) = queue.schedule(id.clone()).await {
                    metrics.record_dropped();
                    warn!(id = %id, error = %e, "Enrichment dropped");
                }
            }
        });
    }

    /// Wait for every in-flight enrichment notification to finish.
    pub async fn wait_for_notifications(&self) {
        self.notifications.close();
        self.notifications.wait().await;
        self.notifications.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_store::FragmentStore;
    use std::time::Duration;

    fn buffer_with(options: BufferOptions) -> (WriteAheadBuffer, Arc<FragmentStore>) {
        let store = Arc::new(FragmentStore::open_in_memory().unwrap());
        let backend: Arc<dyn FragmentBackend> = store.clone();
        let buffer = WriteAheadBuffer::new(options, backend, Arc::new(Metrics::new()), None);
        (buffer, store)
    }

    #[test]
    fn test_enqueue_does_not_commit() {
        let (buffer, store) = buffer_with(BufferOptions::new());
        buffer.enqueue(Fragment::new("buffered", "t")).unwrap();

        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_invalid_fragment_is_not_buffered() {
        let (buffer, _store) = buffer_with(BufferOptions::new());
        let err = buffer
            .enqueue(Fragment::new("too sure", "t").with_confidence(1.5))
            .unwrap_err();

        assert_eq!(err, ValidationError::InvalidConfidence(1.5));
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.metrics.snapshot().validation_rejections, 1);
    }

    #[test]
    fn test_sub_microsecond_timestamp_is_rejected() {
        use chrono::TimeZone;

        let (buffer, _store) = buffer_with(BufferOptions::new());
        let mut fragment = Fragment::new("hand built", "t");
        fragment.created_at = chrono::Utc
            .timestamp_opt(1_700_000_000, 883_620_004)
            .unwrap();

        assert_eq!(
            buffer.enqueue(fragment).unwrap_err(),
            ValidationError::SubMicrosecondTimestamp {
                field: "created_at"
            }
        );
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_size_trigger_seals_batch() {
        let (buffer, _store) = buffer_with(BufferOptions::new().with_batch_size(3));
        for i in 0..7 {
            buffer.enqueue(Fragment::new(format!("f{}", i), "t")).unwrap();
        }

        let state = buffer.state.lock();
        assert_eq!(state.ready.len(), 2);
        assert!(state.ready.iter().all(|b| b.len() == 3));
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_enqueue_many_is_all_or_nothing() {
        let (buffer, _store) = buffer_with(BufferOptions::new());
        let batch = vec![
            Fragment::new("ok", "t"),
            Fragment::new("", "t"),
            Fragment::new("ok too", "t"),
        ];

        assert_eq!(
            buffer.enqueue_many(batch).unwrap_err(),
            ValidationError::EmptyContent
        );
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_enqueue_many_splits_into_batches() {
        let (buffer, _store) = buffer_with(BufferOptions::new().with_batch_size(4));
        let fragments: Vec<_> = (0..10).map(|i| Fragment::new(format!("f{}", i), "t")).collect();

        let ids = buffer.enqueue_many(fragments).unwrap();
        assert_eq!(ids.len(), 10);

        let state = buffer.state.lock();
        assert_eq!(state.ready.len(), 2);
        assert_eq!(state.pending.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_due_respects_window() {
        let (buffer, store) = buffer_with(
            BufferOptions::new().with_flush_interval(Duration::from_millis(30)),
        );
        buffer.enqueue(Fragment::new("waiting", "t")).unwrap();

        assert_eq!(buffer.flush_due().await, FlushReport::default());
        assert_eq!(store.count().unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = buffer.flush_due().await;
        assert_eq!(report.committed, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_force_flush_commits_everything() {
        let (buffer, store) = buffer_with(BufferOptions::new().with_batch_size(4));
        for i in 0..6 {
            buffer.enqueue(Fragment::new(format!("f{}", i), "t")).unwrap();
        }

        let report = buffer.force_flush().await.unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.committed, 6);
        assert_eq!(store.count().unwrap(), 6);
        assert!(buffer.health().is_healthy());
    }

    #[tokio::test]
    async fn test_failed_batch_is_retained() {
        let (buffer, store) = buffer_with(BufferOptions::new());
        // Bypasses validation; the store rejects it.
        let mut bad = Fragment::new("bad", "t");
        bad.confidence_score = 2.0;
        buffer
            .state
            .lock()
            .ready
            .push_back(Arc::new(vec![Fragment::new("good", "t"), bad]));

        let err = buffer.force_flush().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Commit {
                failed_batches: 1,
                failed_fragments: 2,
                ..
            }
        ));
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(
            buffer.health(),
            HealthStatus::Degraded {
                retrying_batches: 1
            }
        );
    }
}
