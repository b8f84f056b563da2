//! Retry list for batches whose commit failed.
//!
//! A failed batch waits here with an exponential backoff. Once it has used up
//! its attempts, or if the list is already full, it is moved to the stranded
//! list instead: still held in memory, reported through health, and only
//! retried by an explicit forced flush.
//!
//! Batches handed out for another attempt stay on their list, marked in
//! flight, until the attempt resolves: [`RetryQueue::complete`] drops a batch
//! that landed and [`RetryQueue::record_failure`] refiles one that didn't.
//! Health therefore keeps counting a batch until it is actually durable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use recollect_store::Fragment;

use crate::config::BufferOptions;

/// Exponential backoff: `initial * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// A batch that has failed at least once.
#[derive(Debug, Clone)]
pub struct FailedBatch {
    /// Stable handle across attempts.
    pub key: u64,
    /// The fragments, shared with any in-flight commit.
    pub fragments: Arc<Vec<Fragment>>,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest time the next attempt may run.
    pub next_attempt: Instant,
    /// Error from the most recent attempt.
    pub last_error: String,
    /// Handed out for an attempt that hasn't resolved yet.
    pub in_flight: bool,
}

/// Why a batch was stranded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandReason {
    /// Used up its attempts.
    AttemptsExhausted,
    /// The retry list was full.
    RetryListFull,
}

/// What happened to a batch after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Queued for another attempt after `delay`.
    Scheduled { attempt: u32, delay: Duration },
    /// Moved to the stranded list.
    Stranded(StrandReason),
}

/// Bounded retry list plus the unbounded stranded list.
#[derive(Debug)]
pub struct RetryQueue {
    retrying: VecDeque<FailedBatch>,
    stranded: Vec<FailedBatch>,
    capacity: usize,
    max_attempts: u32,
    backoff: Backoff,
    next_key: u64,
}

impl RetryQueue {
    /// Create an empty queue from buffer options.
    pub fn new(options: &BufferOptions) -> Self {
        Self {
            retrying: VecDeque::new(),
            stranded: Vec::new(),
            capacity: options.retry_capacity,
            max_attempts: options.max_retry_attempts,
            backoff: Backoff {
                initial: options.retry_backoff,
                max: options.max_retry_backoff,
            },
            next_key: 0,
        }
    }

    /// File a batch whose attempt just failed.
    ///
    /// `key` is the handle of a batch that was already on a list (a failed
    /// retry), or `None` for a first failure. `previous_attempts` is how many
    /// attempts had failed before this one.
    pub fn record_failure(
        &mut self,
        key: Option<u64>,
        fragments: Arc<Vec<Fragment>>,
        previous_attempts: u32,
        error: String,
        now: Instant,
    ) -> RetryDecision {
        let key = match key {
            Some(key) => {
                self.remove(key);
                key
            }
            None => {
                self.next_key += 1;
                self.next_key
            }
        };
        let attempts = previous_attempts + 1;
        let mut batch = FailedBatch {
            key,
            fragments,
            attempts,
            next_attempt: now,
            last_error: error,
            in_flight: false,
        };

        if attempts >= self.max_attempts {
            self.stranded.push(batch);
            return RetryDecision::Stranded(StrandReason::AttemptsExhausted);
        }
        if self.retrying.len() >= self.capacity {
            self.stranded.push(batch);
            return RetryDecision::Stranded(StrandReason::RetryListFull);
        }

        let delay = self.backoff.delay(attempts);
        batch.next_attempt = now + delay;
        self.retrying.push_back(batch);
        RetryDecision::Scheduled { attempt: attempts, delay }
    }

    /// Mark the retrying batches whose backoff has elapsed as in flight and
    /// return copies of them.
    pub fn claim_due(&mut self, now: Instant) -> Vec<FailedBatch> {
        self.retrying
            .iter_mut()
            .filter(|batch| !batch.in_flight && batch.next_attempt <= now)
            .map(|batch| {
                batch.in_flight = true;
                batch.clone()
            })
            .collect()
    }

    /// Mark every retrying and stranded batch as in flight, ignoring
    /// backoff, and return copies of them.
    pub fn claim_all(&mut self) -> Vec<FailedBatch> {
        self.retrying
            .iter_mut()
            .chain(self.stranded.iter_mut())
            .filter(|batch| !batch.in_flight)
            .map(|batch| {
                batch.in_flight = true;
                batch.clone()
            })
            .collect()
    }

    /// Drop a batch whose retry committed.
    pub fn complete(&mut self, key: u64) {
        self.remove(key);
    }

    fn remove(&mut self, key: u64) {
        self.retrying.retain(|batch| batch.key != key);
        self.stranded.retain(|batch| batch.key != key);
    }

    /// Batches waiting for retry or stranded.
    pub fn len(&self) -> usize {
        self.retrying.len() + self.stranded.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches waiting for a timed retry.
    pub fn retrying_batches(&self) -> usize {
        self.retrying.len()
    }

    /// Stranded batches.
    pub fn stranded_batches(&self) -> usize {
        self.stranded.len()
    }

    /// Fragments held in stranded batches.
    pub fn stranded_fragments(&self) -> usize {
        self.stranded.iter().map(|b| b.fragments.len()).sum()
    }

    /// Most recent error among stranded batches.
    pub fn last_stranded_error(&self) -> Option<&str> {
        self.stranded.last().map(|b| b.last_error.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BufferOptions {
        BufferOptions::new()
            .with_retry(3, Duration::from_millis(50), Duration::from_millis(120))
            .with_retry_capacity(2)
    }

    fn batch(n: usize) -> Arc<Vec<Fragment>> {
        Arc::new((0..n).map(|i| Fragment::new(format!("f{}", i), "t")).collect())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(2_000),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(50));
        assert_eq!(backoff.delay(2), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(200));
        assert_eq!(backoff.delay(7), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(200), Duration::from_millis(2_000));
    }

    #[test]
    fn test_failure_is_scheduled_with_backoff() {
        let mut queue = RetryQueue::new(&options());
        let now = Instant::now();

        let decision = queue.record_failure(None, batch(2), 0, "disk full".into(), now);
        assert_eq!(
            decision,
            RetryDecision::Scheduled {
                attempt: 1,
                delay: Duration::from_millis(50)
            }
        );

        assert!(queue.claim_due(now).is_empty());
        let due = queue.claim_due(now + Duration::from_millis(50));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);

        // Claimed but unresolved: still counted, not handed out twice.
        assert_eq!(queue.retrying_batches(), 1);
        assert!(queue.claim_due(now + Duration::from_secs(60)).is_empty());

        queue.complete(due[0].key);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failed_retry_replaces_its_entry() {
        let mut queue = RetryQueue::new(&options());
        let now = Instant::now();

        queue.record_failure(None, batch(2), 0, "first".into(), now);
        let claimed = queue.claim_due(now + Duration::from_millis(50)).remove(0);

        let decision = queue.record_failure(
            Some(claimed.key),
            claimed.fragments,
            claimed.attempts,
            "second".into(),
            now,
        );
        assert_eq!(
            decision,
            RetryDecision::Scheduled {
                attempt: 2,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(queue.len(), 1);

        let again = queue.claim_due(now + Duration::from_millis(100));
        assert_eq!(again[0].key, claimed.key);
        assert_eq!(again[0].last_error, "second");
    }

    #[test]
    fn test_exhausted_attempts_strand() {
        let mut queue = RetryQueue::new(&options());
        let now = Instant::now();

        let decision = queue.record_failure(None, batch(3), 2, "locked".into(), now);
        assert_eq!(
            decision,
            RetryDecision::Stranded(StrandReason::AttemptsExhausted)
        );
        assert_eq!(queue.stranded_batches(), 1);
        assert_eq!(queue.stranded_fragments(), 3);
        assert_eq!(queue.last_stranded_error(), Some("locked"));
        // Stranded batches are never handed out by the timer path.
        assert!(queue.claim_due(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_full_retry_list_strands() {
        let mut queue = RetryQueue::new(&options());
        let now = Instant::now();

        queue.record_failure(None, batch(1), 0, "e".into(), now);
        queue.record_failure(None, batch(1), 0, "e".into(), now);
        let decision = queue.record_failure(None, batch(1), 0, "e".into(), now);

        assert_eq!(decision, RetryDecision::Stranded(StrandReason::RetryListFull));
        assert_eq!(queue.retrying_batches(), 2);
        assert_eq!(queue.stranded_batches(), 1);
    }

    #[test]
    fn test_claim_all_keeps_batches_until_resolved() {
        let mut queue = RetryQueue::new(&options());
        let now = Instant::now();

        queue.record_failure(None, batch(1), 0, "e".into(), now);
        queue.record_failure(None, batch(2), 2, "e".into(), now);

        let all = queue.claim_all();
        assert_eq!(all.len(), 2);
        assert!(queue.claim_all().is_empty());
        // A stranded batch under a forced retry is still reported stranded.
        assert_eq!(queue.stranded_fragments(), 2);

        for batch in all {
            queue.complete(batch.key);
        }
        assert!(queue.is_empty());
        assert_eq!(queue.stranded_fragments(), 0);
    }
}
