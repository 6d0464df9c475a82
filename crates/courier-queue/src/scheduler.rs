//! Delayed retry entries.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::message::Message;

/// Due time used when `now + delay` does not fit in an `Instant`.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(86_400 * 365);

/// Backoff before retry number `retry_count` (1-based):
/// `retry_delay_ms * multiplier^(retry_count - 1)`.
pub fn backoff_delay(retry_delay_ms: u64, multiplier: f64, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1) as i32;
    let ms = retry_delay_ms as f64 * multiplier.powi(exponent);
    if !ms.is_finite() || ms >= u64::MAX as f64 {
        return Duration::from_millis(u64::MAX);
    }
    Duration::from_millis(ms.max(0.0) as u64)
}

/// A message waiting out its backoff.
#[derive(Debug, Clone)]
pub struct ScheduledRetry {
    pub queue: String,
    pub message: Message,
    pub due: Instant,
    seq: u64,
}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledRetry {}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    // Reversed so the max-heap pops the earliest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<ScheduledRetry>,
    next_seq: u64,
}

/// Pending retries ordered by due time.
#[derive(Default)]
pub struct RetryScheduler {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `message` to re-enter `queue` after `delay`.
    pub fn schedule(&self, queue: &str, message: Message, delay: Duration) -> Instant {
        let now = Instant::now();
        let due = now.checked_add(delay).unwrap_or(now + MAX_RETRY_DELAY);
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            debug!(
                "Retry {} of message {} in '{}' scheduled in {:?}",
                message.retry_count, message.id, queue, delay
            );
            inner.heap.push(ScheduledRetry {
                queue: queue.to_string(),
                message,
                due,
                seq,
            });
        }
        self.changed.notify_one();
        due
    }

    /// Remove and return every entry due at or before `now`, earliest first.
    pub fn take_due(&self, now: Instant) -> Vec<ScheduledRetry> {
        let mut inner = self.inner.lock();
        let mut due = Vec::new();
        while inner.heap.peek().is_some_and(|e| e.due <= now) {
            if let Some(entry) = inner.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.inner.lock().heap.peek().map(|e| e.due)
    }

    /// Snapshot of pending entries, earliest first.
    pub fn pending(&self) -> Vec<ScheduledRetry> {
        let inner = self.inner.lock();
        let mut entries: Vec<ScheduledRetry> = inner.heap.iter().cloned().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
    }

    /// Remove and return every entry regardless of due time.
    pub fn drain(&self) -> Vec<ScheduledRetry> {
        let mut inner = self.inner.lock();
        let mut entries = std::mem::take(&mut inner.heap).into_sorted_vec();
        entries.reverse();
        entries
    }

    /// Drop every pending entry. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.heap.len();
        inner.heap.clear();
        drop(inner);
        self.changed.notify_one();
        count
    }

    /// Whether a retry of message `id` is waiting for `queue`.
    pub fn contains(&self, queue: &str, id: &str) -> bool {
        self.inner
            .lock()
            .heap
            .iter()
            .any(|e| e.queue == queue && e.message.id == id)
    }

    /// Remove and return the entries for `queue`, earliest first.
    pub fn cancel_queue(&self, queue: &str) -> Vec<ScheduledRetry> {
        let mut inner = self.inner.lock();
        let (mut cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.heap)
            .into_iter()
            .partition(|e| e.queue == queue);
        inner.heap = kept.into();
        drop(inner);

        cancelled.sort_by(|a, b| b.cmp(a));
        if !cancelled.is_empty() {
            self.changed.notify_one();
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Wait until the schedule changes.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
