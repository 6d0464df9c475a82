//! Quarantine for permanently failed messages.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::message::Message;

/// A message removed from normal processing, held for inspection or replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    /// Dead letter ID, distinct from the message ID.
    pub id: String,
    /// Queue the message failed in; replay targets it.
    pub queue: String,
    pub message: Message,
    pub failure_reason: String,
    pub failure_timestamp: DateTime<Utc>,
    /// Retry count at the time of failure.
    pub retry_count: u32,
    pub quarantine_until: DateTime<Utc>,
}

impl DeadLetterMessage {
    pub fn new(
        queue: impl Into<String>,
        message: Message,
        reason: impl Into<String>,
        quarantine: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let quarantine = chrono::Duration::from_std(quarantine).unwrap_or(chrono::Duration::MAX);
        Self {
            id: format!("dlq-{}", Uuid::new_v4()),
            queue: queue.into(),
            retry_count: message.retry_count,
            message,
            failure_reason: reason.into(),
            failure_timestamp: now,
            quarantine_until: now.checked_add_signed(quarantine).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.quarantine_until <= now
    }
}

/// In-memory dead letter set. Durable records are written by the engine.
#[derive(Default)]
pub struct DeadLetterManager {
    letters: Mutex<Vec<DeadLetterMessage>>,
}

impl DeadLetterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `message` as a dead letter and add it to the set.
    pub fn quarantine(
        &self,
        queue: &str,
        message: Message,
        reason: &str,
        period: Duration,
    ) -> DeadLetterMessage {
        let letter = DeadLetterMessage::new(queue, message, reason, period, Utc::now());
        warn!(
            "Message {} dead-lettered from '{}' as {} after {} retries: {}",
            letter.message.id, queue, letter.id, letter.retry_count, reason
        );
        self.letters.lock().push(letter.clone());
        letter
    }

    /// Remove and return a dead letter.
    pub fn take(&self, id: &str) -> Option<DeadLetterMessage> {
        let mut letters = self.letters.lock();
        let pos = letters.iter().position(|l| l.id == id)?;
        Some(letters.remove(pos))
    }

    /// Put a letter back, e.g. after a rejected replay.
    pub fn restore(&self, letter: DeadLetterMessage) {
        self.letters.lock().push(letter);
    }

    /// Replace the set with letters recovered from disk.
    pub fn load(&self, letters: Vec<DeadLetterMessage>) {
        *self.letters.lock() = letters;
    }

    pub fn get(&self, id: &str) -> Option<DeadLetterMessage> {
        self.letters.lock().iter().find(|l| l.id == id).cloned()
    }

    pub fn list(&self) -> Vec<DeadLetterMessage> {
        self.letters.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.lock().is_empty()
    }

    /// Remove and return every letter whose quarantine has passed.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<DeadLetterMessage> {
        let mut letters = self.letters.lock();
        let (expired, kept): (Vec<_>, Vec<_>) =
            letters.drain(..).partition(|l| l.is_expired(now));
        *letters = kept;
        expired
    }
}
