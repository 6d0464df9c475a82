//! The queue facade.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use courier_config::{ConfigStore, QueueConfig};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::codec::RecordCodec;
use crate::dead_letter::{DeadLetterManager, DeadLetterMessage};
use crate::error::{QueueError, QueueResult};
use crate::health::HealthReport;
use crate::lifecycle::Running;
use crate::message::Message;
use crate::metrics::{MetricsCollector, QueueMetrics};
use crate::persistence::PersistenceManager;
use crate::processor::{MessageProcessor, ProcessorInfo, ProcessorRegistry};
use crate::queue::{DEFAULT_QUEUE, QueueStore};
use crate::scheduler::RetryScheduler;
use crate::store::{FileMessageStore, MemoryMessageStore, MessageStore};
use crate::validator::MessageValidator;

/// Counts restored by [`MessageQueue::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub messages: usize,
    pub dead_letters: usize,
}

pub(crate) struct Inner {
    pub(crate) config: ConfigStore,
    pub(crate) queues: Mutex<QueueStore>,
    pub(crate) persistence: PersistenceManager,
    pub(crate) processors: ProcessorRegistry,
    pub(crate) dead_letters: DeadLetterManager,
    pub(crate) retries: RetryScheduler,
    pub(crate) metrics: MetricsCollector,
    pub(crate) pending_acks: Mutex<HashSet<String>>,
    pub(crate) running: Mutex<Option<Running>>,
}

/// A durable in-process message queue.
///
/// Cloning is cheap and every clone drives the same queue. Producers call
/// [`enqueue`](Self::enqueue); registered processors receive messages from
/// the processing loop started by [`start`](Self::start), or consumers pull
/// with [`dequeue`](Self::dequeue).
#[derive(Clone)]
pub struct MessageQueue {
    pub(crate) inner: Arc<Inner>,
}

impl MessageQueue {
    /// Create a queue over `store`.
    ///
    /// `persistence.enabled` is read once here; changing it later has no
    /// effect on this instance.
    pub fn new(config: ConfigStore, store: Arc<dyn MessageStore>) -> Self {
        let current = config.get();
        let metrics = MetricsCollector::new();
        metrics.set_collection(current.monitoring.metrics_collection);

        Self {
            inner: Arc::new(Inner {
                persistence: PersistenceManager::new(store, current.persistence.enabled),
                config,
                queues: Mutex::new(QueueStore::new()),
                processors: ProcessorRegistry::new(),
                dead_letters: DeadLetterManager::new(),
                retries: RetryScheduler::new(),
                metrics,
                pending_acks: Mutex::new(HashSet::new()),
                running: Mutex::new(None),
            }),
        }
    }

    /// Queue with an in-memory store, for tests and embedded use.
    pub fn in_memory(config: QueueConfig) -> Self {
        Self::new(
            ConfigStore::in_memory(config),
            Arc::new(MemoryMessageStore::new()),
        )
    }

    /// Queue backed by a [`FileMessageStore`] at `persistence.storage_path`.
    pub async fn open(config: ConfigStore) -> QueueResult<Self> {
        let current = config.get();
        let codec = RecordCodec::from_config(&current.persistence);
        let store = FileMessageStore::new(&current.persistence.storage_path, codec).await?;
        Ok(Self::new(config, Arc::new(store)))
    }

    /// Validate `message` and add it to `queue`. Returns the message id.
    pub async fn enqueue(&self, message: Message, queue: &str) -> QueueResult<String> {
        let id = self.admit(message, queue).await?;
        self.inner.metrics.record_enqueued();
        if self.inner.config.get().delivery.guaranteed_delivery {
            self.inner.pending_acks.lock().insert(id.clone());
        }
        Ok(id)
    }

    /// [`enqueue`](Self::enqueue) into the default queue.
    pub async fn enqueue_default(&self, message: Message) -> QueueResult<String> {
        self.enqueue(message, DEFAULT_QUEUE).await
    }

    /// Validated, write-ahead insertion shared by producers, replays and
    /// retries.
    ///
    /// An id already stored in `queue`, or waiting there for a retry, is
    /// rejected with [`QueueError::Duplicate`]. Capacity and duplicates are
    /// checked before the durable write and again at insertion; losing that
    /// race undoes the write.
    pub(crate) async fn admit(&self, mut message: Message, queue: &str) -> QueueResult<String> {
        let config = self.inner.config.get();
        let capacity = config.performance.max_queue_size;
        MessageValidator::validate(&mut message, &config, Utc::now())?;

        {
            let mut queues = self.inner.queues.lock();
            if queues.contains(queue, &message.id)
                || self.inner.retries.contains(queue, &message.id)
            {
                return Err(QueueError::Duplicate {
                    queue: queue.to_string(),
                    id: message.id,
                });
            }
            if !queues.has_capacity(queue, capacity) {
                return Err(QueueError::QueueFull {
                    queue: queue.to_string(),
                    capacity,
                });
            }
            if message.sequence.is_none() {
                queues.assign_sequence(queue, &mut message);
            }
        }

        self.inner.persistence.persist(queue, &message).await;

        let id = message.id.clone();
        let inserted = {
            let mut queues = self.inner.queues.lock();
            let result = queues.insert(queue, message, capacity);
            self.inner.metrics.set_queue_depth(queues.total_depth());
            result
        };

        match inserted {
            Ok(()) => Ok(id),
            Err(e @ QueueError::Duplicate { .. }) => {
                // The record now holds this copy; put the live one back.
                let live = self.inner.queues.lock().get(queue, &id);
                if let Some(live) = live {
                    self.inner.persistence.persist(queue, &live).await;
                }
                Err(e)
            }
            Err(e) => {
                self.inner.persistence.remove(queue, &id).await;
                Err(e)
            }
        }
    }

    /// Pull the next message from `queue`, bypassing processors.
    pub async fn dequeue(&self, queue: &str) -> Option<Message> {
        let message = {
            let mut queues = self.inner.queues.lock();
            let message = queues.dequeue_one(queue);
            self.inner.metrics.set_queue_depth(queues.total_depth());
            message
        }?;

        self.inner.persistence.remove(queue, &message.id).await;
        self.inner.pending_acks.lock().remove(&message.id);
        debug!("Dequeued {} from '{}'", message.id, queue);
        Some(message)
    }

    /// Clear a pending delivery acknowledgment. Returns whether it was pending.
    pub fn acknowledge(&self, id: &str) -> bool {
        self.inner.pending_acks.lock().remove(id)
    }

    /// Ids still awaiting acknowledgment, sorted.
    pub fn pending_acknowledgments(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.pending_acks.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Re-enqueue a dead letter into its original queue with a fresh retry
    /// budget.
    ///
    /// Returns `Ok(false)` for an unknown id. A rejected re-enqueue puts the
    /// letter back and returns the rejection.
    pub async fn replay_dead_letter(&self, id: &str) -> QueueResult<bool> {
        let Some(letter) = self.inner.dead_letters.take(id) else {
            return Ok(false);
        };

        let mut message = letter.message.clone();
        message.retry_count = 0;

        match self.enqueue(message, &letter.queue).await {
            Ok(message_id) => {
                self.inner.persistence.remove_dead_letter(id).await;
                info!("Replayed dead letter {} as {} into '{}'", id, message_id, letter.queue);
                Ok(true)
            }
            Err(e) => {
                self.inner.dead_letters.restore(letter);
                Err(e)
            }
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.inner.config.get()
    }

    /// Merge `partial` over the active configuration and persist it.
    pub fn update_config(&self, partial: serde_json::Value) -> QueueResult<QueueConfig> {
        let updated = self.inner.config.update(partial)?;
        self.inner
            .metrics
            .set_collection(updated.monitoring.metrics_collection);
        Ok(updated)
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.inner.metrics.snapshot()
    }

    pub fn health(&self) -> HealthReport {
        let fullest = {
            let queues = self.inner.queues.lock();
            queues
                .queue_names()
                .iter()
                .map(|name| queues.depth(name))
                .max()
                .unwrap_or(0)
        };
        HealthReport::evaluate(
            &self.inner.metrics.snapshot(),
            fullest,
            &self.inner.config.get(),
            self.is_running(),
        )
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.inner.queues.lock().queue_names()
    }

    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner.queues.lock().depth(queue)
    }

    /// Messages in `queue` in delivery order, without removing them.
    pub fn peek(&self, queue: &str, limit: usize) -> Vec<Message> {
        self.inner.queues.lock().peek_batch(queue, limit)
    }

    pub fn dead_letter_messages(&self) -> Vec<DeadLetterMessage> {
        self.inner.dead_letters.list()
    }

    pub fn processors(&self) -> Vec<ProcessorInfo> {
        self.inner.processors.list()
    }

    /// Register a processor, replacing one with the same id.
    pub fn add_processor(&self, processor: MessageProcessor) {
        self.inner.processors.register(processor);
    }

    pub fn remove_processor(&self, id: &str) -> bool {
        self.inner.processors.unregister(id)
    }

    pub fn set_processor_enabled(&self, id: &str, enabled: bool) -> bool {
        self.inner.processors.set_enabled(id, enabled)
    }

    /// Drop every message in `queue`, including retries waiting out their
    /// backoff, and their durable records. Returns the number dropped.
    pub async fn clear_queue(&self, queue: &str) -> usize {
        let mut cleared = {
            let mut queues = self.inner.queues.lock();
            let cleared = queues.clear(queue);
            self.inner.metrics.set_queue_depth(queues.total_depth());
            cleared
        };
        cleared.extend(
            self.inner
                .retries
                .cancel_queue(queue)
                .into_iter()
                .map(|entry| entry.message),
        );

        {
            let mut acks = self.inner.pending_acks.lock();
            for message in &cleared {
                acks.remove(&message.id);
            }
        }
        for message in &cleared {
            self.inner.persistence.remove(queue, &message.id).await;
        }

        info!("Cleared {} messages from '{}'", cleared.len(), queue);
        cleared.len()
    }

    /// Rebuild queues and dead letters from the durable store.
    pub async fn recover(&self) -> RecoveryStats {
        let (mut stored, letters) = self.inner.persistence.load().await;
        stored.sort_by(|a, b| {
            a.queue
                .cmp(&b.queue)
                .then_with(|| a.message.sequence.cmp(&b.message.sequence))
                .then_with(|| a.message.timestamp.cmp(&b.message.timestamp))
        });

        let guaranteed = self.inner.config.get().delivery.guaranteed_delivery;
        let stats = RecoveryStats {
            messages: stored.len(),
            dead_letters: letters.len(),
        };

        {
            let mut queues = self.inner.queues.lock();
            let mut acks = self.inner.pending_acks.lock();
            for record in stored {
                if guaranteed {
                    acks.insert(record.message.id.clone());
                }
                queues.restore(&record.queue, record.message);
            }
            self.inner.metrics.set_queue_depth(queues.total_depth());
        }
        self.inner.dead_letters.load(letters);

        info!(
            "Recovered {} messages and {} dead letters",
            stats.messages, stats.dead_letters
        );
        stats
    }

    /// Rewrite every live message to the durable store.
    pub async fn sync_to_store(&self) -> usize {
        let keys: Vec<(String, String)> = self
            .inner
            .queues
            .lock()
            .snapshot()
            .into_iter()
            .map(|(queue, message)| (queue, message.id))
            .collect();
        self.inner
            .persistence
            .sync(&keys, |queue, id| self.inner.queues.lock().get(queue, id))
            .await
    }

    /// Remove dead letters whose quarantine has passed.
    pub async fn cleanup_dead_letters(&self) -> usize {
        if !self.inner.config.get().dead_letter.enabled {
            return 0;
        }
        let expired = self.inner.dead_letters.expire(Utc::now());
        for letter in &expired {
            self.inner.persistence.remove_dead_letter(&letter.id).await;
        }
        if !expired.is_empty() {
            info!("Removed {} expired dead letters", expired.len());
        }
        expired.len()
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
