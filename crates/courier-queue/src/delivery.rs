//! Batch delivery to processors.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::Utc;
use courier_config::QueueConfig;
use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::engine::MessageQueue;
use crate::message::{DeliveryState, Message};
use crate::scheduler::{ScheduledRetry, backoff_delay};

/// Dead-letter reason for a handler that returned `Ok(false)`.
pub const HANDLER_RETURNED_FAILURE: &str = "handler returned failure";

/// Failure reason for a message whose TTL passed while it was queued.
pub const MESSAGE_EXPIRED: &str = "message expired";

/// What happened to one message in a batch.
#[derive(Debug)]
enum Outcome {
    Success(Duration),
    Failure(String),
    NoProcessor(String),
}

fn panic_text(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

impl MessageQueue {
    /// Run one processing tick over every named queue.
    ///
    /// Each queue hands out up to `performance.batch_size` messages which are
    /// dispatched together and awaited together. Returns the number of
    /// messages attempted. Does nothing when `delivery.enabled` is off.
    pub async fn process_pending(&self) -> usize {
        let config = self.inner.config.get();
        if !config.delivery.enabled {
            return 0;
        }

        let mut attempted = 0;
        for queue in self.queue_names() {
            attempted += self.process_queue(&queue, &config).await;
        }

        self.inner.metrics.recompute();
        attempted
    }

    async fn process_queue(&self, queue: &str, config: &QueueConfig) -> usize {
        let batch = self
            .inner
            .queues
            .lock()
            .begin_batch(queue, config.performance.batch_size);
        if batch.is_empty() {
            return 0;
        }
        debug!("Processing {} messages from '{}'", batch.len(), queue);

        let now = Utc::now();
        let dispatch = batch.into_iter().map(|message| {
            let processor = self.inner.processors.resolve(&message);
            async move {
                if message.is_expired(now) {
                    return (message, Outcome::Failure(MESSAGE_EXPIRED.to_string()));
                }
                let Some(processor) = processor else {
                    let reason = format!("no processor for message type '{}'", message.message_type);
                    return (message, Outcome::NoProcessor(reason));
                };

                let start = Instant::now();
                let result = AssertUnwindSafe(processor.handler.handle(&message))
                    .catch_unwind()
                    .await;
                let outcome = match result {
                    Ok(Ok(true)) => Outcome::Success(start.elapsed()),
                    Ok(Ok(false)) => Outcome::Failure(HANDLER_RETURNED_FAILURE.to_string()),
                    Ok(Err(e)) => Outcome::Failure(e.to_string()),
                    Err(panic) => Outcome::Failure(panic_text(panic)),
                };
                (message, outcome)
            }
        });

        let results = join_all(dispatch).await;
        let attempted = results.len();
        for (message, outcome) in results {
            self.apply_outcome(queue, message, outcome, config).await;
        }
        attempted
    }

    async fn apply_outcome(
        &self,
        queue: &str,
        message: Message,
        outcome: Outcome,
        config: &QueueConfig,
    ) {
        let still_queued = {
            let mut queues = self.inner.queues.lock();
            let removed = queues.remove(queue, &message.id).is_some();
            self.inner.metrics.set_queue_depth(queues.total_depth());
            removed
        };
        if !still_queued {
            // Cleared while in flight; the clear already dropped its record.
            debug!("Message {} left '{}' during delivery, dropping outcome", message.id, queue);
            return;
        }

        match outcome {
            Outcome::Success(elapsed) => {
                self.inner.persistence.remove(queue, &message.id).await;
                self.inner.pending_acks.lock().remove(&message.id);
                self.inner.metrics.record_processed(elapsed);
                debug!(
                    "Message {} {} in {:?}",
                    message.id,
                    DeliveryState::Completed,
                    elapsed
                );
            }
            Outcome::NoProcessor(reason) => {
                self.dead_letter(queue, message, &reason, config).await;
            }
            Outcome::Failure(reason) => {
                self.inner.metrics.record_failed();
                self.retry_or_dead_letter(queue, message, &reason, config).await;
            }
        }
    }

    async fn retry_or_dead_letter(
        &self,
        queue: &str,
        mut message: Message,
        reason: &str,
        config: &QueueConfig,
    ) {
        message.retry_count += 1;
        let ceiling = message.effective_max_retries(config.delivery.max_retries);

        if message.retry_count >= ceiling {
            self.dead_letter(queue, message, reason, config).await;
            return;
        }

        let delay = backoff_delay(
            config.delivery.retry_delay_ms,
            config.delivery.backoff_multiplier,
            message.retry_count,
        );
        warn!(
            "Message {} failed ({}), {} retry {}/{} in {:?}",
            message.id,
            reason,
            DeliveryState::Retrying,
            message.retry_count,
            ceiling,
            delay
        );
        // The record carries the new retry count so a restart resumes the
        // budget instead of resetting it.
        self.inner.persistence.persist(queue, &message).await;
        self.inner.retries.schedule(queue, message, delay);
    }

    /// Quarantine `message`, or drop it when dead lettering is disabled.
    /// The message must already be out of its queue.
    pub(crate) async fn dead_letter(
        &self,
        queue: &str,
        message: Message,
        reason: &str,
        config: &QueueConfig,
    ) {
        let id = message.id.clone();

        if config.dead_letter.enabled {
            let letter = self.inner.dead_letters.quarantine(
                queue,
                message,
                reason,
                config.dead_letter.quarantine_period(),
            );
            self.inner.persistence.persist_dead_letter(&letter).await;
            self.inner.metrics.record_dead_lettered();
        } else {
            warn!(
                "Dead lettering is disabled; dropping message {} from '{}': {}",
                id, queue, reason
            );
        }

        self.inner.persistence.remove(queue, &id).await;
    }

    /// Re-enqueue a retry through the validated path, dead-lettering it if
    /// it is rejected.
    pub(crate) async fn requeue(&self, entry: ScheduledRetry) {
        let ScheduledRetry { queue, message, .. } = entry;
        let fallback = message.clone();

        match self.admit(message, &queue).await {
            Ok(id) => debug!("Retry of {} re-entered '{}'", id, queue),
            Err(e) => {
                let config = self.inner.config.get();
                self.dead_letter(&queue, fallback, &e.to_string(), &config).await;
            }
        }
    }

    /// Re-enqueue every pending retry now, ignoring backoff. Returns how
    /// many were re-enqueued.
    pub async fn flush_retries(&self) -> usize {
        let entries = self.inner.retries.drain();
        let count = entries.len();
        for entry in entries {
            self.requeue(entry).await;
        }
        count
    }

    /// Retries waiting out their backoff.
    pub fn pending_retries(&self) -> usize {
        self.inner.retries.len()
    }
}
