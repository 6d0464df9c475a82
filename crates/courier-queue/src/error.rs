//! Queue errors.

use courier_config::ConfigError;
use thiserror::Error;

/// Why the validator refused a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// A required field is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Serialized message exceeds `performance.max_message_size`.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The message outlived its TTL.
    #[error("message expired: age {age_ms}ms exceeds ttl {ttl_ms}ms")]
    MessageExpired { age_ms: u64, ttl_ms: u64 },

    /// Retry count is above the configured ceiling.
    #[error("retries exhausted: {retry_count} > {max_retries}")]
    RetriesExhausted { retry_count: u32, max_retries: u32 },
}

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Message rejected by the validator.
    #[error("Validation failed: {0}")]
    Validation(#[from] RejectReason),

    /// Named queue is at capacity.
    #[error("Queue '{queue}' is full (capacity {capacity})")]
    QueueFull { queue: String, capacity: usize },

    /// A message with this id is already queued or awaiting a retry.
    #[error("Message '{id}' is already in queue '{queue}'")]
    Duplicate { queue: String, id: String },

    /// Queue is already running.
    #[error("Queue is already running")]
    AlreadyRunning,

    /// Queue is not running.
    #[error("Queue is not running")]
    NotRunning,

    /// Durable store error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record encode/decode error.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A processor handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl QueueError {
    /// Shorthand for handler-raised failures.
    pub fn handler(message: impl Into<String>) -> Self {
        QueueError::Handler(message.into())
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full_display() {
        let err = QueueError::QueueFull {
            queue: "ops".to_string(),
            capacity: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("ops"));
        assert!(msg.contains("5"));
    }

    #[test]
    fn test_reject_reason_converts() {
        let err: QueueError = RejectReason::MissingField("source").into();
        assert!(matches!(err, QueueError::Validation(RejectReason::MissingField("source"))));
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_expired_display() {
        let reason = RejectReason::MessageExpired {
            age_ms: 1500,
            ttl_ms: 1000,
        };
        assert!(reason.to_string().contains("1500"));
        assert!(reason.to_string().contains("1000"));
    }
}
