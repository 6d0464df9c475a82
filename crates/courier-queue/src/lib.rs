//! # Courier Queue
//!
//! Durable in-process message queue.
//!
//! ## Features
//!
//! - Named priority queues with per-queue capacity
//! - Push delivery to registered processors, or pull with `dequeue`
//! - Retry with exponential backoff and dead lettering
//! - Crash recovery from a file store (optionally gzipped and encrypted)
//! - Delivery acknowledgments, metrics and health

pub mod codec;
pub mod dead_letter;
mod delivery;
pub mod engine;
pub mod error;
pub mod health;
mod lifecycle;
pub mod message;
pub mod metrics;
pub mod persistence;
pub mod processor;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod validator;

pub use codec::RecordCodec;
pub use dead_letter::{DeadLetterManager, DeadLetterMessage};
pub use delivery::{HANDLER_RETURNED_FAILURE, MESSAGE_EXPIRED};
pub use engine::{MessageQueue, RecoveryStats};
pub use error::{QueueError, QueueResult, RejectReason};
pub use health::{ComponentHealth, HealthReport, HealthStatus};
pub use message::{DeliveryState, Message, MessagePriority, MessageType};
pub use metrics::{MetricsCollector, QueueMetrics};
pub use processor::{FnHandler, MessageHandler, MessageProcessor, ProcessorInfo, ProcessorRegistry};
pub use queue::{DEFAULT_QUEUE, QueueStore};
pub use scheduler::{RetryScheduler, ScheduledRetry, backoff_delay};
pub use store::{FileMessageStore, MemoryMessageStore, MessageStore, StoredMessage};
pub use validator::{MessageValidator, ValidationOutcome};

pub use courier_config as config;
