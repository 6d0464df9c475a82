//! Message definition.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message priority levels.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    Critical = 3,
}

/// Kind of message, used to route it to a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Status,
    Command,
    Response,
    Error,
    Heartbeat,
    Data,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::Status,
        MessageType::Command,
        MessageType::Response,
        MessageType::Error,
        MessageType::Heartbeat,
        MessageType::Data,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Status => "status",
            MessageType::Command => "command",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Data => "data",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a message is in the delivery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting in a named queue.
    Queued,
    /// Handed to a processor in the current batch.
    Processing,
    /// Processed successfully and removed.
    Completed,
    /// Waiting out a backoff delay before re-enqueue.
    Retrying,
    /// Moved to the dead letter set.
    DeadLettered,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryState::Queued => write!(f, "queued"),
            DeliveryState::Processing => write!(f, "processing"),
            DeliveryState::Completed => write!(f, "completed"),
            DeliveryState::Retrying => write!(f, "retrying"),
            DeliveryState::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// A unit of work flowing through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID. Generated when absent.
    #[serde(default = "generate_id")]
    pub id: String,
    /// Creation time. Defaults to now when absent.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub priority: MessagePriority,
    pub source: String,
    pub destination: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Time to live in milliseconds, measured from `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    /// Per-message retry ceiling. `None` inherits `delivery.max_retries`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Mirror this message to the durable store.
    #[serde(default = "default_persistent")]
    pub persistent: bool,
    #[serde(default)]
    pub ordered: bool,
    /// Per-queue sequence, assigned at enqueue for `ordered` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_persistent() -> bool {
    true
}

impl Message {
    /// Create a new message.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: generate_id(),
            timestamp: Utc::now(),
            priority: MessagePriority::Medium,
            source: source.into(),
            destination: destination.into(),
            message_type,
            payload,
            headers: BTreeMap::new(),
            ttl_ms: None,
            retry_count: 0,
            max_retries: None,
            correlation_id: None,
            reply_to: None,
            persistent: true,
            ordered: false,
            sequence: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Cap retries below the queue-wide limit.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Request a per-queue sequence number.
    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    /// Keep this message in memory only.
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// Milliseconds elapsed since `timestamp` (0 for future timestamps).
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.timestamp).num_milliseconds().max(0) as u64
    }

    /// Whether the TTL has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => self.age_ms(now) > ttl,
            None => false,
        }
    }

    /// Size of the JSON encoding in bytes.
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }

    /// Retry ceiling once the queue-wide limit is applied. A message without
    /// its own ceiling uses `queue_max`.
    pub fn effective_max_retries(&self, queue_max: u32) -> u32 {
        self.max_retries.map_or(queue_max, |max| max.min(queue_max))
    }
}
