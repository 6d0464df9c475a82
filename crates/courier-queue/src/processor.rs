//! Processor registry.
//!
//! Processors declare which message types they accept and a priority; the
//! first enabled processor that accepts a message handles it.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::message::{Message, MessageType};

/// Something that can process a message.
///
/// `Ok(true)` is success, `Ok(false)` a returned failure, and `Err` a raised
/// failure whose text becomes the dead-letter reason.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<bool, QueueError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, QueueError>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<bool, QueueError> {
        (self.0)(message.clone()).await
    }
}

/// A registered processor.
#[derive(Clone)]
pub struct MessageProcessor {
    pub id: String,
    pub name: String,
    /// Accepted message types. Empty accepts every type.
    pub accepts: HashSet<MessageType>,
    pub handler: Arc<dyn MessageHandler>,
    pub enabled: bool,
    /// Lower runs first.
    pub priority: i32,
}

impl MessageProcessor {
    pub fn new(id: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            accepts: HashSet::new(),
            handler,
            enabled: true,
            priority: 0,
        }
    }

    /// Build a processor from an async closure.
    pub fn from_fn<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, QueueError>> + Send + 'static,
    {
        Self::new(id, Arc::new(FnHandler::new(f)))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn accepting(mut self, types: impl IntoIterator<Item = MessageType>) -> Self {
        self.accepts.extend(types);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn accepts(&self, message_type: MessageType) -> bool {
        self.accepts.is_empty() || self.accepts.contains(&message_type)
    }

    pub fn info(&self) -> ProcessorInfo {
        let mut accepts: Vec<MessageType> = self.accepts.iter().copied().collect();
        accepts.sort_by_key(|t| t.as_str());
        ProcessorInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            accepts,
            enabled: self.enabled,
            priority: self.priority,
        }
    }
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("accepts", &self.accepts)
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Handler-free view of a processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorInfo {
    pub id: String,
    pub name: String,
    pub accepts: Vec<MessageType>,
    pub enabled: bool,
    pub priority: i32,
}

struct Registered {
    processor: MessageProcessor,
    seq: u64,
}

/// Registry for message processors.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: DashMap<String, Registered>,
    next_seq: AtomicU64,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor, replacing any processor with the same id.
    pub fn register(&self, processor: MessageProcessor) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        info!(
            "Registered processor '{}' (priority {}, accepts {:?})",
            processor.id, processor.priority, processor.accepts
        );
        self.processors.insert(
            processor.id.clone(),
            Registered { processor, seq },
        );
    }

    /// Remove a processor. Returns whether it existed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.processors.remove(id).is_some();
        if removed {
            info!("Unregistered processor '{}'", id);
        }
        removed
    }

    /// Enable or disable a processor. Returns whether it exists.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.processors.get_mut(id) {
            Some(mut entry) => {
                entry.processor.enabled = enabled;
                debug!("Processor '{}' enabled = {}", id, enabled);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Processors in resolution order.
    fn ordered(&self) -> Vec<MessageProcessor> {
        let mut entries: Vec<(i32, u64, MessageProcessor)> = self
            .processors
            .iter()
            .map(|e| (e.processor.priority, e.seq, e.processor.clone()))
            .collect();
        entries.sort_by_key(|(priority, seq, _)| (*priority, *seq));
        entries.into_iter().map(|(_, _, p)| p).collect()
    }

    pub fn list(&self) -> Vec<ProcessorInfo> {
        self.ordered().iter().map(MessageProcessor::info).collect()
    }

    /// First enabled processor accepting the message's type.
    pub fn resolve(&self, message: &Message) -> Option<MessageProcessor> {
        self.ordered()
            .into_iter()
            .find(|p| p.enabled && p.accepts(message.message_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok_processor(id: &str) -> MessageProcessor {
        MessageProcessor::from_fn(id, |_m| async { Ok(true) })
    }

    fn msg(t: MessageType) -> Message {
        Message::new("a", "b", t, json!(null))
    }

    #[test]
    fn test_empty_capabilities_accept_everything() {
        let p = ok_processor("any");
        for t in MessageType::ALL {
            assert!(p.accepts(t));
        }
    }

    #[test]
    fn test_resolve_by_priority_then_registration() {
        let registry = ProcessorRegistry::new();
        registry.register(ok_processor("late").with_priority(10));
        registry.register(ok_processor("first").with_priority(1));
        registry.register(ok_processor("second").with_priority(1));

        let resolved = registry.resolve(&msg(MessageType::Data)).unwrap();
        assert_eq!(resolved.id, "first");

        let ids: Vec<String> = registry.list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_resolve_skips_disabled_and_non_matching() {
        let registry = ProcessorRegistry::new();
        registry.register(ok_processor("cmd").accepting([MessageType::Command]));
        registry.register(ok_processor("status").accepting([MessageType::Status]).disabled());

        assert_eq!(registry.resolve(&msg(MessageType::Command)).unwrap().id, "cmd");
        assert!(registry.resolve(&msg(MessageType::Status)).is_none());

        assert!(registry.set_enabled("status", true));
        assert_eq!(registry.resolve(&msg(MessageType::Status)).unwrap().id, "status");
        assert!(!registry.set_enabled("missing", true));
    }

    #[test]
    fn test_register_replaces_same_id() {
        let registry = ProcessorRegistry::new();
        registry.register(ok_processor("p").accepting([MessageType::Data]));
        registry.register(ok_processor("p").accepting([MessageType::Error]).with_name("v2"));

        assert_eq!(registry.len(), 1);
        let info = &registry.list()[0];
        assert_eq!(info.name, "v2");
        assert_eq!(info.accepts, vec![MessageType::Error]);
    }

    #[test]
    fn test_unregister() {
        let registry = ProcessorRegistry::new();
        registry.register(ok_processor("p"));
        assert!(registry.unregister("p"));
        assert!(!registry.unregister("p"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_fn_handler_outcomes() {
        let fails = MessageProcessor::from_fn("f", |_m| async { Ok(false) });
        let raises =
            MessageProcessor::from_fn("r", |m| async move { Err(QueueError::handler(format!("bad {}", m.source))) });

        let m = msg(MessageType::Data);
        assert!(!fails.handler.handle(&m).await.unwrap());
        let err = raises.handler.handle(&m).await.unwrap_err();
        assert_eq!(err.to_string(), "Handler error: bad a");
    }
}
