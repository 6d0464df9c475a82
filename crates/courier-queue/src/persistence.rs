//! Best-effort mirroring of queue state to a [`MessageStore`].
//!
//! Durable I/O never fails a queue operation: errors are logged and the
//! in-memory state stays authoritative. Writes are serialized so a sync pass
//! cannot resurrect a record that was deleted while it ran.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::dead_letter::DeadLetterMessage;
use crate::message::Message;
use crate::store::{MessageStore, StoredMessage};

/// Persistence front end used by the engine.
pub struct PersistenceManager {
    store: Arc<dyn MessageStore>,
    enabled: bool,
    writes: Mutex<()>,
}

impl PersistenceManager {
    pub fn new(store: Arc<dyn MessageStore>, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            writes: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write one message if persistence is on and the message is persistent.
    pub async fn persist(&self, queue: &str, message: &Message) {
        if !self.enabled || !message.persistent {
            return;
        }
        let _write = self.writes.lock().await;
        if let Err(e) = self.store.save_message(queue, message).await {
            error!("Failed to persist message {}: {}", message.id, e);
        }
    }

    /// Delete a message record.
    pub async fn remove(&self, queue: &str, id: &str) {
        if !self.enabled {
            return;
        }
        let _write = self.writes.lock().await;
        if let Err(e) = self.store.delete_message(queue, id).await {
            error!("Failed to delete message record {}: {}", id, e);
        }
    }

    pub async fn persist_dead_letter(&self, letter: &DeadLetterMessage) {
        if !self.enabled {
            return;
        }
        let _write = self.writes.lock().await;
        if let Err(e) = self.store.save_dead_letter(letter).await {
            error!("Failed to persist dead letter {}: {}", letter.id, e);
        }
    }

    pub async fn remove_dead_letter(&self, id: &str) {
        if !self.enabled {
            return;
        }
        let _write = self.writes.lock().await;
        if let Err(e) = self.store.delete_dead_letter(id).await {
            error!("Failed to delete dead letter record {}: {}", id, e);
        }
    }

    /// Everything stored, or nothing if loading fails.
    pub async fn load(&self) -> (Vec<StoredMessage>, Vec<DeadLetterMessage>) {
        if !self.enabled {
            return (Vec::new(), Vec::new());
        }
        let messages = self.store.load_messages().await.unwrap_or_else(|e| {
            error!("Failed to load stored messages: {}", e);
            Vec::new()
        });
        let letters = self.store.load_dead_letters().await.unwrap_or_else(|e| {
            error!("Failed to load dead letters: {}", e);
            Vec::new()
        });
        (messages, letters)
    }

    /// Rewrite every live persistent message. Returns how many were written.
    ///
    /// `current` is asked for the live copy of each `(queue, id)` while the
    /// write lock is held; messages that are gone by then are skipped.
    pub async fn sync<F>(&self, keys: &[(String, String)], current: F) -> usize
    where
        F: Fn(&str, &str) -> Option<Message>,
    {
        if !self.enabled {
            return 0;
        }
        let mut written = 0;
        for (queue, id) in keys {
            let _write = self.writes.lock().await;
            let Some(message) = current(queue, id) else {
                continue;
            };
            if !message.persistent {
                continue;
            }
            match self.store.save_message(queue, &message).await {
                Ok(()) => written += 1,
                Err(e) => error!("Sync failed for message {}: {}", message.id, e),
            }
        }
        debug!("Synced {} messages to store", written);
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::store::MemoryMessageStore;
    use serde_json::json;

    fn msg(id: &str) -> Message {
        Message::new("a", "b", MessageType::Data, json!({})).with_id(id)
    }

    #[tokio::test]
    async fn test_persist_respects_flags() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = PersistenceManager::new(store.clone(), true);

        manager.persist("q", &msg("keep")).await;
        manager.persist("q", &msg("skip").transient()).await;
        assert_eq!(store.message_count().await, 1);

        let disabled = PersistenceManager::new(store.clone(), false);
        disabled.persist("q", &msg("other")).await;
        disabled.remove("q", "keep").await;
        assert_eq!(store.message_count().await, 1);
        assert!(disabled.load().await.0.is_empty());
    }

    #[tokio::test]
    async fn test_sync_writes_live_persistent_only() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = PersistenceManager::new(store.clone(), true);

        let live = vec![
            ("q".to_string(), msg("one")),
            ("q".to_string(), msg("two").transient()),
            ("r".to_string(), msg("three")),
        ];
        let mut keys: Vec<(String, String)> = live
            .iter()
            .map(|(q, m)| (q.clone(), m.id.clone()))
            .collect();
        keys.push(("q".to_string(), "gone".to_string()));

        let current = |queue: &str, id: &str| {
            live.iter()
                .find(|(q, m)| q == queue && m.id == id)
                .map(|(_, m)| m.clone())
        };

        assert_eq!(manager.sync(&keys, current).await, 2);
        // Idempotent overwrite.
        assert_eq!(manager.sync(&keys, current).await, 2);
        assert_eq!(store.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_load_returns_messages_and_letters() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = PersistenceManager::new(store, true);

        manager.persist("q", &msg("m1")).await;
        let letter = DeadLetterMessage::new(
            "q",
            msg("m2"),
            "boom",
            std::time::Duration::from_secs(1),
            chrono::Utc::now(),
        );
        manager.persist_dead_letter(&letter).await;

        let (messages, letters) = manager.load().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(letters.len(), 1);

        manager.remove_dead_letter(&letter.id).await;
        assert!(manager.load().await.1.is_empty());
    }
}
