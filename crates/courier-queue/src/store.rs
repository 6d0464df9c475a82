//! Durable message store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::codec::RecordCodec;
use crate::dead_letter::DeadLetterMessage;
use crate::error::QueueError;
use crate::message::Message;

/// A queued message as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Queue the message belongs to.
    pub queue: String,
    pub message: Message,
}

/// Store trait for queue persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Save or overwrite a queued message.
    async fn save_message(&self, queue: &str, message: &Message) -> Result<(), QueueError>;

    /// Delete a queued message. Deleting a missing record is not an error.
    async fn delete_message(&self, queue: &str, id: &str) -> Result<(), QueueError>;

    /// Load every queued message.
    async fn load_messages(&self) -> Result<Vec<StoredMessage>, QueueError>;

    /// Save or overwrite a dead letter.
    async fn save_dead_letter(&self, letter: &DeadLetterMessage) -> Result<(), QueueError>;

    /// Delete a dead letter.
    async fn delete_dead_letter(&self, id: &str) -> Result<(), QueueError>;

    /// Load every dead letter.
    async fn load_dead_letters(&self) -> Result<Vec<DeadLetterMessage>, QueueError>;
}

/// In-memory store for tests and persistence-disabled runs.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: tokio::sync::RwLock<HashMap<(String, String), Message>>,
    dead_letters: tokio::sync::RwLock<HashMap<String, DeadLetterMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored queued messages.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Number of stored dead letters.
    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.read().await.len()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save_message(&self, queue: &str, message: &Message) -> Result<(), QueueError> {
        let mut messages = self.messages.write().await;
        messages.insert((queue.to_string(), message.id.clone()), message.clone());
        Ok(())
    }

    async fn delete_message(&self, queue: &str, id: &str) -> Result<(), QueueError> {
        let mut messages = self.messages.write().await;
        messages.remove(&(queue.to_string(), id.to_string()));
        Ok(())
    }

    async fn load_messages(&self) -> Result<Vec<StoredMessage>, QueueError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .map(|((queue, _), message)| StoredMessage {
                queue: queue.clone(),
                message: message.clone(),
            })
            .collect())
    }

    async fn save_dead_letter(&self, letter: &DeadLetterMessage) -> Result<(), QueueError> {
        let mut letters = self.dead_letters.write().await;
        letters.insert(letter.id.clone(), letter.clone());
        Ok(())
    }

    async fn delete_dead_letter(&self, id: &str) -> Result<(), QueueError> {
        self.dead_letters.write().await.remove(id);
        Ok(())
    }

    async fn load_dead_letters(&self) -> Result<Vec<DeadLetterMessage>, QueueError> {
        Ok(self.dead_letters.read().await.values().cloned().collect())
    }
}

/// File system store.
///
/// Records are stored one per file:
/// ```text
/// {storage_path}/
/// ├── queues/
/// │   └── {queue}/
/// │       └── {message-id}.json
/// └── dead_letter/
///     └── {dead-letter-id}.json
/// ```
/// The extension follows the [`RecordCodec`] in use. Directory and file names
/// are escaped so distinct names never collide; the real queue name
/// and ids live inside each record.
pub struct FileMessageStore {
    storage_path: PathBuf,
    codec: RecordCodec,
}

impl FileMessageStore {
    /// Create a store rooted at `storage_path`, creating directories as needed.
    pub async fn new(
        storage_path: impl Into<PathBuf>,
        codec: RecordCodec,
    ) -> Result<Self, QueueError> {
        let storage_path = storage_path.into();

        for dir in ["queues", "dead_letter"] {
            fs::create_dir_all(storage_path.join(dir)).await.map_err(|e| {
                QueueError::Storage(format!("Failed to create {} directory: {}", dir, e))
            })?;
        }

        debug!("FileMessageStore initialized at {:?} ({:?})", storage_path, codec);

        Ok(Self {
            storage_path,
            codec,
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// File-system-safe name for a queue or record id.
    ///
    /// Lowercase ASCII letters, digits and `-` are kept; every other byte
    /// becomes `_` plus two lowercase hex digits. Distinct names never map to
    /// the same file, even on case-insensitive file systems.
    fn encode_name(name: &str) -> String {
        let mut encoded = String::with_capacity(name.len());
        for byte in name.bytes() {
            match byte {
                b'a'..=b'z' | b'0'..=b'9' | b'-' => encoded.push(byte as char),
                _ => encoded.push_str(&format!("_{:02x}", byte)),
            }
        }
        encoded
    }

    fn queues_dir(&self) -> PathBuf {
        self.storage_path.join("queues")
    }

    fn queue_dir(&self, queue: &str) -> PathBuf {
        self.queues_dir().join(Self::encode_name(queue))
    }

    fn dead_letter_dir(&self) -> PathBuf {
        self.storage_path.join("dead_letter")
    }

    fn record_name(&self, id: &str) -> String {
        format!("{}.{}", Self::encode_name(id), self.codec.extension())
    }

    /// Write `bytes` to a temp file next to `path`, then rename it into place.
    async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), QueueError> {
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("record")
        ));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to rename {:?}: {}", tmp, e)))
    }

    /// Remove every encoding of the record `id` in `dir`.
    async fn remove_record(dir: &Path, id: &str) -> Result<(), QueueError> {
        Self::remove_encodings(dir, id, None).await
    }

    /// Remove the encodings of `id` other than `keep`.
    async fn remove_encodings(dir: &Path, id: &str, keep: Option<&str>) -> Result<(), QueueError> {
        let stem = Self::encode_name(id);
        for ext in ["json", "json.gz", "json.enc", "json.gz.enc"] {
            if keep == Some(ext) {
                continue;
            }
            let path = dir.join(format!("{}.{}", stem, ext));
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Deleted record {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(QueueError::Storage(format!(
                        "Failed to delete {:?}: {}",
                        path, e
                    )));
                }
            }
        }
        Ok(())
    }

    /// Decode every record file in `dir`, skipping the ones that fail.
    async fn read_records<T: serde::de::DeserializeOwned>(
        &self,
        dir: &Path,
    ) -> Result<Vec<T>, QueueError> {
        let mut records = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => {
                return Err(QueueError::Storage(format!(
                    "Failed to read directory {:?}: {}",
                    dir, e
                )));
            }
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            QueueError::Storage(format!("Failed to read directory entry: {}", e))
        })? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !RecordCodec::is_record_file(name) {
                continue;
            }

            match fs::read(&path).await {
                Ok(bytes) => match self.codec.decode::<T>(name, &bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable record {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read record {:?}: {}", path, e),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn save_message(&self, queue: &str, message: &Message) -> Result<(), QueueError> {
        let dir = self.queue_dir(queue);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to create {:?}: {}", dir, e)))?;

        let record = StoredMessage {
            queue: queue.to_string(),
            message: message.clone(),
        };
        let bytes = self.codec.encode(&record)?;

        let path = dir.join(self.record_name(&message.id));
        Self::write_atomic(&path, bytes).await?;
        // A codec change leaves the old encoding behind.
        let ext = self.codec.extension();
        Self::remove_encodings(&dir, &message.id, Some(ext.as_str())).await?;

        debug!("Saved message '{}' to {:?}", message.id, path);
        Ok(())
    }

    async fn delete_message(&self, queue: &str, id: &str) -> Result<(), QueueError> {
        Self::remove_record(&self.queue_dir(queue), id).await
    }

    async fn load_messages(&self) -> Result<Vec<StoredMessage>, QueueError> {
        let mut messages = Vec::new();
        let mut dirs = match fs::read_dir(self.queues_dir()).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(messages),
            Err(e) => {
                return Err(QueueError::Storage(format!(
                    "Failed to read queues directory: {}",
                    e
                )));
            }
        };

        while let Some(entry) = dirs.next_entry().await.map_err(|e| {
            QueueError::Storage(format!("Failed to read directory entry: {}", e))
        })? {
            let path = entry.path();
            if path.is_dir() {
                messages.extend(self.read_records::<StoredMessage>(&path).await?);
            }
        }

        debug!("Loaded {} stored messages", messages.len());
        Ok(messages)
    }

    async fn save_dead_letter(&self, letter: &DeadLetterMessage) -> Result<(), QueueError> {
        let dir = self.dead_letter_dir();
        let bytes = self.codec.encode(letter)?;
        let path = dir.join(self.record_name(&letter.id));
        Self::write_atomic(&path, bytes).await?;
        let ext = self.codec.extension();
        Self::remove_encodings(&dir, &letter.id, Some(ext.as_str())).await?;
        debug!("Saved dead letter '{}' to {:?}", letter.id, path);
        Ok(())
    }

    async fn delete_dead_letter(&self, id: &str) -> Result<(), QueueError> {
        Self::remove_record(&self.dead_letter_dir(), id).await
    }

    async fn load_dead_letters(&self) -> Result<Vec<DeadLetterMessage>, QueueError> {
        let letters = self
            .read_records::<DeadLetterMessage>(&self.dead_letter_dir())
            .await?;
        debug!("Loaded {} dead letters", letters.len());
        Ok(letters)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
