//! End-to-end tests running the background loops against real stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use courier_queue::config::{ConfigStore, QueueConfig};
use courier_queue::{
    FileMessageStore, Message, MessageHandler, MessagePriority, MessageProcessor, MessageQueue,
    MessageType, QueueError, RecordCodec,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Handler that counts calls and answers with a fixed result.
struct CountingHandler {
    calls: Arc<AtomicU32>,
    succeed: bool,
}

impl CountingHandler {
    fn new(succeed: bool) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: calls.clone(),
                succeed,
            },
            calls,
        )
    }
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, _message: &Message) -> Result<bool, QueueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.succeed)
    }
}

fn fast_config(storage: &TempDir) -> QueueConfig {
    let mut config = QueueConfig::default();
    config.persistence.storage_path = storage.path().to_path_buf();
    config.persistence.sync_interval_ms = 50;
    config.performance.processing_interval_ms = 20;
    config.delivery.max_retries = 2;
    config.delivery.retry_delay_ms = 100;
    config.delivery.backoff_multiplier = 2.0;
    config
}

async fn file_queue(config: QueueConfig, codec: RecordCodec) -> MessageQueue {
    let store = FileMessageStore::new(&config.persistence.storage_path, codec)
        .await
        .unwrap();
    MessageQueue::new(ConfigStore::in_memory(config), Arc::new(store))
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn restart_command() -> Message {
    Message::new("relay", "ops", MessageType::Command, json!({"cmd": "restart"}))
        .with_id("m1")
        .with_priority(MessagePriority::High)
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_always_failing_handler_dead_letters_after_max_retries() {
    let storage = TempDir::new().unwrap();
    let queue = file_queue(fast_config(&storage), RecordCodec::plain()).await;
    let (handler, calls) = CountingHandler::new(false);
    queue.add_processor(MessageProcessor::new("always-fails", Arc::new(handler)));

    queue.enqueue(restart_command(), "ops").await.unwrap();
    queue.start().unwrap();

    wait_until(|| !queue.dead_letter_messages().is_empty()).await;
    queue.stop().await.unwrap();

    let letters = queue.dead_letter_messages();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].message.id, "m1");
    assert_eq!(letters[0].retry_count, 2);
    assert_eq!(letters[0].queue, "ops");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.queue_depth("ops"), 0);

    // The queued record is gone and the dead letter is on disk.
    assert!(!storage.path().join("queues/ops/m1.json").exists());
    let dead_letter_file = storage
        .path()
        .join("dead_letter")
        .join(format!("{}.json", letters[0].id));
    assert!(dead_letter_file.exists());
}

#[tokio::test]
async fn test_running_queue_delivers_to_processor() {
    let storage = TempDir::new().unwrap();
    let mut config = fast_config(&storage);
    config.delivery.guaranteed_delivery = true;
    let queue = file_queue(config, RecordCodec::plain()).await;
    let (handler, calls) = CountingHandler::new(true);
    queue.add_processor(
        MessageProcessor::new("heartbeats", Arc::new(handler)).accepting([MessageType::Heartbeat]),
    );

    queue.start().unwrap();
    for i in 0..3 {
        let beat = Message::new("agent", "monitor", MessageType::Heartbeat, json!({"n": i}));
        queue.enqueue(beat, "health").await.unwrap();
    }

    wait_until(|| calls.load(Ordering::SeqCst) == 3).await;
    wait_until(|| queue.pending_acknowledgments().is_empty()).await;
    queue.stop().await.unwrap();

    assert_eq!(queue.queue_depth("health"), 0);
    assert_eq!(queue.metrics().processed_messages, 3);
}

#[tokio::test]
async fn test_replayed_message_is_delivered() {
    let storage = TempDir::new().unwrap();
    let queue = file_queue(fast_config(&storage), RecordCodec::plain()).await;
    let (failing, _) = CountingHandler::new(false);
    queue.add_processor(MessageProcessor::new("p", Arc::new(failing)));

    queue.enqueue(restart_command(), "ops").await.unwrap();
    queue.start().unwrap();
    wait_until(|| !queue.dead_letter_messages().is_empty()).await;

    // Swap in a processor that succeeds, then replay.
    let (ok, calls) = CountingHandler::new(true);
    queue.add_processor(MessageProcessor::new("p", Arc::new(ok)));
    let letter_id = queue.dead_letter_messages()[0].id.clone();
    assert!(queue.replay_dead_letter(&letter_id).await.unwrap());

    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
    queue.stop().await.unwrap();
    assert!(queue.dead_letter_messages().is_empty());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_restart_recovers_queued_messages() {
    let storage = TempDir::new().unwrap();
    let config = fast_config(&storage);

    let first = file_queue(config.clone(), RecordCodec::plain()).await;
    first.start().unwrap();
    first.enqueue(restart_command(), "ops").await.unwrap();
    first
        .enqueue(
            Message::new("reporter", "dash", MessageType::Status, json!({"cpu": 0.7})),
            "status",
        )
        .await
        .unwrap();
    first
        .enqueue(
            Message::new("reporter", "dash", MessageType::Status, json!({})).transient(),
            "status",
        )
        .await
        .unwrap();
    first.stop().await.unwrap();

    let second = file_queue(config, RecordCodec::plain()).await;
    let stats = second.recover().await;

    assert_eq!(stats.messages, 2);
    assert_eq!(second.queue_depth("ops"), 1);
    assert_eq!(second.queue_depth("status"), 1);
    let recovered = second.dequeue("ops").await.unwrap();
    assert_eq!(recovered.id, "m1");
    assert_eq!(recovered.priority, MessagePriority::High);
}

#[tokio::test]
async fn test_restart_recovers_look_alike_ids() {
    let storage = TempDir::new().unwrap();
    let config = fast_config(&storage);

    let first = file_queue(config.clone(), RecordCodec::plain()).await;
    for id in ["job.1", "job_1", "a/b", "a_b"] {
        let message = Message::new("relay", "ops", MessageType::Command, json!({"id": id}))
            .with_id(id);
        first.enqueue(message, "ops").await.unwrap();
    }
    assert_eq!(first.queue_depth("ops"), 4);

    let second = file_queue(config, RecordCodec::plain()).await;
    assert_eq!(second.recover().await.messages, 4);
    let mut ids: Vec<String> = second.peek("ops", 10).into_iter().map(|m| m.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["a/b", "a_b", "job.1", "job_1"]);
}

#[tokio::test]
async fn test_stop_keeps_pending_retry_records() {
    let storage = TempDir::new().unwrap();
    let mut config = fast_config(&storage);
    config.delivery.max_retries = 3;
    config.delivery.retry_delay_ms = 60_000;

    let first = file_queue(config.clone(), RecordCodec::plain()).await;
    let (handler, calls) = CountingHandler::new(false);
    first.add_processor(MessageProcessor::new("fails", Arc::new(handler)));
    first.enqueue(restart_command(), "ops").await.unwrap();
    first.start().unwrap();

    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
    wait_until(|| first.pending_retries() == 1).await;
    first.stop().await.unwrap();
    assert_eq!(first.pending_retries(), 0);

    let second = file_queue(config, RecordCodec::plain()).await;
    second.recover().await;
    let recovered = second.dequeue("ops").await.unwrap();
    assert_eq!(recovered.retry_count, 1);
}

#[tokio::test]
async fn test_dead_letters_survive_restart() {
    let storage = TempDir::new().unwrap();
    let mut config = fast_config(&storage);
    config.delivery.max_retries = 1;

    let first = file_queue(config.clone(), RecordCodec::plain()).await;
    first.add_processor(MessageProcessor::from_fn("fails", |_m| async { Ok(false) }));
    first.enqueue(restart_command(), "ops").await.unwrap();
    first.process_pending().await;
    let letter = first.dead_letter_messages().remove(0);

    let second = file_queue(config, RecordCodec::plain()).await;
    let stats = second.recover().await;
    assert_eq!(stats.dead_letters, 1);
    assert_eq!(stats.messages, 0);
    assert_eq!(second.dead_letter_messages()[0].id, letter.id);

    assert!(second.replay_dead_letter(&letter.id).await.unwrap());
    assert_eq!(second.queue_depth("ops"), 1);
}

#[tokio::test]
async fn test_encrypted_store_round_trip() {
    let storage = TempDir::new().unwrap();
    let mut config = fast_config(&storage);
    config.persistence.compression = true;
    config.persistence.encryption = true;
    let codec = RecordCodec::plain()
        .with_compression(true)
        .with_passphrase("correct horse battery staple");

    let first = file_queue(config.clone(), codec.clone()).await;
    first.enqueue(restart_command(), "ops").await.unwrap();

    let raw = std::fs::read(storage.path().join("queues/ops/m1.json.gz.enc")).unwrap();
    assert!(!String::from_utf8_lossy(&raw).contains("restart"));

    let second = file_queue(config, codec).await;
    assert_eq!(second.recover().await.messages, 1);
    assert_eq!(
        second.dequeue("ops").await.unwrap().payload,
        json!({"cmd": "restart"})
    );
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_config_updates_persist_to_file() {
    let storage = TempDir::new().unwrap();
    let config_path = storage.path().join("courier.toml");
    std::fs::write(
        &config_path,
        format!(
            "[persistence]\nstorage_path = {:?}\n\n[delivery]\nmax_retries = 5\n",
            storage.path().join("data")
        ),
    )
    .unwrap();

    let queue = MessageQueue::open(ConfigStore::open(&config_path).unwrap())
        .await
        .unwrap();
    assert_eq!(queue.config().delivery.max_retries, 5);

    queue
        .update_config(json!({"delivery": {"max_retries": 7}}))
        .unwrap();

    let reloaded = ConfigStore::open(&config_path).unwrap();
    assert_eq!(reloaded.get().delivery.max_retries, 7);
    assert!(storage.path().join("data/queues").is_dir());
}
