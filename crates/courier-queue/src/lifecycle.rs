//! Background loops and start/stop.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::MessageQueue;
use crate::error::{QueueError, QueueResult};

/// Longest the retry loop sleeps with nothing scheduled.
const IDLE_RETRY_WAIT: Duration = Duration::from_secs(3600);

/// Handles of a started queue.
pub(crate) struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MessageQueue {
    /// Start the background loops.
    ///
    /// Processing and retries always run. The sync loop runs only with
    /// persistence enabled, and the cleanup loop only with dead lettering
    /// and auto cleanup enabled.
    pub fn start(&self) -> QueueResult<()> {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            return Err(QueueError::AlreadyRunning);
        }

        let config = self.inner.config.get();
        let token = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(self.spawn_periodic(
            "processing",
            token.clone(),
            |q| q.config().performance.processing_interval(),
            |q| async move {
                q.process_pending().await;
            },
        ));

        if self.inner.persistence.is_enabled() {
            tasks.push(self.spawn_periodic(
                "sync",
                token.clone(),
                |q| q.config().persistence.sync_interval(),
                |q| async move {
                    q.sync_to_store().await;
                },
            ));
        }

        if config.dead_letter.enabled && config.dead_letter.auto_cleanup {
            tasks.push(self.spawn_periodic(
                "cleanup",
                token.clone(),
                |q| q.config().dead_letter.cleanup_interval(),
                |q| async move {
                    q.cleanup_dead_letters().await;
                },
            ));
        }

        tasks.push(self.spawn_retry_loop(token.clone()));

        info!("Message queue started with {} background loops", tasks.len());
        *running = Some(Running { token, tasks });
        Ok(())
    }

    /// Stop the background loops, cancel pending retries and run a final
    /// sync.
    ///
    /// Cancelled retries keep their durable records and come back on the
    /// next [`recover`](Self::recover).
    pub async fn stop(&self) -> QueueResult<()> {
        let running = self.inner.running.lock().take();
        let Some(Running { token, tasks }) = running else {
            return Err(QueueError::NotRunning);
        };

        token.cancel();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("Background loop ended abnormally: {}", e);
            }
        }

        let cancelled = self.inner.retries.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} pending retries", cancelled);
        }

        let synced = self.sync_to_store().await;
        info!("Message queue stopped ({} messages synced)", synced);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Run `tick` every `interval(queue)` until cancelled. The interval is
    /// re-read before each sleep so config updates apply.
    fn spawn_periodic<I, T, F>(
        &self,
        name: &'static str,
        token: CancellationToken,
        interval: I,
        tick: T,
    ) -> JoinHandle<()>
    where
        I: Fn(&MessageQueue) -> Duration + Send + 'static,
        T: Fn(MessageQueue) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let queue = self.clone();
        tokio::spawn(async move {
            debug!("{} loop started", name);
            loop {
                let wait = interval(&queue);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        tick(queue.clone()).await;
                    }
                }
            }
            debug!("{} loop stopped", name);
        })
    }

    fn spawn_retry_loop(&self, token: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            debug!("retry loop started");
            loop {
                for entry in queue.inner.retries.take_due(Instant::now()) {
                    queue.requeue(entry).await;
                }

                let wake_at = queue
                    .inner
                    .retries
                    .next_due()
                    .unwrap_or_else(|| Instant::now() + IDLE_RETRY_WAIT);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(wake_at) => {}
                    _ = queue.inner.retries.changed() => {}
                }
            }
            debug!("retry loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_config::QueueConfig;

    fn fast_config() -> QueueConfig {
        let mut config = QueueConfig::default();
        config.persistence.enabled = false;
        config.performance.processing_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let queue = MessageQueue::in_memory(fast_config());
        queue.start().unwrap();
        assert!(queue.is_running());
        assert!(matches!(queue.start(), Err(QueueError::AlreadyRunning)));
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_fails() {
        let queue = MessageQueue::in_memory(fast_config());
        assert!(matches!(queue.stop().await, Err(QueueError::NotRunning)));

        queue.start().unwrap();
        queue.stop().await.unwrap();
        assert!(!queue.is_running());
        assert!(matches!(queue.stop().await, Err(QueueError::NotRunning)));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let queue = MessageQueue::in_memory(fast_config());
        queue.start().unwrap();
        queue.stop().await.unwrap();
        queue.start().unwrap();
        assert!(queue.is_running());
        queue.stop().await.unwrap();
    }
}
