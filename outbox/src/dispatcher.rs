//! Background service that publishes pending outbox rows in `sequence_number` order.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use dotcelery_context::Context;
use dotcelery_model::Broker;

use crate::store::OutboxStore;

/// Polls an [`OutboxStore`] and publishes pending rows, batch-bounded and ordered ascending by
/// `sequence_number`.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn Broker>,
    dispatch_interval: Duration,
    cleanup_interval: Duration,
    retention_period: Duration,
    batch_size: usize,
    max_attempts: u32,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn Broker>,
        dispatch_interval: Duration,
        cleanup_interval: Duration,
        retention_period: Duration,
        batch_size: usize,
        max_attempts: u32,
    ) -> Self {
        OutboxDispatcher {
            store,
            broker,
            dispatch_interval,
            cleanup_interval,
            retention_period,
            batch_size,
            max_attempts,
        }
    }

    /// Run the dispatch and cleanup loops until `shutdown` is cancelled.
    pub async fn run(&self, ctx: &Context, shutdown: &CancellationToken) {
        let mut since_cleanup = Duration::ZERO;
        while !shutdown.is_cancelled() {
            self.dispatch_cycle(ctx).await;

            since_cleanup += self.dispatch_interval;
            if since_cleanup >= self.cleanup_interval {
                self.cleanup_cycle(ctx).await;
                since_cleanup = Duration::ZERO;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.dispatch_interval) => {}
            }
        }
    }

    /// Publish one batch of pending rows, preserving `sequence_number` order within the batch.
    async fn dispatch_cycle(&self, ctx: &Context) {
        let pending = match self.store.pending(self.batch_size).await {
            Ok(pending) => pending,
            Err(error) => {
                slog::warn!(ctx.logger, "failed to read pending outbox rows"; "error" => %error);
                return;
            }
        };

        for row in pending {
            match self.broker.publish(row.task_message.clone()).await {
                Ok(()) => {
                    let _ = self.store.mark_dispatched(&row.id).await;
                }
                Err(error) => {
                    slog::warn!(
                        ctx.logger, "failed to dispatch outbox row";
                        "outbox_id" => &row.id, "task_id" => &row.task_message.id, "error" => %error,
                    );
                    let _ = self
                        .store
                        .mark_failed(&row.id, error.to_string(), self.max_attempts)
                        .await;
                }
            }
        }
    }

    async fn cleanup_cycle(&self, ctx: &Context) {
        match self.store.purge_older_than(self.retention_period, Utc::now()).await {
            Ok(purged) if purged > 0 => {
                slog::debug!(ctx.logger, "purged stale outbox rows"; "count" => purged);
            }
            Ok(_) => {}
            Err(error) => {
                slog::warn!(ctx.logger, "failed to purge stale outbox rows"; "error" => %error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dotcelery_model::BrokerMessage;
    use dotcelery_model::TaskMessage;

    use super::*;
    use crate::store::MemoryOutboxStore;

    #[derive(Default)]
    struct RecordingBroker {
        published: Mutex<Vec<TaskMessage>>,
        fail_ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn publish(&self, message: TaskMessage) -> anyhow::Result<()> {
            if self.fail_ids.lock().unwrap().contains(&message.id) {
                anyhow::bail!("simulated broker outage");
            }
            self.published.lock().unwrap().push(message);
            Ok(())
        }
        async fn consume(&self, _queues: &[String], _prefetch: usize) -> anyhow::Result<BrokerMessage> {
            unimplemented!()
        }
        async fn ack(&self, _message: &BrokerMessage) -> anyhow::Result<()> {
            Ok(())
        }
        async fn reject(&self, _message: &BrokerMessage, _requeue: bool) -> anyhow::Result<()> {
            Ok(())
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    fn message(id: &str) -> TaskMessage {
        TaskMessage::builder("demo.task", "default").id(id).finish().unwrap()
    }

    #[tokio::test]
    async fn dispatches_in_sequence_order() {
        let store = Arc::new(MemoryOutboxStore::default());
        store.enqueue(message("t2")).await.unwrap();
        store.enqueue(message("t1")).await.unwrap();
        let broker = Arc::new(RecordingBroker::default());
        let dispatcher = OutboxDispatcher::new(
            store.clone(),
            broker.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
            Duration::from_secs(60),
            10,
            5,
        );
        dispatcher.dispatch_cycle(&Context::fixture()).await;

        let published = broker.published.lock().unwrap();
        assert_eq!(published.iter().map(|m| m.id.clone()).collect::<Vec<_>>(), vec!["t2", "t1"]);
    }

    #[tokio::test]
    async fn publish_failure_increments_attempts() {
        let store = Arc::new(MemoryOutboxStore::default());
        let row = store.enqueue(message("t1")).await.unwrap();
        let broker = Arc::new(RecordingBroker::default());
        broker.fail_ids.lock().unwrap().push("t1".into());
        let dispatcher = OutboxDispatcher::new(
            store.clone(),
            broker.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
            Duration::from_secs(60),
            10,
            5,
        );
        for _ in 0..5 {
            dispatcher.dispatch_cycle(&Context::fixture()).await;
        }
        let pending = store.pending(10).await.unwrap();
        assert!(pending.iter().all(|r| r.id != row.id));
    }
}
