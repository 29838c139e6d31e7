//! Background service that republishes due delayed messages onto the broker.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use dotcelery_context::Context;
use dotcelery_model::Broker;

use crate::store::DelayedEnvelope;
use crate::store::DelayedMessageStore;

/// Polls a [`DelayedMessageStore`] and republishes due messages, sleeping between cycles just
/// long enough not to busy-poll while still firing imminent deliveries promptly.
pub struct DelayedDispatcher {
    store: Arc<dyn DelayedMessageStore>,
    broker: Arc<dyn Broker>,
    poll_interval: Duration,
    retry_interval: Duration,
}

impl DelayedDispatcher {
    pub fn new(
        store: Arc<dyn DelayedMessageStore>,
        broker: Arc<dyn Broker>,
        poll_interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        DelayedDispatcher {
            store,
            broker,
            poll_interval,
            retry_interval,
        }
    }

    /// Run the dispatch loop until `shutdown` is cancelled.
    pub async fn run(&self, ctx: &Context, shutdown: &CancellationToken) {
        while !shutdown.is_cancelled() {
            self.cycle(ctx).await;

            let next_delivery = self.store.next_delivery_at().await.ok().flatten();
            let sleep_for = match next_delivery {
                Some(at) => {
                    let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    remaining.min(self.poll_interval)
                }
                None => self.poll_interval,
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    async fn cycle(&self, ctx: &Context) {
        let due = match self.store.take_due(Utc::now()).await {
            Ok(due) => due,
            Err(error) => {
                slog::warn!(ctx.logger, "failed to read due delayed messages"; "error" => %error);
                return;
            }
        };

        for envelope in due {
            self.dispatch_one(ctx, envelope).await;
        }
    }

    async fn dispatch_one(&self, ctx: &Context, envelope: DelayedEnvelope) {
        let mut message = envelope.message.clone();
        message.eta = None;
        match self.broker.publish(message).await {
            Ok(()) => {}
            Err(error) => {
                slog::warn!(
                    ctx.logger, "failed to republish delayed message, re-scheduling";
                    "task_id" => &envelope.message.id, "error" => %error,
                );
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(self.retry_interval).unwrap_or_default();
                let retried = DelayedEnvelope {
                    delivery_at: retry_at,
                    ..envelope
                };
                let _ = self.store.insert(retried).await;
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
    use crate::store::MemoryDelayStore;

    #[derive(Default)]
    struct RecordingBroker {
        published: Mutex<Vec<TaskMessage>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn publish(&self, message: TaskMessage) -> anyhow::Result<()> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
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
        TaskMessage::builder("demo.task", "default")
            .id(id)
            .eta(Utc::now() + chrono::Duration::seconds(30))
            .finish()
            .unwrap()
    }

    #[tokio::test]
    async fn due_messages_are_republished_with_eta_cleared() {
        let store = Arc::new(MemoryDelayStore::default());
        let broker = Arc::new(RecordingBroker::default());
        store
            .insert(DelayedEnvelope::new(message("t1"), Utc::now() - chrono::Duration::seconds(1)))
            .await
            .unwrap();

        let dispatcher = DelayedDispatcher::new(
            store.clone(),
            broker.clone(),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        dispatcher.cycle(&Context::fixture()).await;

        let published = broker.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert!(published[0].eta.is_none());
    }

    #[tokio::test]
    async fn publish_failure_reinserts_with_retry_interval() {
        let store = Arc::new(MemoryDelayStore::default());
        let broker = Arc::new(RecordingBroker::default());
        broker.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);
        store
            .insert(DelayedEnvelope::new(message("t1"), Utc::now() - chrono::Duration::seconds(1)))
            .await
            .unwrap();

        let dispatcher = DelayedDispatcher::new(
            store.clone(),
            broker.clone(),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        dispatcher.cycle(&Context::fixture()).await;

        assert!(broker.published.lock().unwrap().is_empty());
        let next = store.next_delivery_at().await.unwrap().unwrap();
        assert!(next > Utc::now() + chrono::Duration::seconds(4));
    }
}
