//! Single-process in-memory broker: a reference `Broker` for local development
//! and tests, backed by per-queue deques kept in priority order.
use std::collections::HashMap;
use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::Notify;

use dotcelery_model::Broker;
use dotcelery_model::BrokerMessage;
use dotcelery_model::TaskMessage;

/// An in-memory, single-process [`Broker`].
///
/// Messages within a queue are delivered in priority order (ties broken by arrival order);
/// `reject(requeue=true)` appends the delivered message back to the tail of its originating
/// queue, so another consumer may pick it up.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<TaskMessage>>>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::default()
    }

    async fn enqueue(&self, message: TaskMessage) {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(message.queue.clone()).or_default();
        let position = queue.iter().position(|queued| queued.priority < message.priority).unwrap_or(queue.len());
        queue.insert(position, message);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, message: TaskMessage) -> Result<()> {
        self.enqueue(message).await;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queues: &[String], _prefetch: usize) -> Result<BrokerMessage> {
        loop {
            {
                let mut held = self.queues.lock().await;
                for queue_name in queues {
                    if let Some(message) = held.get_mut(queue_name).and_then(VecDeque::pop_front) {
                        return Ok(BrokerMessage {
                            message,
                            delivery_tag: uuid::Uuid::new_v4().to_string(),
                            queue: queue_name.clone(),
                            received_at: chrono::Utc::now(),
                        });
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, _message: &BrokerMessage) -> Result<()> {
        Ok(())
    }

    async fn reject(&self, message: &BrokerMessage, requeue: bool) -> Result<()> {
        if requeue {
            let mut held = self.queues.lock().await;
            held.entry(message.queue.clone()).or_default().push_back(message.message.clone());
            drop(held);
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use dotcelery_model::TaskMessage;

    use super::*;

    fn message(queue: &str, priority: u8) -> TaskMessage {
        TaskMessage::builder("demo.task", queue).priority(priority).finish().unwrap()
    }

    #[tokio::test]
    async fn higher_priority_is_delivered_first() {
        let broker = MemoryBroker::new();
        broker.publish(message("default", 1)).await.unwrap();
        broker.publish(message("default", 9)).await.unwrap();

        let first = broker.consume(&["default".to_string()], 1).await.unwrap();
        assert_eq!(first.message.priority, 9);
        let second = broker.consume(&["default".to_string()], 1).await.unwrap();
        assert_eq!(second.message.priority, 1);
    }

    #[tokio::test]
    async fn rejected_with_requeue_is_redelivered() {
        let broker = MemoryBroker::new();
        broker.publish(message("default", 5)).await.unwrap();
        let delivery = broker.consume(&["default".to_string()], 1).await.unwrap();
        broker.reject(&delivery, true).await.unwrap();

        let redelivered = broker.consume(&["default".to_string()], 1).await.unwrap();
        assert_eq!(redelivered.message.id, delivery.message.id);
    }

    #[tokio::test]
    async fn rejected_without_requeue_is_dropped() {
        let broker = MemoryBroker::new();
        broker.publish(message("default", 5)).await.unwrap();
        let delivery = broker.consume(&["default".to_string()], 1).await.unwrap();
        broker.reject(&delivery, false).await.unwrap();

        let held = broker.queues.lock().await;
        assert!(held.get("default").map(|q| q.is_empty()).unwrap_or(true));
    }
}
