//! Builds a [`TaskMessage`] from `(input, SendOptions)` and submits it.
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use dotcelery_model::Broker;
use dotcelery_model::ResultBackendHandle;
use dotcelery_model::TaskMessage;
use dotcelery_outbox::OutboxStore;

use crate::async_result::AsyncResult;
use crate::options::SendOptions;

/// Producer-side entry point: submits tasks and returns a handle to their eventual result.
#[derive(Clone)]
pub struct Client {
    broker: Arc<dyn Broker>,
    outbox: Option<Arc<dyn OutboxStore>>,
    result_backend: ResultBackendHandle,
}

impl Client {
    pub fn new(broker: Arc<dyn Broker>, result_backend: ResultBackendHandle) -> Client {
        Client {
            broker,
            outbox: None,
            result_backend,
        }
    }

    /// Route every submission that opts into `SendOptions::via_outbox` through `outbox`
    /// instead of publishing directly to the broker.
    pub fn with_outbox(mut self, outbox: Arc<dyn OutboxStore>) -> Client {
        self.outbox = Some(outbox);
        self
    }

    /// Build a [`TaskMessage`] from `input` and `options`, submit it, and return a handle to
    /// its result.
    pub async fn send<T, R>(&self, task: impl Into<String>, queue: impl Into<String>, input: &T, options: SendOptions) -> Result<AsyncResult<R>>
    where
        T: Serialize,
    {
        options.validate(Utc::now())?;

        let args = serde_json::to_vec(input)?;
        let mut builder = TaskMessage::builder(task, queue).args(args);
        if let Some(priority) = options.priority {
            builder = builder.priority(priority);
        }
        if let Some(max_retries) = options.max_retries {
            builder = builder.max_retries(max_retries);
        }
        let eta = options.eta.or_else(|| {
            options
                .countdown
                .map(|countdown| Utc::now() + chrono::Duration::from_std(countdown).unwrap_or_default())
        });
        if let Some(eta) = eta {
            builder = builder.eta(eta);
        }
        if let Some(expires) = options.expires {
            builder = builder.expires(expires);
        }
        if let Some(correlation_id) = options.correlation_id {
            builder = builder.correlation_id(correlation_id);
        }
        if let Some(parent_id) = options.parent_id {
            builder = builder.parent_id(parent_id);
        }
        if let Some(root_id) = options.root_id {
            builder = builder.root_id(root_id);
        }
        if let Some(tenant_id) = options.tenant_id {
            builder = builder.tenant_id(tenant_id);
        }
        if let Some(partition_key) = options.partition_key {
            builder = builder.partition_key(partition_key);
        }
        if let Some(batch_id) = options.batch_id {
            builder = builder.batch_id(batch_id);
        }
        for (key, value) in options.headers {
            builder = builder.header(key, value);
        }
        let message = builder.finish()?;
        let task_id = message.id.clone();

        match &self.outbox {
            Some(outbox) if options.via_outbox => {
                outbox.enqueue(message).await?;
            }
            _ => {
                self.broker.publish(message).await?;
            }
        }

        Ok(AsyncResult::new(task_id, self.result_backend.clone()))
    }
}

#[cfg(test)]
mod tests {
    use dotcelery_memory::MemoryBroker;
    use dotcelery_memory::MemoryResultBackend;
    use dotcelery_model::JsonSerializer;
    use dotcelery_model::Serializer;
    use dotcelery_model::TaskResult;

    use super::*;

    #[tokio::test]
    async fn send_publishes_directly_to_the_broker_by_default() {
        let broker = Arc::new(MemoryBroker::new());
        let backend = ResultBackendHandle::new(MemoryResultBackend::new());
        let client = Client::new(broker.clone(), backend);

        let result: AsyncResult<serde_json::Value> = client
            .send("demo.task", "default", &serde_json::json!({"a": 1}), SendOptions::new())
            .await
            .unwrap();

        let delivery = broker.consume(&["default".to_string()], 1).await.unwrap();
        assert_eq!(delivery.message.id, result.task_id());
    }

    #[tokio::test]
    async fn send_rejects_invalid_options() {
        let broker = Arc::new(MemoryBroker::new());
        let backend = ResultBackendHandle::new(MemoryResultBackend::new());
        let client = Client::new(broker, backend);

        let result = client
            .send::<_, ()>("demo.task", "default", &serde_json::json!({}), SendOptions::new().priority(42))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_deserializes_a_successful_result() {
        let broker = Arc::new(MemoryBroker::new());
        let backend = ResultBackendHandle::new(MemoryResultBackend::new());
        let client = Client::new(broker, backend.clone());

        let result: AsyncResult<u64> = client.send("demo.task", "default", &serde_json::json!({}), SendOptions::new()).await.unwrap();

        let payload = JsonSerializer.serialize(&serde_json::json!(42)).unwrap();
        backend
            .store(TaskResult::success(result.task_id().to_string(), payload, std::time::Duration::from_millis(1)), None)
            .await
            .unwrap();

        let value = result.get(Some(std::time::Duration::from_secs(1))).await.unwrap();
        assert_eq!(value, 42);
    }
}
