//! External collaborator interfaces consumed by the core: the broker, the
//! result backend and the payload serializer. Each is a plain `async_trait` object behind a
//! cheap `Clone`-able newtype wrapping the respective `*Backend` trait.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::message::BrokerMessage;
use crate::message::TaskMessage;
use crate::result::TaskResult;
use crate::result::TaskState;

/// Durable submit/consume/ack interface implemented by Message Queue Platforms.
///
/// Requirements: at-least-once delivery, per-delivery tag uniqueness,
/// reject-with-requeue returns the message to another consumer, prefetch applies per consumer.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Durable submit to `message.queue`.
    async fn publish(&self, message: TaskMessage) -> Result<()>;

    /// Fetch the next delivery for one of the given queues, applying `prefetch` per consumer.
    async fn consume(&self, queues: &[String], prefetch: usize) -> Result<BrokerMessage>;

    /// Ack once per delivery.
    async fn ack(&self, message: &BrokerMessage) -> Result<()>;

    /// Reject a delivery; `requeue` controls whether it becomes available to other consumers.
    async fn reject(&self, message: &BrokerMessage, requeue: bool) -> Result<()>;

    /// Cheap liveness probe used by the worker to decide whether to keep retrying.
    async fn is_healthy(&self) -> bool;
}

/// Persistence for terminal (and in-flight) [`TaskResult`]s.
#[async_trait]
pub trait ResultBackend: Send + Sync {
    async fn store(&self, result: TaskResult, expiry: Option<Duration>) -> Result<()>;
    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>>;
    async fn wait_for(&self, task_id: &str, timeout: Option<Duration>) -> Result<TaskResult>;
    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()>;
    async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>>;
}

#[async_trait]
impl<T: ResultBackend + ?Sized> ResultBackend for Arc<T> {
    async fn store(&self, result: TaskResult, expiry: Option<Duration>) -> Result<()> {
        (**self).store(result, expiry).await
    }
    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>> {
        (**self).get(task_id).await
    }
    async fn wait_for(&self, task_id: &str, timeout: Option<Duration>) -> Result<TaskResult> {
        (**self).wait_for(task_id, timeout).await
    }
    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()> {
        (**self).update_state(task_id, state, metadata).await
    }
    async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>> {
        (**self).get_state(task_id).await
    }
}

/// A shared, cloneable handle to a [`ResultBackend`] implementation.
#[derive(Clone)]
pub struct ResultBackendHandle(Arc<dyn ResultBackend>);

impl ResultBackendHandle {
    pub fn new(backend: impl ResultBackend + 'static) -> Self {
        ResultBackendHandle(Arc::new(backend))
    }

    /// Wrap an already-shared backend, so callers can keep their own handle to it (for
    /// example, a test that wants to inspect stored rows after the fact).
    pub fn from_arc(backend: Arc<dyn ResultBackend>) -> Self {
        ResultBackendHandle(backend)
    }

    pub async fn store(&self, result: TaskResult, expiry: Option<Duration>) -> Result<()> {
        self.0.store(result, expiry).await
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskResult>> {
        self.0.get(task_id).await
    }

    pub async fn wait_for(&self, task_id: &str, timeout: Option<Duration>) -> Result<TaskResult> {
        self.0.wait_for(task_id, timeout).await
    }

    pub async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()> {
        self.0.update_state(task_id, state, metadata).await
    }

    pub async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>> {
        self.0.get_state(task_id).await
    }
}

/// Payload codec used to translate between opaque bytes and structured values.
///
/// Failures from either direction are classified by callers as `DeserializationFailed`.
pub trait Serializer: Send + Sync {
    fn content_type(&self) -> &str;
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// Default JSON payload codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_serializer_round_trips() {
        let codec = JsonSerializer;
        let value = serde_json::json!({"a": 1, "b": "two"});
        let bytes = codec.serialize(&value).unwrap();
        let decoded = codec.deserialize(&bytes).unwrap();
        assert_eq!(value, decoded);
    }
}
