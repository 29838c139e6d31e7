//! The durable task envelope and its broker delivery wrapper.
use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Error returned when a [`TaskMessage`] is built with inconsistent fields.
#[derive(Debug, thiserror::Error)]
pub enum InvalidTaskMessage {
    /// `retries` is greater than `maxRetries`.
    #[error("retries ({retries}) exceeds maxRetries ({max_retries})")]
    RetriesExceedMax { retries: u32, max_retries: u32 },

    /// `expires` is not strictly after `eta` when both are set.
    #[error("expires must be after eta")]
    ExpiresBeforeEta,
}

/// The durable work envelope carried by the broker between producer and worker.
///
/// Invariants: `retries <= maxRetries`;
/// `expires > eta` when both are set; `priority` is clamped to `[0, 9]`; `id` is stable
/// across retries (a retry republishes the same `id` with an incremented `retries`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub task: String,
    pub args: Vec<u8>,
    pub content_type: String,
    pub queue: String,
    pub timestamp: DateTime<Utc>,
    pub eta: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub retries: u32,
    pub max_retries: u32,
    pub priority: u8,
    pub correlation_id: Option<String>,
    pub parent_id: Option<String>,
    pub root_id: Option<String>,
    pub tenant_id: Option<String>,
    pub partition_key: Option<String>,
    pub headers: HashMap<String, String>,
    pub batch_id: Option<String>,
    pub schema_version: u32,
}

impl TaskMessage {
    /// Begin building a new [`TaskMessage`] for the given task name and queue.
    pub fn builder(task: impl Into<String>, queue: impl Into<String>) -> TaskMessageBuilder {
        TaskMessageBuilder::new(task, queue)
    }

    /// Produce a copy of this message for a retry: same `id`, `retries + 1` (or unchanged
    /// when `do_not_increment_retries` is set) and a cleared `eta`.
    pub fn for_retry(&self, do_not_increment_retries: bool) -> TaskMessage {
        let mut retried = self.clone();
        if !do_not_increment_retries {
            retried.retries += 1;
        }
        retried.eta = None;
        retried.timestamp = Utc::now();
        retried
    }
}

/// Incrementally build a [`TaskMessage`], validating invariants on [`finish`](Self::finish).
pub struct TaskMessageBuilder {
    id: String,
    task: String,
    args: Vec<u8>,
    content_type: String,
    queue: String,
    timestamp: DateTime<Utc>,
    eta: Option<DateTime<Utc>>,
    expires: Option<DateTime<Utc>>,
    retries: u32,
    max_retries: u32,
    priority: u8,
    correlation_id: Option<String>,
    parent_id: Option<String>,
    root_id: Option<String>,
    tenant_id: Option<String>,
    partition_key: Option<String>,
    headers: HashMap<String, String>,
    batch_id: Option<String>,
    schema_version: u32,
}

impl TaskMessageBuilder {
    fn new(task: impl Into<String>, queue: impl Into<String>) -> Self {
        TaskMessageBuilder {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            args: Vec::new(),
            content_type: String::from("application/json"),
            queue: queue.into(),
            timestamp: Utc::now(),
            eta: None,
            expires: None,
            retries: 0,
            max_retries: 3,
            priority: 5,
            correlation_id: None,
            parent_id: None,
            root_id: None,
            tenant_id: None,
            partition_key: None,
            headers: HashMap::new(),
            batch_id: None,
            schema_version: 1,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn args(mut self, args: Vec<u8>) -> Self {
        self.args = args;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Priority is clamped to `[0, 9]` rather than rejected, as an invariant.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(9);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn parent_id(mut self, id: impl Into<String>) -> Self {
        self.parent_id = Some(id.into());
        self
    }

    pub fn root_id(mut self, id: impl Into<String>) -> Self {
        self.root_id = Some(id.into());
        self
    }

    pub fn tenant_id(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn batch_id(mut self, id: impl Into<String>) -> Self {
        self.batch_id = Some(id.into());
        self
    }

    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Validate invariants and build the final [`TaskMessage`].
    pub fn finish(self) -> Result<TaskMessage, InvalidTaskMessage> {
        if self.retries > self.max_retries {
            return Err(InvalidTaskMessage::RetriesExceedMax {
                retries: self.retries,
                max_retries: self.max_retries,
            });
        }
        if let (Some(eta), Some(expires)) = (self.eta, self.expires) {
            if expires <= eta {
                return Err(InvalidTaskMessage::ExpiresBeforeEta);
            }
        }
        Ok(TaskMessage {
            id: self.id,
            task: self.task,
            args: self.args,
            content_type: self.content_type,
            queue: self.queue,
            timestamp: self.timestamp,
            eta: self.eta,
            expires: self.expires,
            retries: self.retries,
            max_retries: self.max_retries,
            priority: self.priority,
            correlation_id: self.correlation_id,
            parent_id: self.parent_id,
            root_id: self.root_id,
            tenant_id: self.tenant_id,
            partition_key: self.partition_key,
            headers: self.headers,
            batch_id: self.batch_id,
            schema_version: self.schema_version,
        })
    }
}

/// Transport delivery: a [`TaskMessage`] wrapped with an opaque, broker-specific delivery tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub message: TaskMessage,

    /// Opaque token the broker uses to identify this outstanding delivery.
    pub delivery_tag: String,

    /// Queue this delivery was received from (may differ from `message.queue` on requeue).
    pub queue: String,

    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_retries_past_max() {
        let mut builder = TaskMessageBuilder::new("math.add", "default");
        builder.max_retries = 1;
        builder.retries = 2;
        assert!(matches!(
            builder.finish(),
            Err(InvalidTaskMessage::RetriesExceedMax { .. })
        ));
    }

    #[test]
    fn rejects_expires_before_eta() {
        let now = Utc::now();
        let result = TaskMessage::builder("math.add", "default")
            .eta(now + chrono::Duration::seconds(10))
            .expires(now)
            .finish();
        assert!(matches!(result, Err(InvalidTaskMessage::ExpiresBeforeEta)));
    }

    #[test]
    fn priority_is_clamped() {
        let message = TaskMessage::builder("math.add", "default")
            .priority(42)
            .finish()
            .unwrap();
        assert_eq!(message.priority, 9);
    }

    #[test]
    fn retry_preserves_id_and_bumps_retries() {
        let message = TaskMessage::builder("math.add", "default")
            .eta(Utc::now() + chrono::Duration::seconds(5))
            .finish()
            .unwrap();
        let retried = message.for_retry(false);
        assert_eq!(retried.id, message.id);
        assert_eq!(retried.retries, message.retries + 1);
        assert!(retried.eta.is_none());

        let retried_no_increment = message.for_retry(true);
        assert_eq!(retried_no_increment.retries, message.retries);
    }
}
