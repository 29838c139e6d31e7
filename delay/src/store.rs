//! Durable storage for messages scheduled to be published in the future.
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use dotcelery_model::TaskMessage;

/// A [`TaskMessage`] parked until `delivery_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelayedEnvelope {
    pub id: String,
    pub message: TaskMessage,
    pub delivery_at: DateTime<Utc>,
}

impl DelayedEnvelope {
    pub fn new(message: TaskMessage, delivery_at: DateTime<Utc>) -> Self {
        DelayedEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            message,
            delivery_at,
        }
    }
}

/// Storage backing the delayed-message dispatcher.
///
/// `due` and `next_delivery_at` are both needed by the dispatcher's sleep calculation
///`).
#[async_trait]
pub trait DelayedMessageStore: Send + Sync {
    async fn insert(&self, envelope: DelayedEnvelope) -> Result<()>;

    /// Remove and return envelopes with `delivery_at <= now`.
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<DelayedEnvelope>>;

    /// Earliest `delivery_at` currently stored, if any.
    async fn next_delivery_at(&self) -> Result<Option<DateTime<Utc>>>;
}

/// In-memory [`DelayedMessageStore`], the required test/local-dev variant.
#[derive(Default)]
pub struct MemoryDelayStore {
    rows: tokio::sync::Mutex<Vec<DelayedEnvelope>>,
}

#[async_trait]
impl DelayedMessageStore for MemoryDelayStore {
    async fn insert(&self, envelope: DelayedEnvelope) -> Result<()> {
        self.rows.lock().await.push(envelope);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<DelayedEnvelope>> {
        let mut rows = self.rows.lock().await;
        let (due, pending): (Vec<_>, Vec<_>) =
            rows.drain(..).partition(|row| row.delivery_at <= now);
        *rows = pending;
        Ok(due)
    }

    async fn next_delivery_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.rows.lock().await.iter().map(|row| row.delivery_at).min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> TaskMessage {
        TaskMessage::builder("demo.task", "default").finish().unwrap()
    }

    #[tokio::test]
    async fn take_due_only_removes_elapsed_entries() {
        let store = MemoryDelayStore::default();
        let now = Utc::now();
        store
            .insert(DelayedEnvelope::new(message(), now - chrono::Duration::seconds(1)))
            .await
            .unwrap();
        store
            .insert(DelayedEnvelope::new(message(), now + chrono::Duration::seconds(60)))
            .await
            .unwrap();

        let due = store.take_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(store.next_delivery_at().await.unwrap().is_some(), true);
    }
}
