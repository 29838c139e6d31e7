//! Durable write-ahead storage for outbox rows.
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use dotcelery_model::OutboxMessage;
use dotcelery_model::OutboxStatus;
use dotcelery_model::TaskMessage;

/// Storage backing the outbox dispatcher.
///
/// `enqueue` must allocate a strictly monotonic `sequence_number`; the dispatcher relies on
/// that ordering, not on wall-clock time, to keep publish order deterministic.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Stage `message` for dispatch, allocating the next `sequence_number`.
    async fn enqueue(&self, message: TaskMessage) -> Result<OutboxMessage>;

    /// Read up to `batch_size` `Pending` rows, ordered ascending by `sequence_number`.
    async fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>>;

    /// Mark a row dispatched after a successful publish.
    async fn mark_dispatched(&self, id: &str) -> Result<()>;

    /// Record a publish failure: increments `attempts`, sets `last_error`, and marks the row
    /// permanently `Failed` once `attempts >= max_attempts`.
    async fn mark_failed(&self, id: &str, error: String, max_attempts: u32) -> Result<()>;

    /// Remove `Dispatched`/`Failed` rows older than `retention`.
    async fn purge_older_than(&self, retention: std::time::Duration, now: DateTime<Utc>) -> Result<usize>;
}

/// In-memory [`OutboxStore`], the required test/local-dev variant.
#[derive(Default)]
pub struct MemoryOutboxStore {
    rows: tokio::sync::Mutex<Vec<OutboxMessage>>,
    next_sequence: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn enqueue(&self, message: TaskMessage) -> Result<OutboxMessage> {
        let sequence_number = self
            .next_sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let row = OutboxMessage::new(message, sequence_number);
        self.rows.lock().await.push(row.clone());
        Ok(row)
    }

    async fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| row.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.sequence_number);
        rows.truncate(batch_size);
        Ok(rows)
    }

    async fn mark_dispatched(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.status = OutboxStatus::Dispatched;
            row.dispatched_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: String, max_attempts: u32) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.attempts += 1;
            row.last_error = Some(error);
            if row.attempts >= max_attempts {
                row.status = OutboxStatus::Failed;
            }
        }
        Ok(())
    }

    async fn purge_older_than(&self, retention: std::time::Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| {
            let keep_pending = row.status == OutboxStatus::Pending;
            let age = now.signed_duration_since(row.created_at).to_std().unwrap_or_default();
            keep_pending || age < retention
        });
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> TaskMessage {
        TaskMessage::builder("demo.task", "default").finish().unwrap()
    }

    #[tokio::test]
    async fn enqueue_allocates_strictly_increasing_sequence_numbers() {
        let store = MemoryOutboxStore::default();
        let first = store.enqueue(message()).await.unwrap();
        let second = store.enqueue(message()).await.unwrap();
        assert!(second.sequence_number > first.sequence_number);
    }

    #[tokio::test]
    async fn pending_rows_are_ordered_by_sequence_number() {
        let store = MemoryOutboxStore::default();
        let first = store.enqueue(message()).await.unwrap();
        let second = store.enqueue(message()).await.unwrap();
        store.mark_dispatched(&first.id).await.unwrap();
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn mark_failed_becomes_permanent_after_max_attempts() {
        let store = MemoryOutboxStore::default();
        let row = store.enqueue(message()).await.unwrap();
        for _ in 0..5 {
            store.mark_failed(&row.id, "boom".into(), 5).await.unwrap();
        }
        let rows = store.rows.lock().await;
        let stored = rows.iter().find(|stored| stored.id == row.id).unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.attempts, 5);
    }
}
