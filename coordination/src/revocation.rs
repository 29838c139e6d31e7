//! Revocation requests checked by the executor before running a task.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use dotcelery_model::RevocationRecord;

/// An emitted revocation, broadcast so in-flight workers can signal cancellation to a matching
/// task.
#[derive(Clone, Debug, PartialEq)]
pub struct RevocationEvent {
    pub task_id: String,
    pub terminate: bool,
    pub signal: Option<String>,
}

/// Persists revocation requests and answers `isRevoked` checks.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn revoke(
        &self,
        task_id: &str,
        terminate: bool,
        signal: Option<String>,
        expiry: Duration,
    ) -> Result<()>;
    async fn is_revoked(&self, task_id: &str) -> Result<bool>;
    async fn get(&self, task_id: &str) -> Result<Option<RevocationRecord>>;
}

/// A shared handle to a [`RevocationStore`] plus the in-process broadcast channel backing
/// [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct RevocationHandle {
    store: Arc<dyn RevocationStore>,
    events: tokio::sync::broadcast::Sender<RevocationEvent>,
}

impl RevocationHandle {
    pub fn new(store: impl RevocationStore + 'static) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(256);
        RevocationHandle {
            store: Arc::new(store),
            events,
        }
    }

    pub async fn revoke(&self, task_id: &str, terminate: bool, signal: Option<String>, expiry: Duration) -> Result<()> {
        self.store.revoke(task_id, terminate, signal.clone(), expiry).await?;
        let _ = self.events.send(RevocationEvent {
            task_id: task_id.to_string(),
            terminate,
            signal,
        });
        Ok(())
    }

    pub async fn is_revoked(&self, task_id: &str) -> Result<bool> {
        self.store.is_revoked(task_id).await
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<RevocationRecord>> {
        self.store.get(task_id).await
    }

    /// An asynchronous stream of revocation events, for a worker to signal cancellation to
    /// in-flight tasks matching the id.
    pub fn subscribe(&self) -> impl Stream<Item = RevocationEvent> {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| item.ok())
    }
}

/// Simple in-memory [`RevocationStore`], shipped as the required test/local-dev
/// in-memory variant.
#[derive(Default)]
pub struct MemoryRevocationStore {
    rows: tokio::sync::Mutex<std::collections::HashMap<String, RevocationRecord>>,
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, task_id: &str, terminate: bool, signal: Option<String>, expiry: Duration) -> Result<()> {
        let now = Utc::now();
        let record = RevocationRecord {
            task_id: task_id.to_string(),
            terminate,
            signal,
            revoked_at: now,
            expires_at: now + chrono::Duration::from_std(expiry).unwrap_or_default(),
        };
        self.rows.lock().await.insert(task_id.to_string(), record);
        Ok(())
    }

    async fn is_revoked(&self, task_id: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .rows
            .lock()
            .await
            .get(task_id)
            .map(|record| !record.is_expired(now))
            .unwrap_or(false))
    }

    async fn get(&self, task_id: &str) -> Result<Option<RevocationRecord>> {
        Ok(self.rows.lock().await.get(task_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn revoked_task_is_reported() {
        let handle = RevocationHandle::new(MemoryRevocationStore::default());
        assert!(!handle.is_revoked("t1").await.unwrap());
        handle.revoke("t1", true, None, Duration::from_secs(60)).await.unwrap();
        assert!(handle.is_revoked("t1").await.unwrap());
    }

    #[tokio::test]
    async fn subscribers_observe_revocation_events() {
        let handle = RevocationHandle::new(MemoryRevocationStore::default());
        let mut stream = Box::pin(handle.subscribe());
        handle
            .revoke("t1", false, Some("SIGTERM".into()), Duration::from_secs(60))
            .await
            .unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.task_id, "t1");
        assert_eq!(event.signal.as_deref(), Some("SIGTERM"));
    }
}
