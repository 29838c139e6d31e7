//! Exclusive, auto-expiring lock over a `partitionKey`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use dotcelery_errors::PartitionBusy;
use dotcelery_filters::Filter;
use dotcelery_filters::FilterContext;
use dotcelery_model::PartitionLock;

/// Canonical order of the built-in `PartitionedExecution` filter.
pub const ORDER: i32 = -1000;

/// CAS-on-holder store backing [`PartitionLock`] rows.
///
/// Implementations must auto-expire: a crashed holder must not block the partition beyond
/// `timeout`. `try_acquire` is idempotent for the current holder (re-entry by
/// the same task succeeds without disturbing the existing expiry).
#[async_trait]
pub trait PartitionLockStore: Send + Sync {
    /// Returns `true` iff the key had no unexpired holder, or the current holder is `holder_id`.
    async fn try_acquire(&self, key: &str, holder_id: &str, timeout: Duration) -> Result<bool>;

    /// CAS release: returns `true` iff `holder_id` held the lock (a no-op release is not an
    /// error.
    async fn release(&self, key: &str, holder_id: &str) -> Result<bool>;

    /// CAS extend: returns `true` iff `holder_id` held the lock and its expiry was extended.
    async fn extend(&self, key: &str, holder_id: &str, extension: Duration) -> Result<bool>;

    async fn is_locked(&self, key: &str) -> Result<bool>;

    async fn get_holder(&self, key: &str) -> Result<Option<PartitionLock>>;
}

/// A shared, cheaply cloneable handle to a [`PartitionLockStore`] implementation.
#[derive(Clone)]
pub struct PartitionLockHandle(Arc<dyn PartitionLockStore>);

impl PartitionLockHandle {
    pub fn new(store: impl PartitionLockStore + 'static) -> Self {
        PartitionLockHandle(Arc::new(store))
    }

    pub async fn try_acquire(&self, key: &str, holder_id: &str, timeout: Duration) -> Result<bool> {
        self.0.try_acquire(key, holder_id, timeout).await
    }

    pub async fn release(&self, key: &str, holder_id: &str) -> Result<bool> {
        self.0.release(key, holder_id).await
    }

    pub async fn extend(&self, key: &str, holder_id: &str, extension: Duration) -> Result<bool> {
        self.0.extend(key, holder_id, extension).await
    }

    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        self.0.is_locked(key).await
    }

    pub async fn get_holder(&self, key: &str) -> Result<Option<PartitionLock>> {
        self.0.get_holder(key).await
    }
}

const ACQUIRED_PROPERTY: &str = "__dotcelery_partition_acquired";

/// Acquires the partition lock on pre, releases it on post/exception.
///
/// When acquisition fails the filter requests a `Requeued` outcome instead of
/// surfacing an error, so the message returns to the broker rather than spinning on the lock.
pub struct PartitionedExecutionFilter {
    store: PartitionLockHandle,
    timeout: Duration,
    requeue_delay: Duration,
}

impl PartitionedExecutionFilter {
    pub fn new(store: PartitionLockHandle, timeout: Duration, requeue_delay: Duration) -> Self {
        PartitionedExecutionFilter {
            store,
            timeout,
            requeue_delay,
        }
    }
}

#[async_trait]
impl Filter for PartitionedExecutionFilter {
    fn name(&self) -> &str {
        "PartitionedExecution"
    }

    fn order(&self) -> i32 {
        ORDER
    }

    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let key = match &ctx.task.partition_key {
            Some(key) => key.clone(),
            None => return Ok(()),
        };
        let acquired = self
            .store
            .try_acquire(&key, &ctx.task.task_id, self.timeout)
            .await?;
        if acquired {
            ctx.properties
                .insert(ACQUIRED_PROPERTY.to_string(), serde_json::json!(true));
        } else {
            let holder_task_id = self
                .store
                .get_holder(&key)
                .await?
                .map(|lock| lock.holder_task_id)
                .unwrap_or_default();
            let busy = PartitionBusy {
                partition_key: key,
                holder_task_id,
                requeue_delay: self.requeue_delay,
            };
            slog::debug!(ctx.task.operation().logger, "partition busy, requeueing"; "error" => %busy);
            ctx.requeue(Some(self.requeue_delay));
        }
        Ok(())
    }

    async fn on_executed(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        self.release_if_held(ctx).await
    }

    async fn on_exception(&self, ctx: &mut FilterContext<'_>, _error: &anyhow::Error) -> Result<bool> {
        self.release_if_held(ctx).await?;
        Ok(false)
    }
}

impl PartitionedExecutionFilter {
    async fn release_if_held(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        if ctx.properties.remove(ACQUIRED_PROPERTY).is_none() {
            return Ok(());
        }
        if let Some(key) = &ctx.task.partition_key {
            self.store.release(key, &ctx.task.task_id).await?;
        }
        Ok(())
    }
}

/// Reference implementation note: auto-expiry is evaluated by comparing `Utc::now()` against
/// `PartitionLock::is_expired`; stores are free to implement this with any backing mechanism
/// as long as that comparison holds.
pub fn is_expired(lock: &PartitionLock) -> bool {
    lock.is_expired(Utc::now())
}

/// Simple in-memory [`PartitionLockStore`], shipped as the required test/local-dev
/// in-memory variant.
#[derive(Default)]
pub struct MemoryPartitionLockStore(std::sync::Mutex<std::collections::HashMap<String, PartitionLock>>);

#[async_trait]
impl PartitionLockStore for MemoryPartitionLockStore {
    async fn try_acquire(&self, key: &str, holder_id: &str, timeout: Duration) -> Result<bool> {
        let now = Utc::now();
        let mut guard = self.0.lock().unwrap();
        if let Some(existing) = guard.get(key) {
            if !existing.is_expired(now) && existing.holder_task_id != holder_id {
                return Ok(false);
            }
        }
        guard.insert(
            key.to_string(),
            PartitionLock {
                partition_key: key.to_string(),
                holder_task_id: holder_id.to_string(),
                acquired_at: now,
                expires_at: now + chrono::Duration::from_std(timeout).unwrap(),
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, holder_id: &str) -> Result<bool> {
        let mut guard = self.0.lock().unwrap();
        match guard.get(key) {
            Some(lock) if lock.holder_task_id == holder_id => {
                guard.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(&self, key: &str, holder_id: &str, extension: Duration) -> Result<bool> {
        let mut guard = self.0.lock().unwrap();
        match guard.get_mut(key) {
            Some(lock) if lock.holder_task_id == holder_id => {
                lock.expires_at += chrono::Duration::from_std(extension).unwrap();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .0
            .lock()
            .unwrap()
            .get(key)
            .map(|lock| !lock.is_expired(now))
            .unwrap_or(false))
    }

    async fn get_holder(&self, key: &str) -> Result<Option<PartitionLock>> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use dotcelery_model::TaskMessage;
    use dotcelery_registry::fixture_task_context;

    use super::*;

    type MemoryLocks = MemoryPartitionLockStore;

    fn message(partition_key: Option<&str>) -> TaskMessage {
        let mut builder = TaskMessage::builder("demo.task", "default");
        if let Some(key) = partition_key {
            builder = builder.partition_key(key);
        }
        builder.finish().unwrap()
    }

    #[tokio::test]
    async fn second_holder_is_requeued() {
        let store = PartitionLockHandle::new(MemoryLocks::default());
        let filter = PartitionedExecutionFilter::new(store, Duration::from_secs(60), Duration::from_millis(250));

        let holder_message = message(Some("acct-7"));
        let holder_task = fixture_task_context(&holder_message);
        let mut holder_ctx = FilterContext::new(&holder_task, b"", 1);
        filter.on_executing(&mut holder_ctx).await.unwrap();
        assert!(!holder_ctx.requeue_message);

        let other_message = TaskMessage::builder("demo.task", "default")
            .id("other")
            .partition_key("acct-7")
            .finish()
            .unwrap();
        let other_task = fixture_task_context(&other_message);
        let mut other_ctx = FilterContext::new(&other_task, b"", 1);
        filter.on_executing(&mut other_ctx).await.unwrap();
        assert!(other_ctx.requeue_message);
        assert_eq!(other_ctx.requeue_delay, Some(Duration::from_millis(250)));

        filter.on_executed(&mut holder_ctx).await.unwrap();
        filter.on_executing(&mut other_ctx).await.unwrap();
        assert!(!other_ctx.requeue_message || other_ctx.properties.contains_key(ACQUIRED_PROPERTY));
    }

    #[tokio::test]
    async fn same_holder_reacquires_idempotently() {
        let store = PartitionLockHandle::new(MemoryLocks::default());
        let filter = PartitionedExecutionFilter::new(store, Duration::from_secs(60), Duration::from_millis(250));
        let msg = message(Some("acct-7"));
        let task = fixture_task_context(&msg);

        let mut first = FilterContext::new(&task, b"", 1);
        filter.on_executing(&mut first).await.unwrap();
        assert!(!first.requeue_message);

        let mut second = FilterContext::new(&task, b"", 1);
        filter.on_executing(&mut second).await.unwrap();
        assert!(!second.requeue_message, "same task id re-enters the partition lock");
    }

    #[tokio::test]
    async fn no_partition_key_is_a_no_op() {
        let store = PartitionLockHandle::new(MemoryLocks::default());
        let filter = PartitionedExecutionFilter::new(store, Duration::from_secs(60), Duration::from_millis(250));
        let msg = message(None);
        let task = fixture_task_context(&msg);
        let mut ctx = FilterContext::new(&task, b"", 1);
        filter.on_executing(&mut ctx).await.unwrap();
        assert!(!ctx.requeue_message);
    }
}
