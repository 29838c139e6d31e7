//! Single-flight execution tracking.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use dotcelery_errors::ExecutionOverlap;
use dotcelery_filters::Filter;
use dotcelery_filters::FilterContext;
use dotcelery_model::ExecutionTrack;
use dotcelery_registry::OverlapKey;
use dotcelery_registry::OverlapPolicy;
use dotcelery_registry::TaskRegistry;

/// Canonical order of the built-in `PreventOverlapping` filter.
pub const ORDER: i32 = -900;

/// CAS-on-holder store behind `tryStart`/`stop`/`isExecuting`.
///
/// `lock_key` is `taskName[":"userKey]`. `try_start` is idempotent for the
/// current holder: re-entry on retry of the same `task_id` succeeds without error.
#[async_trait]
pub trait ExecutionTrackerStore: Send + Sync {
    async fn try_start(&self, lock_key: &str, task_id: &str, timeout: Duration) -> Result<bool>;
    async fn stop(&self, lock_key: &str, task_id: &str) -> Result<bool>;
    async fn is_executing(&self, lock_key: &str) -> Result<bool>;
    async fn get_executing_task_id(&self, lock_key: &str) -> Result<Option<String>>;
    async fn extend(&self, lock_key: &str, task_id: &str, extension: Duration) -> Result<bool>;
    async fn get(&self, lock_key: &str) -> Result<Option<ExecutionTrack>>;
}

/// A shared, cheaply cloneable handle to an [`ExecutionTrackerStore`] implementation.
#[derive(Clone)]
pub struct ExecutionTrackerHandle(Arc<dyn ExecutionTrackerStore>);

impl ExecutionTrackerHandle {
    pub fn new(store: impl ExecutionTrackerStore + 'static) -> Self {
        ExecutionTrackerHandle(Arc::new(store))
    }

    pub async fn try_start(&self, lock_key: &str, task_id: &str, timeout: Duration) -> Result<bool> {
        self.0.try_start(lock_key, task_id, timeout).await
    }

    pub async fn stop(&self, lock_key: &str, task_id: &str) -> Result<bool> {
        self.0.stop(lock_key, task_id).await
    }

    pub async fn is_executing(&self, lock_key: &str) -> Result<bool> {
        self.0.is_executing(lock_key).await
    }

    pub async fn get_executing_task_id(&self, lock_key: &str) -> Result<Option<String>> {
        self.0.get_executing_task_id(lock_key).await
    }

    pub async fn extend(&self, lock_key: &str, task_id: &str, extension: Duration) -> Result<bool> {
        self.0.extend(lock_key, task_id, extension).await
    }
}

/// Build the `taskName[":"userKey]` lock key for a task policy applied to raw payload bytes.
fn lock_key(task_name: &str, policy: &OverlapPolicy, args: &[u8]) -> String {
    match &policy.key {
        OverlapKey::TaskLevel => task_name.to_string(),
        OverlapKey::InputProperty(property) => {
            let value = serde_json::from_slice::<serde_json::Value>(args)
                .ok()
                .and_then(|value| value.get(property).cloned())
                .map(|value| value.to_string())
                .unwrap_or_default();
            format!("{task_name}:{value}")
        }
        OverlapKey::ContentHash => {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::Hash;
            use std::hash::Hasher;

            let mut hasher = DefaultHasher::new();
            args.hash(&mut hasher);
            format!("{task_name}:{:x}", hasher.finish())
        }
    }
}

const STARTED_PROPERTY: &str = "__dotcelery_overlap_started";
const LOCK_KEY_PROPERTY: &str = "__dotcelery_overlap_lock_key";

/// Prevents overlapping execution of the same `(taskName, userKey)`.
///
/// When `tryStart` fails, the duplicate invocation is treated as a no-op: the filter skips
/// execution and synthesizes a `Success` result rather than surfacing an error.
pub struct PreventOverlappingFilter {
    store: ExecutionTrackerHandle,
    registry: TaskRegistry,
}

impl PreventOverlappingFilter {
    pub fn new(store: ExecutionTrackerHandle, registry: TaskRegistry) -> Self {
        PreventOverlappingFilter { store, registry }
    }
}

#[async_trait]
impl Filter for PreventOverlappingFilter {
    fn name(&self) -> &str {
        "PreventOverlapping"
    }

    fn order(&self) -> i32 {
        ORDER
    }

    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let policy = match self
            .registry
            .lookup(&ctx.task.task_name)
            .and_then(|descriptor| descriptor.policy.overlap.clone())
        {
            Some(policy) => policy,
            None => return Ok(()),
        };
        let key = lock_key(&ctx.task.task_name, &policy, ctx.args);
        let started = self.store.try_start(&key, &ctx.task.task_id, policy.timeout).await?;
        if started {
            ctx.properties.insert(STARTED_PROPERTY.to_string(), serde_json::json!(true));
            ctx.properties
                .insert(LOCK_KEY_PROPERTY.to_string(), serde_json::json!(key));
        } else {
            let holder_task_id = self
                .store
                .get_executing_task_id(&key)
                .await?
                .unwrap_or_default();
            let overlap = ExecutionOverlap {
                lock_key: key,
                holder_task_id,
            };
            slog::debug!(ctx.task.operation().logger, "execution overlap, deduplicating"; "error" => %overlap);
            ctx.skip_with_result(serde_json::json!({"deduplicated_overlap": true}));
        }
        Ok(())
    }

    async fn on_executed(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        self.stop_if_held(ctx).await
    }

    async fn on_exception(&self, ctx: &mut FilterContext<'_>, _error: &anyhow::Error) -> Result<bool> {
        self.stop_if_held(ctx).await?;
        Ok(false)
    }
}

impl PreventOverlappingFilter {
    async fn stop_if_held(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        if ctx.properties.remove(STARTED_PROPERTY).is_none() {
            return Ok(());
        }
        if let Some(key) = ctx.properties.remove(LOCK_KEY_PROPERTY).and_then(|v| v.as_str().map(String::from)) {
            self.store.stop(&key, &ctx.task.task_id).await?;
        }
        Ok(())
    }
}

/// Simple in-memory [`ExecutionTrackerStore`], shipped as the required test/local-dev
/// in-memory variant.
#[derive(Default)]
pub struct MemoryExecutionTrackerStore(std::sync::Mutex<std::collections::HashMap<String, ExecutionTrack>>);

#[async_trait]
impl ExecutionTrackerStore for MemoryExecutionTrackerStore {
    async fn try_start(&self, lock_key: &str, task_id: &str, timeout: Duration) -> Result<bool> {
        let now = chrono::Utc::now();
        let mut guard = self.0.lock().unwrap();
        if let Some(existing) = guard.get(lock_key) {
            if !existing.is_expired(now) && existing.holder_task_id != task_id {
                return Ok(false);
            }
        }
        guard.insert(
            lock_key.to_string(),
            ExecutionTrack {
                lock_key: lock_key.to_string(),
                holder_task_id: task_id.to_string(),
                started_at: now,
                expires_at: now + chrono::Duration::from_std(timeout).unwrap(),
            },
        );
        Ok(true)
    }

    async fn stop(&self, lock_key: &str, task_id: &str) -> Result<bool> {
        let mut guard = self.0.lock().unwrap();
        match guard.get(lock_key) {
            Some(row) if row.holder_task_id == task_id => {
                guard.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_executing(&self, lock_key: &str) -> Result<bool> {
        let now = chrono::Utc::now();
        Ok(self
            .0
            .lock()
            .unwrap()
            .get(lock_key)
            .map(|row| !row.is_expired(now))
            .unwrap_or(false))
    }

    async fn get_executing_task_id(&self, lock_key: &str) -> Result<Option<String>> {
        Ok(self.0.lock().unwrap().get(lock_key).map(|row| row.holder_task_id.clone()))
    }

    async fn extend(&self, lock_key: &str, task_id: &str, extension: Duration) -> Result<bool> {
        let mut guard = self.0.lock().unwrap();
        match guard.get_mut(lock_key) {
            Some(row) if row.holder_task_id == task_id => {
                row.expires_at += chrono::Duration::from_std(extension).unwrap();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, lock_key: &str) -> Result<Option<ExecutionTrack>> {
        Ok(self.0.lock().unwrap().get(lock_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use dotcelery_model::TaskMessage;
    use dotcelery_registry::fixture_task_context;
    use dotcelery_registry::TaskHandler;
    use dotcelery_registry::TaskPolicy;

    use super::*;

    type MemoryTracker = MemoryExecutionTrackerStore;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn invoke(&self, _ctx: &dotcelery_registry::TaskContext, input: serde_json::Value) -> Result<serde_json::Value> {
            Ok(input)
        }
    }

    fn registry_with_overlap() -> TaskRegistry {
        let mut builder = TaskRegistry::build();
        builder
            .register(
                "demo.task",
                Noop,
                TaskPolicy {
                    overlap: Some(OverlapPolicy::task_level(Duration::from_secs(60))),
                    ..Default::default()
                },
            )
            .unwrap();
        builder.finish()
    }

    #[tokio::test]
    async fn second_invocation_is_deduplicated() {
        let registry = registry_with_overlap();
        let store = ExecutionTrackerHandle::new(MemoryTracker::default());
        let filter = PreventOverlappingFilter::new(store, registry);

        let first_message = TaskMessage::builder("demo.task", "default").finish().unwrap();
        let first_task = fixture_task_context(&first_message);
        let mut first_ctx = FilterContext::new(&first_task, b"", 1);
        filter.on_executing(&mut first_ctx).await.unwrap();
        assert!(!first_ctx.skip_execution);

        let second_message = TaskMessage::builder("demo.task", "default")
            .id("second")
            .finish()
            .unwrap();
        let second_task = fixture_task_context(&second_message);
        let mut second_ctx = FilterContext::new(&second_task, b"", 1);
        filter.on_executing(&mut second_ctx).await.unwrap();
        assert!(second_ctx.skip_execution);
        assert_eq!(second_ctx.skip_result, Some(serde_json::json!({"deduplicated_overlap": true})));

        filter.on_executed(&mut first_ctx).await.unwrap();
        let mut third_ctx = FilterContext::new(&second_task, b"", 1);
        filter.on_executing(&mut third_ctx).await.unwrap();
        assert!(!third_ctx.skip_execution, "lock released, new invocation proceeds");
    }

    #[tokio::test]
    async fn tasks_without_overlap_policy_are_ignored() {
        let registry = TaskRegistry::build().finish();
        let store = ExecutionTrackerHandle::new(MemoryTracker::default());
        let filter = PreventOverlappingFilter::new(store, registry);
        let message = TaskMessage::builder("demo.task", "default").finish().unwrap();
        let task = fixture_task_context(&message);
        let mut ctx = FilterContext::new(&task, b"", 1);
        filter.on_executing(&mut ctx).await.unwrap();
        assert!(!ctx.skip_execution);
    }
}
