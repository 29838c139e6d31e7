//! Inbox deduplication: skips re-execution of a `taskId` already marked processed.
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use dotcelery_filters::Filter;
use dotcelery_filters::FilterContext;

/// Canonical order of the built-in `InboxDedup` filter.
pub const ORDER: i32 = -1000;

/// Tracks which `taskId`s have already completed, so at-least-once redelivery is absorbed
/// without re-running the handler.
#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn is_processed(&self, task_id: &str) -> Result<bool>;
    async fn mark_processed(&self, task_id: &str) -> Result<()>;
}

/// A shared, cheaply cloneable handle to an [`InboxStore`] implementation.
#[derive(Clone)]
pub struct InboxHandle(Arc<dyn InboxStore>);

impl InboxHandle {
    pub fn new(store: impl InboxStore + 'static) -> Self {
        InboxHandle(Arc::new(store))
    }

    pub async fn is_processed(&self, task_id: &str) -> Result<bool> {
        self.0.is_processed(task_id).await
    }

    pub async fn mark_processed(&self, task_id: &str) -> Result<()> {
        self.0.mark_processed(task_id).await
    }
}

/// In-memory [`InboxStore`], the required test/local-dev variant.
#[derive(Default)]
pub struct MemoryInboxStore(Mutex<HashSet<String>>);

#[async_trait]
impl InboxStore for MemoryInboxStore {
    async fn is_processed(&self, task_id: &str) -> Result<bool> {
        Ok(self.0.lock().unwrap().contains(task_id))
    }

    async fn mark_processed(&self, task_id: &str) -> Result<()> {
        self.0.lock().unwrap().insert(task_id.to_string());
        Ok(())
    }
}

const DEDUPLICATED_PROPERTY: &str = "__dotcelery_inbox_deduplicated";

/// Skips re-execution of a `taskId` that has already been processed, synthesizing a
/// `Success` result carrying `deduplicated: true` in its place.
///
/// Marking happens post-execution on success only: a crash between the handler completing
/// and this filter running leaves the row unmarked, so at-least-once redelivery is accepted
///.
pub struct InboxFilter {
    store: InboxHandle,
}

impl InboxFilter {
    pub fn new(store: InboxHandle) -> Self {
        InboxFilter { store }
    }
}

#[async_trait]
impl Filter for InboxFilter {
    fn name(&self) -> &str {
        "InboxDedup"
    }

    fn order(&self) -> i32 {
        ORDER
    }

    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        if self.store.is_processed(&ctx.task.task_id).await? {
            ctx.skip_with_result(serde_json::json!({"deduplicated": true}));
        } else {
            ctx.properties.insert(DEDUPLICATED_PROPERTY.to_string(), serde_json::json!(false));
        }
        Ok(())
    }

    async fn on_executed(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        if ctx.properties.remove(DEDUPLICATED_PROPERTY).is_some() {
            self.store.mark_processed(&ctx.task.task_id).await?;
        }
        Ok(())
    }
}
