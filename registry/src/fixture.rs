//! Test-only helpers shared by downstream crates' test suites.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dotcelery_model::ResultBackend;
use dotcelery_model::ResultBackendHandle;
use dotcelery_model::TaskMessage;
use dotcelery_model::TaskResult;
use dotcelery_model::TaskState;

use crate::context::TaskContext;

/// A [`ResultBackend`] that discards everything; useful when a test only cares about the
/// handler's return value, not what got persisted.
#[cfg(any(test, feature = "test-fixture"))]
pub struct NullResultBackend;

#[cfg(any(test, feature = "test-fixture"))]
#[async_trait]
impl ResultBackend for NullResultBackend {
    async fn store(&self, _result: TaskResult, _expiry: Option<Duration>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get(&self, _task_id: &str) -> anyhow::Result<Option<TaskResult>> {
        Ok(None)
    }

    async fn wait_for(&self, _task_id: &str, _timeout: Option<Duration>) -> anyhow::Result<TaskResult> {
        anyhow::bail!("NullResultBackend never completes a wait")
    }

    async fn update_state(
        &self,
        _task_id: &str,
        _state: TaskState,
        _metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_state(&self, _task_id: &str) -> anyhow::Result<Option<TaskState>> {
        Ok(None)
    }
}

/// Build a [`TaskContext`] for `message` backed by a [`NullResultBackend`].
#[cfg(any(test, feature = "test-fixture"))]
pub fn fixture_task_context(message: &TaskMessage) -> TaskContext {
    TaskContext::new(
        message,
        dotcelery_context::Context::fixture(),
        ResultBackendHandle::new(NullResultBackend),
    )
}
