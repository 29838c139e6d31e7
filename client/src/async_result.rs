//! A handle to a submitted task's eventual result.
use std::marker::PhantomData;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;

use dotcelery_model::ResultBackendHandle;
use dotcelery_model::TaskResult;
use dotcelery_model::TaskState;

use crate::error::TaskFailed;

/// A reference to a submitted task, used to poll for and fetch its result.
#[derive(Clone)]
pub struct AsyncResult<T> {
    task_id: String,
    backend: ResultBackendHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AsyncResult<T> {
    pub(crate) fn new(task_id: String, backend: ResultBackendHandle) -> AsyncResult<T> {
        AsyncResult {
            task_id,
            backend,
            _marker: PhantomData,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Poll the result backend until the task reaches a terminal state, or `timeout` elapses.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<TaskResult> {
        self.backend.wait_for(&self.task_id, timeout).await
    }
}

impl<T: DeserializeOwned> AsyncResult<T> {
    /// Wait for the task and deserialize its payload, raising a typed [`TaskFailed`] if the
    /// terminal state was not `Success`.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<T> {
        let result = self.wait(timeout).await?;
        match result.state {
            TaskState::Success => {
                let bytes = result.result.unwrap_or_default();
                serde_json::from_slice(&bytes).map_err(|source| {
                    TaskFailed::Deserialize {
                        task_id: self.task_id.clone(),
                        source,
                    }
                    .into()
                })
            }
            TaskState::Revoked => Err(TaskFailed::Revoked { task_id: self.task_id.clone() }.into()),
            TaskState::Rejected => Err(TaskFailed::Rejected { task_id: self.task_id.clone() }.into()),
            _ => {
                let message = result
                    .exception
                    .map(|exception| exception.message)
                    .unwrap_or_else(|| format!("terminal state {:?}", result.state));
                Err(TaskFailed::Failure { task_id: self.task_id.clone(), message }.into())
            }
        }
    }
}
