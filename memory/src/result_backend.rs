//! Single-process in-memory result backend.
use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use dotcelery_model::ResultBackend;
use dotcelery_model::TaskResult;
use dotcelery_model::TaskState;

/// An in-memory [`ResultBackend`]. `expiry` is accepted but not enforced: a single process's
/// memory is reclaimed with the process itself, so there is nothing to sweep.
pub struct MemoryResultBackend {
    results: Mutex<HashMap<String, TaskResult>>,
    changed: broadcast::Sender<String>,
}

impl Default for MemoryResultBackend {
    fn default() -> Self {
        let (changed, _) = broadcast::channel(1024);
        MemoryResultBackend {
            results: Mutex::new(HashMap::new()),
            changed,
        }
    }
}

impl MemoryResultBackend {
    pub fn new() -> Self {
        MemoryResultBackend::default()
    }
}

#[async_trait]
impl ResultBackend for MemoryResultBackend {
    async fn store(&self, result: TaskResult, _expiry: Option<Duration>) -> Result<()> {
        let task_id = result.task_id.clone();
        self.results.lock().await.insert(task_id.clone(), result);
        let _ = self.changed.send(task_id);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>> {
        Ok(self.results.lock().await.get(task_id).cloned())
    }

    /// Poll for a terminal result, waking on every store/update rather than busy-polling.
    async fn wait_for(&self, task_id: &str, timeout: Option<Duration>) -> Result<TaskResult> {
        let mut changes = self.changed.subscribe();
        if let Some(result) = self.get(task_id).await? {
            if result.state.is_terminal() {
                return Ok(result);
            }
        }

        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        loop {
            let recv = changes.recv();
            let woke = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, recv).await.ok(),
                None => Some(recv.await),
            };
            match woke {
                None => anyhow::bail!("timed out waiting for result of task {task_id}"),
                Some(Err(broadcast::error::RecvError::Closed)) => {
                    anyhow::bail!("result backend closed while waiting for task {task_id}")
                }
                Some(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Some(Ok(changed_id)) if changed_id != task_id => {}
                Some(Ok(_)) => {}
            }
            if let Some(result) = self.get(task_id).await? {
                if result.state.is_terminal() {
                    return Ok(result);
                }
            }
        }
    }

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()> {
        let mut results = self.results.lock().await;
        match results.get_mut(task_id) {
            Some(existing) => {
                existing.state = state;
                if let Some(metadata) = metadata {
                    existing.metadata.extend(metadata);
                }
            }
            None => {
                results.insert(
                    task_id.to_string(),
                    TaskResult {
                        task_id: task_id.to_string(),
                        state,
                        result: None,
                        exception: None,
                        completed_at: None,
                        duration: None,
                        metadata: metadata.unwrap_or_default(),
                        retry_after: None,
                        requeue_delay: None,
                        do_not_increment_retries: false,
                    },
                );
            }
        }
        drop(results);
        let _ = self.changed.send(task_id.to_string());
        Ok(())
    }

    async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>> {
        Ok(self.results.lock().await.get(task_id).map(|result| result.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_returns_immediately_when_already_terminal() {
        let backend = MemoryResultBackend::new();
        backend.store(TaskResult::success("t1", Vec::new(), Duration::from_millis(5)), None).await.unwrap();
        let result = backend.wait_for("t1", Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(result.state, TaskState::Success);
    }

    #[tokio::test]
    async fn wait_for_wakes_on_later_store() {
        let backend = std::sync::Arc::new(MemoryResultBackend::new());
        let waiter = backend.clone();
        let handle = tokio::spawn(async move { waiter.wait_for("t1", Some(Duration::from_secs(2))).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        backend.store(TaskResult::success("t1", Vec::new(), Duration::from_millis(5)), None).await.unwrap();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.state, TaskState::Success);
    }

    #[tokio::test]
    async fn wait_for_times_out_when_never_terminal() {
        let backend = MemoryResultBackend::new();
        backend.update_state("t1", TaskState::Started, None).await.unwrap();
        let result = backend.wait_for("t1", Some(Duration::from_millis(20))).await;
        assert!(result.is_err());
    }
}
