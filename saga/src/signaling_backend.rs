//! A [`ResultBackend`] decorator that publishes a [`TaskCompletionSignal`] onto a [`SignalBus`]
//! whenever a terminal result is recorded, so a saga orchestrator can react to task outcomes
//! without the executor knowing sagas exist.
use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use dotcelery_model::ResultBackend;
use dotcelery_model::TaskResult;
use dotcelery_model::TaskState;

use crate::signal::SignalBus;
use crate::signal::TaskCompletionSignal;

/// Wraps any [`ResultBackend`] so that `store` and `update_state` calls reaching a terminal
/// state also publish a [`TaskCompletionSignal`] to the bus, before delegating to the inner
/// backend.
pub struct SignalingResultBackend<B> {
    inner: B,
    bus: SignalBus,
}

impl<B: ResultBackend> SignalingResultBackend<B> {
    pub fn new(inner: B, bus: SignalBus) -> Self {
        SignalingResultBackend { inner, bus }
    }
}

#[async_trait]
impl<B: ResultBackend> ResultBackend for SignalingResultBackend<B> {
    async fn store(&self, result: TaskResult, expiry: Option<Duration>) -> Result<()> {
        if let Some(signal) = TaskCompletionSignal::from_result(&result) {
            self.bus.publish(signal);
        }
        self.inner.store(result, expiry).await
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>> {
        self.inner.get(task_id).await
    }

    async fn wait_for(&self, task_id: &str, timeout: Option<Duration>) -> Result<TaskResult> {
        self.inner.wait_for(task_id, timeout).await
    }

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()> {
        if state.is_terminal() {
            if let Some(mut result) = self.inner.get(task_id).await? {
                result.state = state;
                if let Some(signal) = TaskCompletionSignal::from_result(&result) {
                    self.bus.publish(signal);
                }
            } else {
                // No stored result to enrich the signal with; publish a bare outcome so the
                // saga orchestrator still advances.
                let bare = TaskResult {
                    task_id: task_id.to_string(),
                    state,
                    result: None,
                    exception: None,
                    completed_at: None,
                    duration: None,
                    metadata: metadata.clone().unwrap_or_default(),
                    retry_after: None,
                    requeue_delay: None,
                    do_not_increment_retries: false,
                };
                if let Some(signal) = TaskCompletionSignal::from_result(&bare) {
                    self.bus.publish(signal);
                }
            }
        }
        self.inner.update_state(task_id, state, metadata).await
    }

    async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>> {
        self.inner.get_state(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio_stream::StreamExt;

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        rows: Mutex<HashMap<String, TaskResult>>,
    }

    #[async_trait]
    impl ResultBackend for FakeBackend {
        async fn store(&self, result: TaskResult, _expiry: Option<Duration>) -> Result<()> {
            self.rows.lock().unwrap().insert(result.task_id.clone(), result);
            Ok(())
        }
        async fn get(&self, task_id: &str) -> Result<Option<TaskResult>> {
            Ok(self.rows.lock().unwrap().get(task_id).cloned())
        }
        async fn wait_for(&self, task_id: &str, _timeout: Option<Duration>) -> Result<TaskResult> {
            Ok(self.rows.lock().unwrap().get(task_id).cloned().unwrap())
        }
        async fn update_state(
            &self,
            task_id: &str,
            state: TaskState,
            _metadata: Option<HashMap<String, serde_json::Value>>,
        ) -> Result<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(task_id) {
                row.state = state;
            }
            Ok(())
        }
        async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>> {
            Ok(self.rows.lock().unwrap().get(task_id).map(|row| row.state))
        }
    }

    #[tokio::test]
    async fn storing_a_terminal_result_publishes_a_signal() {
        let bus = SignalBus::new();
        let mut stream = Box::pin(bus.subscribe());
        let backend = SignalingResultBackend::new(FakeBackend::default(), bus);

        backend
            .store(
                TaskResult::success("t1", b"ok".to_vec(), Duration::from_millis(1)),
                None,
            )
            .await
            .unwrap();

        let signal = stream.next().await.unwrap();
        assert_eq!(signal.task_id, "t1");
        assert!(backend.get("t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn non_terminal_store_publishes_nothing() {
        let bus = SignalBus::new();
        let mut stream = Box::pin(bus.subscribe());
        let backend = SignalingResultBackend::new(FakeBackend::default(), bus);

        backend.store(TaskResult::pending("t1"), None).await.unwrap();
        backend.update_state("t1", TaskState::Started, None).await.unwrap();

        // No signal should have arrived; confirm by racing a publish-and-observe round trip.
        backend
            .update_state("t1", TaskState::Revoked, None)
            .await
            .unwrap();
        let signal = stream.next().await.unwrap();
        assert_eq!(signal.task_id, "t1");
    }
}
