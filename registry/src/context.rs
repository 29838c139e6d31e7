//! Read-only view of the in-flight envelope plus capabilities exposed to task handlers.
use std::collections::HashMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;

use dotcelery_context::Context;
use dotcelery_errors::RetryRequest;
use dotcelery_model::ResultBackendHandle;
use dotcelery_model::TaskMessage;
use dotcelery_model::TaskState;

/// Read-only view of the in-flight envelope, plus the three handler capabilities:
/// `progress.report`, `updateState` and `retry`.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub task_name: String,
    pub queue: String,
    pub retries: u32,
    pub max_retries: u32,
    pub sent_at: DateTime<Utc>,
    pub eta: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
    pub root_id: Option<String>,
    pub correlation_id: Option<String>,
    pub tenant_id: Option<String>,
    pub partition_key: Option<String>,
    pub headers: HashMap<String, String>,

    context: Context,
    result_backend: ResultBackendHandle,
}

impl TaskContext {
    /// Build a [`TaskContext`] from the envelope about to be executed.
    pub fn new(
        message: &TaskMessage,
        context: Context,
        result_backend: ResultBackendHandle,
    ) -> TaskContext {
        TaskContext {
            task_id: message.id.clone(),
            task_name: message.task.clone(),
            queue: message.queue.clone(),
            retries: message.retries,
            max_retries: message.max_retries,
            sent_at: message.timestamp,
            eta: message.eta,
            expires: message.expires,
            parent_id: message.parent_id.clone(),
            root_id: message.root_id.clone(),
            correlation_id: message.correlation_id.clone(),
            tenant_id: message.tenant_id.clone(),
            partition_key: message.partition_key.clone(),
            headers: message.headers.clone(),
            context,
            result_backend,
        }
    }

    /// Access the ambient operation context (for logging, tracing, and the like).
    pub fn operation(&self) -> &Context {
        &self.context
    }

    /// Report progress on the currently `Started` task.
    ///
    /// `percent` should be in `[0, 100]`; out-of-range values are stored as given, since the
    /// progress figure is informational only and handlers are trusted to report sensibly.
    pub async fn report_progress(&self, percent: f32, message: Option<String>) -> anyhow::Result<()> {
        let mut metadata = HashMap::new();
        metadata.insert(
            String::from("progress_percent"),
            serde_json::json!(percent),
        );
        if let Some(message) = message {
            metadata.insert(String::from("progress_message"), serde_json::json!(message));
        }
        self.result_backend
            .update_state(&self.task_id, TaskState::Started, Some(metadata))
            .await
    }

    /// Record custom metadata against the task, without changing its terminal outcome.
    pub async fn update_state(
        &self,
        state: TaskState,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> anyhow::Result<()> {
        self.result_backend
            .update_state(&self.task_id, state, metadata)
            .await
    }

    /// Build a [`RetryRequest`] for the handler to return as its error.
    ///
    /// The executor recognises this error type and never surfaces it as a `Failure`
    ///.
    pub fn retry(&self, countdown: Option<Duration>, cause: Option<String>) -> anyhow::Error {
        RetryRequest {
            countdown,
            cause,
            do_not_increment_retries: false,
        }
        .into()
    }
}
