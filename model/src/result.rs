//! The terminal (or in-flight) outcome of a task invocation.
use std::collections::HashMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Lifecycle state of a task as recorded in the result backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskState {
    Pending,
    Received,
    Started,
    Success,
    Failure,
    Retry,
    Revoked,
    Rejected,
    Requeued,
}

impl TaskState {
    /// States that the executor never transitions out of.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked | TaskState::Rejected
        )
    }
}

/// Structured exception information attached to a non-`Success` result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub kind: String,
    pub message: String,
    pub stack: Option<String>,
}

/// The recorded outcome of a single task invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub state: TaskState,
    pub result: Option<Vec<u8>>,
    pub exception: Option<ExceptionInfo>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub metadata: HashMap<String, serde_json::Value>,

    /// For `Retry`/`Requeued` states: delay to apply before the message becomes eligible again.
    pub retry_after: Option<Duration>,

    /// For `Requeued` states: delay to apply before the broker re-delivers the message.
    pub requeue_delay: Option<Duration>,

    /// When set, a `Retry` outcome must not increment the message's `retries` counter
    /// (used by rate-limit-originated retries.10).
    pub do_not_increment_retries: bool,
}

impl TaskResult {
    /// Build a `Pending` placeholder result for a task that has just been accepted.
    pub fn pending(task_id: impl Into<String>) -> TaskResult {
        TaskResult {
            task_id: task_id.into(),
            state: TaskState::Pending,
            result: None,
            exception: None,
            completed_at: None,
            duration: None,
            metadata: HashMap::new(),
            retry_after: None,
            requeue_delay: None,
            do_not_increment_retries: false,
        }
    }

    /// Build a terminal `Success` result.
    pub fn success(task_id: impl Into<String>, result: Vec<u8>, duration: Duration) -> TaskResult {
        TaskResult {
            task_id: task_id.into(),
            state: TaskState::Success,
            result: Some(result),
            exception: None,
            completed_at: Some(Utc::now()),
            duration: Some(duration),
            metadata: HashMap::new(),
            retry_after: None,
            requeue_delay: None,
            do_not_increment_retries: false,
        }
    }

    /// Build a terminal `Failure` result carrying exception information.
    pub fn failure(task_id: impl Into<String>, exception: ExceptionInfo) -> TaskResult {
        TaskResult {
            task_id: task_id.into(),
            state: TaskState::Failure,
            result: None,
            exception: Some(exception),
            completed_at: Some(Utc::now()),
            duration: None,
            metadata: HashMap::new(),
            retry_after: None,
            requeue_delay: None,
            do_not_increment_retries: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failure.is_terminal());
        assert!(TaskState::Revoked.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::Retry.is_terminal());
        assert!(!TaskState::Requeued.is_terminal());
        assert!(!TaskState::Started.is_terminal());
    }
}
