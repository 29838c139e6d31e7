//! Errors raised by [`crate::Client::send`] and [`crate::AsyncResult`].
use thiserror::Error;

/// A [`crate::SendOptions`] value that violates one of the send-time invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidSendOptions {
    #[error("priority must be in [0, 9], got {0}")]
    PriorityOutOfRange(u8),

    #[error("expires must be after eta")]
    ExpiresBeforeEta,

    #[error("expires must be after now + countdown")]
    ExpiresBeforeCountdown,
}

/// Raised by [`crate::AsyncResult::get`] when the task did not complete successfully.
#[derive(Debug, Error)]
pub enum TaskFailed {
    #[error("task {task_id} failed: {message}")]
    Failure { task_id: String, message: String },

    #[error("task {task_id} was revoked")]
    Revoked { task_id: String },

    #[error("task {task_id} was rejected")]
    Rejected { task_id: String },

    #[error("task {task_id} result payload could not be deserialized: {source}")]
    Deserialize {
        task_id: String,
        #[source]
        source: serde_json::Error,
    },
}
