//! Common error taxonomy for the DotCelery task queue core.
//!
//! Every variant here is a narrow `thiserror` leaf type, not a catch-all `enum`: calling code
//! matches on concrete types with `error.is::<T>()` or `error.downcast_ref::<T>()`, the same way
//! `AbandonTask` is tested for further down the pipeline. Leaf types compose with `anyhow::Error`
//! at call boundaries instead of forcing every crate to agree on one mega-enum.
use std::time::Duration;

/// A task handler requested a retry; not a failure, just a recoverable outcome.
///
/// Raised by [`TaskContext::retry`](https://docs.rs/dotcelery-executor) and caught exclusively
/// by the task executor: it must never surface to a user as a `Failure`.
#[derive(Debug, thiserror::Error)]
#[error("task requested a retry")]
pub struct RetryRequest {
    /// Delay to apply before the retry is attempted, if any.
    pub countdown: Option<Duration>,

    /// Human readable cause attached to the retry request.
    pub cause: Option<String>,

    /// When set, the republished message's `retries` counter is left unchanged.
    pub do_not_increment_retries: bool,
}

impl RetryRequest {
    /// Build a retry request with no countdown or cause.
    pub fn new() -> Self {
        RetryRequest {
            countdown: None,
            cause: None,
            do_not_increment_retries: false,
        }
    }
}

impl Default for RetryRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// The task payload could not be deserialized with the registered content type.
#[derive(Debug, thiserror::Error)]
#[error("failed to deserialize payload for task '{task_id}': {reason}")]
pub struct DeserializationFailed {
    pub task_id: String,
    pub reason: String,
}

/// The delivery names a task that has no registered handler.
#[derive(Debug, thiserror::Error)]
#[error("no handler registered for task '{task}'")]
pub struct UnknownTask {
    pub task: String,
}

/// The message's `expires` deadline has already elapsed.
#[derive(Debug, thiserror::Error)]
#[error("message '{task_id}' expired at {expires_at}")]
pub struct ExpiredMessage {
    pub task_id: String,
    pub expires_at: String,
}

/// The task was revoked before or during execution.
#[derive(Debug, thiserror::Error)]
#[error("task '{task_id}' was revoked")]
pub struct RevocationRequested {
    pub task_id: String,
    pub terminate: bool,
}

/// A security policy (schema version, payload size, task allowlist) rejected the delivery.
#[derive(Debug, thiserror::Error)]
#[error("security policy violation for task '{task_id}': {reason}")]
pub struct SecurityViolation {
    pub task_id: String,
    pub reason: String,
    pub metadata: serde_json::Value,
}

/// The requested partition key is held by another in-flight task.
#[derive(Debug, thiserror::Error)]
#[error("partition '{partition_key}' is held by task '{holder_task_id}'")]
pub struct PartitionBusy {
    pub partition_key: String,
    pub holder_task_id: String,
    pub requeue_delay: Duration,
}

/// The resource has exceeded its configured rate limit.
#[derive(Debug, thiserror::Error)]
#[error("resource '{resource_key}' is rate limited, retry after {retry_after:?}")]
pub struct RateLimited {
    pub resource_key: String,
    pub retry_after: Duration,
}

/// Another execution is already in flight for the same single-flight lock key.
#[derive(Debug, thiserror::Error)]
#[error("task '{lock_key}' is already executing as '{holder_task_id}'")]
pub struct ExecutionOverlap {
    pub lock_key: String,
    pub holder_task_id: String,
}

/// The kill switch is tripped and is not accepting new work.
#[derive(Debug, thiserror::Error)]
#[error("kill switch is tripped, will retry after restart timeout")]
pub struct KillSwitchTripped {
    pub restart_after: Duration,
}

/// The worker is shutting down and the delivery must be returned to the broker.
#[derive(Debug, thiserror::Error)]
#[error("worker shutdown in progress, requeueing delivery")]
pub struct ShutdownInProgress;

/// The broker could not be reached.
#[derive(Debug, thiserror::Error)]
#[error("broker unavailable: {reason}")]
pub struct BrokerUnavailable {
    pub reason: String,
}

/// A pluggable store could not be reached or returned an unexpected error.
#[derive(Debug, thiserror::Error)]
#[error("store '{store}' unavailable: {reason}")]
pub struct StoreUnavailable {
    pub store: String,
    pub reason: String,
}
