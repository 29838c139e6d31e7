//! The classified result of running one delivery through the executor.
use std::time::Duration;

/// What the worker should do with the delivery once the executor returns.
///
/// Every variant corresponds to one terminal or non-terminal delivery outcome; the worker never
/// inspects the `Err` path of the handler directly, it only reacts to this enum.
#[derive(Debug)]
pub enum Outcome {
    /// Handler ran to completion; ack the delivery.
    Success,

    /// Terminal failure; ack the delivery. The result backend already holds the exception.
    Failure,

    /// A handler (or a rate-limit filter) requested a retry. The worker republishes a fresh
    /// message, then acks the original.
    Retry {
        retry_after: Option<Duration>,
        do_not_increment_retries: bool,
    },

    /// The delivery must return to the broker without counting as a retry (partition busy,
    /// kill switch tripped, graceful shutdown in progress).
    Requeued { delay: Option<Duration> },

    /// The task was revoked; ack the delivery, the handler body never ran.
    Revoked,

    /// Terminal rejection (unknown task, expired message, security violation,
    /// deserialization failure); ack the delivery.
    Rejected,
}
