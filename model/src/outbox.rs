//! Outbox rows: a durable write-ahead buffer for exactly-once publish.
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::message::TaskMessage;

/// Dispatch status of an [`OutboxMessage`] row.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OutboxStatus {
    Pending,
    Dispatched,
    Failed,
}

/// A durable write-ahead row produced by [`crate::TaskMessage`] submission inside a business
/// transaction, dispatched to the broker by a background process.
///
/// Invariant: the dispatcher publishes rows in strictly increasing
/// `sequence_number` order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    pub task_message: TaskMessage,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub sequence_number: u64,
}

impl OutboxMessage {
    /// Wrap a [`TaskMessage`] as a pending outbox row with the given monotonic sequence number.
    pub fn new(task_message: TaskMessage, sequence_number: u64) -> OutboxMessage {
        OutboxMessage {
            id: uuid::Uuid::new_v4().to_string(),
            task_message,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            dispatched_at: None,
            sequence_number,
        }
    }
}
