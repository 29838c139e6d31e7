//! Dead-letter handling for unrecoverable deliveries.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use slog::warn;
use slog::Logger;

use dotcelery_model::TaskMessage;

/// Why a delivery was dead-lettered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeadLetterReason {
    MaxRetriesExceeded,
    UnknownTask,
    DeserializationFailed,
    ExpiredMessage,
    Unprocessable,
}

/// A persisted dead-letter row: the original envelope plus why it was given up on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: String,
    pub original: TaskMessage,
    pub reason: DeadLetterReason,
    pub exception_kind: Option<String>,
    pub exception_message: Option<String>,
    pub stack: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Storage for dead-lettered deliveries, retained for `deadLetter.retentionPeriod`.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn store(&self, record: DeadLetterRecord) -> Result<()>;
    async fn list(&self) -> Result<Vec<DeadLetterRecord>>;
    async fn purge_older_than(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize>;
}

/// Handles the dead-letter contract: serialize the envelope plus exception
/// metadata, assign a new id, and persist through an (optional) [`DeadLetterStore`].
///
/// When no store is configured the handler logs and drops the record, per spec: "If the store
/// is unconfigured, log and drop."
#[derive(Clone)]
pub struct DeadLetterHandler {
    store: Option<Arc<dyn DeadLetterStore>>,
    include_stack_trace: bool,
}

impl DeadLetterHandler {
    pub fn new(store: Option<impl DeadLetterStore + 'static>, include_stack_trace: bool) -> Self {
        DeadLetterHandler {
            store: store.map(|store| Arc::new(store) as Arc<dyn DeadLetterStore>),
            include_stack_trace,
        }
    }

    pub fn unconfigured() -> Self {
        DeadLetterHandler {
            store: None,
            include_stack_trace: false,
        }
    }

    pub async fn handle(
        &self,
        logger: &Logger,
        original: TaskMessage,
        reason: DeadLetterReason,
        exception_kind: Option<String>,
        exception_message: Option<String>,
        stack: Option<String>,
    ) -> Result<()> {
        let record = DeadLetterRecord {
            id: uuid::Uuid::new_v4().to_string(),
            original,
            reason,
            exception_kind,
            exception_message,
            stack: if self.include_stack_trace { stack } else { None },
            recorded_at: Utc::now(),
        };
        match &self.store {
            Some(store) => store.store(record).await,
            None => {
                warn!(
                    logger,
                    "dropping dead-letter record, no store configured";
                    "task_id" => &record.original.id,
                    "reason" => ?record.reason,
                );
                Ok(())
            }
        }
    }
}

/// Simple in-memory [`DeadLetterStore`], shipped as the required test/local-dev
/// in-memory variant.
#[derive(Default)]
pub struct MemoryDeadLetterStore(std::sync::Mutex<Vec<DeadLetterRecord>>);

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn store(&self, record: DeadLetterRecord) -> Result<()> {
        self.0.lock().unwrap().push(record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetterRecord>> {
        Ok(self.0.lock().unwrap().clone())
    }

    async fn purge_older_than(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut guard = self.0.lock().unwrap();
        let before = guard.len();
        guard.retain(|record| now.signed_duration_since(record.recorded_at).to_std().unwrap_or_default() < retention);
        Ok(before - guard.len())
    }
}
