//! Runs one delivery: revocation/expiry checks, filter pipeline, handler invocation, outcome
//! classification.
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use dotcelery_context::Context;
use dotcelery_coordination::DeadLetterHandler;
use dotcelery_coordination::DeadLetterReason;
use dotcelery_coordination::RevocationHandle;
use dotcelery_errors::DeserializationFailed;
use dotcelery_errors::RetryRequest;
use dotcelery_errors::RevocationRequested;
use dotcelery_errors::SecurityViolation;
use dotcelery_errors::StoreUnavailable;
use dotcelery_filters::FilterContext;
use dotcelery_filters::FilterPipeline;
use dotcelery_filters::PreOutcome;
use dotcelery_model::ExceptionInfo;
use dotcelery_model::ResultBackendHandle;
use dotcelery_model::Serializer;
use dotcelery_model::TaskMessage;
use dotcelery_model::TaskResult;
use dotcelery_model::TaskState;
use dotcelery_registry::Invoker;
use dotcelery_registry::TaskContext;

use crate::outcome::Outcome;

/// Which reasons are configured to be dead-lettered on the expired-message path;
/// unlike `MaxRetriesExceeded`/`UnknownTask`/`DeserializationFailed` (always dead-lettered),
/// `ExpiredMessage` is dead-lettered only when explicitly opted in.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutorOptions {
    pub dead_letter_expired_messages: bool,
}

/// Per-delivery executor: the single place that always writes exactly one terminal (or
/// in-flight) result to the backend before returning control to the worker.
#[derive(Clone)]
pub struct Executor {
    invoker: Invoker,
    serializer: Arc<dyn Serializer>,
    filters: FilterPipeline,
    result_backend: ResultBackendHandle,
    revocation: RevocationHandle,
    dead_letter: DeadLetterHandler,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(
        invoker: Invoker,
        serializer: Arc<dyn Serializer>,
        filters: FilterPipeline,
        result_backend: ResultBackendHandle,
        revocation: RevocationHandle,
        dead_letter: DeadLetterHandler,
        options: ExecutorOptions,
    ) -> Executor {
        Executor {
            invoker,
            serializer,
            filters,
            result_backend,
            revocation,
            dead_letter,
            options,
        }
    }

    /// Execute `message`, always storing a terminal or in-flight result before returning.
    pub async fn execute(
        &self,
        op_ctx: &Context,
        message: &TaskMessage,
        worker_token: &CancellationToken,
    ) -> Outcome {
        let started = Instant::now();

        match self.revocation.get(&message.id).await {
            Ok(Some(record)) => {
                let revoked = RevocationRequested {
                    task_id: message.id.clone(),
                    terminate: record.terminate,
                };
                slog::info!(op_ctx.logger, "revocation requested"; "error" => %revoked, "terminate" => record.terminate);
                self.store(TaskResult {
                    task_id: message.id.clone(),
                    state: TaskState::Revoked,
                    result: None,
                    exception: None,
                    completed_at: Some(Utc::now()),
                    duration: Some(started.elapsed()),
                    metadata: Default::default(),
                    retry_after: None,
                    requeue_delay: None,
                    do_not_increment_retries: false,
                })
                .await;
                return Outcome::Revoked;
            }
            Ok(None) => {}
            Err(error) => {
                let unavailable = StoreUnavailable {
                    store: "revocation".into(),
                    reason: error.to_string(),
                };
                slog::warn!(op_ctx.logger, "revocation check failed"; "error" => %unavailable);
            }
        }

        if let Some(expires) = message.expires {
            if expires < Utc::now() {
                self.store_rejected(message, started.elapsed()).await;
                if self.options.dead_letter_expired_messages {
                    self.dead_letter_handle(op_ctx, message, DeadLetterReason::ExpiredMessage, None, None).await;
                }
                return Outcome::Rejected;
            }
        }

        if self.invoker.registry().lookup(&message.task).is_none() {
            self.store_rejected(message, started.elapsed()).await;
            self.dead_letter_handle(
                op_ctx,
                message,
                DeadLetterReason::UnknownTask,
                Some("UnknownTask".into()),
                Some(format!("no handler registered for task '{}'", message.task)),
            )
            .await;
            return Outcome::Rejected;
        }

        let task_ctx = TaskContext::new(message, op_ctx.clone(), self.result_backend.clone());
        let mut filter_ctx = FilterContext::new(&task_ctx, &message.args, message.schema_version);
        let pre = self.filters.run_pre(&mut filter_ctx).await;

        let outcome = match pre.outcome {
            Err(error) => {
                self.filters.run_exception(pre.entered, &mut filter_ctx, &error).await;
                let _ = self.filters.run_post(pre.entered, &mut filter_ctx).await;
                if error.is::<SecurityViolation>() {
                    self.store_rejected_with_metadata(message, started.elapsed(), &error).await;
                    Outcome::Rejected
                } else {
                    self.classify_and_store(op_ctx, message, error).await
                }
            }
            Ok(PreOutcome::Requeue { delay }) => {
                let _ = self.filters.run_post(pre.entered, &mut filter_ctx).await;
                self.store_requeued(message, delay).await;
                Outcome::Requeued { delay }
            }
            Ok(PreOutcome::Skip { result }) => {
                let bytes = result.filter(|v| !v.is_null()).and_then(|v| self.serializer.serialize(&v).ok());
                self.store_success(message, bytes, started.elapsed()).await;
                let _ = self.filters.run_post(pre.entered, &mut filter_ctx).await;
                Outcome::Success
            }
            Ok(PreOutcome::Continue) => {
                self.result_backend
                    .update_state(&message.id, TaskState::Started, None)
                    .await
                    .ok();

                let invoke = self.invoker.invoke(&message.task, &message.args, self.serializer.as_ref(), &task_ctx);
                let invoke_result = tokio::select! {
                    result = invoke => Ok(result),
                    _ = worker_token.cancelled() => Err(()),
                };

                match invoke_result {
                    Err(()) => {
                        let _ = self.filters.run_post(self.filters.len(), &mut filter_ctx).await;
                        self.store_requeued(message, None).await;
                        Outcome::Requeued { delay: None }
                    }
                    Ok(Ok(bytes)) => {
                        self.store_success(message, Some(bytes), started.elapsed()).await;
                        let _ = self.filters.run_post(self.filters.len(), &mut filter_ctx).await;
                        Outcome::Success
                    }
                    Ok(Err(error)) => {
                        let handled = self.filters.run_exception(self.filters.len(), &mut filter_ctx, &error).await;
                        if handled {
                            self.store_success(message, None, started.elapsed()).await;
                            Outcome::Success
                        } else {
                            self.classify_and_store(op_ctx, message, error).await
                        }
                    }
                }
            }
        };

        outcome
    }

    async fn store(&self, result: TaskResult) {
        let _ = self.result_backend.store(result, None).await;
    }

    async fn store_success(&self, message: &TaskMessage, result: Option<Vec<u8>>, duration: Duration) {
        self.store(TaskResult {
            task_id: message.id.clone(),
            state: TaskState::Success,
            result,
            exception: None,
            completed_at: Some(Utc::now()),
            duration: Some(duration),
            metadata: Default::default(),
            retry_after: None,
            requeue_delay: None,
            do_not_increment_retries: false,
        })
        .await;
    }

    async fn store_rejected(&self, message: &TaskMessage, duration: Duration) {
        self.store(TaskResult {
            task_id: message.id.clone(),
            state: TaskState::Rejected,
            result: None,
            exception: None,
            completed_at: Some(Utc::now()),
            duration: Some(duration),
            metadata: Default::default(),
            retry_after: None,
            requeue_delay: None,
            do_not_increment_retries: false,
        })
        .await;
    }

    async fn store_rejected_with_metadata(&self, message: &TaskMessage, duration: Duration, error: &anyhow::Error) {
        let mut metadata = std::collections::HashMap::new();
        if let Some(violation) = error.downcast_ref::<SecurityViolation>() {
            metadata.insert(String::from("security"), violation.metadata.clone());
            metadata.insert(String::from("reason"), serde_json::json!(violation.reason));
        }
        self.store(TaskResult {
            task_id: message.id.clone(),
            state: TaskState::Rejected,
            result: None,
            exception: None,
            completed_at: Some(Utc::now()),
            duration: Some(duration),
            metadata,
            retry_after: None,
            requeue_delay: None,
            do_not_increment_retries: false,
        })
        .await;
    }

    async fn store_requeued(&self, message: &TaskMessage, delay: Option<Duration>) {
        self.store(TaskResult {
            task_id: message.id.clone(),
            state: TaskState::Requeued,
            result: None,
            exception: None,
            completed_at: None,
            duration: None,
            metadata: Default::default(),
            retry_after: None,
            requeue_delay: delay,
            do_not_increment_retries: false,
        })
        .await;
    }

    /// Classify a handler/pre-filter error and store the matching result before returning.
    async fn classify_and_store(&self, op_ctx: &Context, message: &TaskMessage, error: anyhow::Error) -> Outcome {
        if let Some(failed) = error.downcast_ref::<DeserializationFailed>() {
            let reason = failed.reason.clone();
            self.dead_letter_handle(
                op_ctx,
                message,
                DeadLetterReason::DeserializationFailed,
                Some("DeserializationFailed".into()),
                Some(reason.clone()),
            )
            .await;
            self.store_failure(message, "DeserializationFailed", reason).await;
            return Outcome::Failure;
        }

        if let Some(retry) = error.downcast_ref::<RetryRequest>() {
            if message.retries >= message.max_retries && !retry.do_not_increment_retries {
                self.dead_letter_handle(
                    op_ctx,
                    message,
                    DeadLetterReason::MaxRetriesExceeded,
                    Some("RetryRequest".into()),
                    retry.cause.clone(),
                )
                .await;
                self.store_failure(message, "RetryRequest", retry.cause.clone().unwrap_or_default()).await;
                return Outcome::Failure;
            }
            self.store(TaskResult {
                task_id: message.id.clone(),
                state: TaskState::Retry,
                result: None,
                exception: None,
                completed_at: None,
                duration: None,
                metadata: Default::default(),
                retry_after: retry.countdown,
                requeue_delay: None,
                do_not_increment_retries: retry.do_not_increment_retries,
            })
            .await;
            return Outcome::Retry {
                retry_after: retry.countdown,
                do_not_increment_retries: retry.do_not_increment_retries,
            };
        }

        let kind = "HandlerException";
        let message_text = error.to_string();
        self.store_failure(message, kind, message_text.clone()).await;

        if message.retries >= message.max_retries {
            self.dead_letter_handle(
                op_ctx,
                message,
                DeadLetterReason::MaxRetriesExceeded,
                Some(kind.to_string()),
                Some(message_text),
            )
            .await;
        }
        Outcome::Failure
    }

    async fn store_failure(&self, message: &TaskMessage, kind: &str, text: String) {
        self.store(TaskResult {
            task_id: message.id.clone(),
            state: TaskState::Failure,
            result: None,
            exception: Some(ExceptionInfo {
                kind: kind.to_string(),
                message: text,
                stack: None,
            }),
            completed_at: Some(Utc::now()),
            duration: None,
            metadata: Default::default(),
            retry_after: None,
            requeue_delay: None,
            do_not_increment_retries: false,
        })
        .await;
    }

    async fn dead_letter_handle(
        &self,
        op_ctx: &Context,
        message: &TaskMessage,
        reason: DeadLetterReason,
        exception_kind: Option<String>,
        exception_message: Option<String>,
    ) {
        let _ = self
            .dead_letter
            .handle(&op_ctx.logger, message.clone(), reason, exception_kind, exception_message, None)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dotcelery_coordination::MemoryRevocationStore;
    use dotcelery_model::JsonSerializer;
    use dotcelery_model::ResultBackend;
    use dotcelery_registry::Invoker;
    use dotcelery_registry::Task;
    use dotcelery_registry::TaskPolicy;
    use dotcelery_registry::TaskRegistry;
    use dotcelery_registry::TypedHandler;

    use super::*;

    #[derive(Default)]
    struct MemoryResults(Mutex<HashMap<String, TaskResult>>);

    #[async_trait]
    impl ResultBackend for MemoryResults {
        async fn store(&self, result: TaskResult, _expiry: Option<Duration>) -> anyhow::Result<()> {
            self.0.lock().unwrap().insert(result.task_id.clone(), result);
            Ok(())
        }
        async fn get(&self, task_id: &str) -> anyhow::Result<Option<TaskResult>> {
            Ok(self.0.lock().unwrap().get(task_id).cloned())
        }
        async fn wait_for(&self, _task_id: &str, _timeout: Option<Duration>) -> anyhow::Result<TaskResult> {
            unimplemented!()
        }
        async fn update_state(
            &self,
            task_id: &str,
            state: TaskState,
            _metadata: Option<HashMap<String, serde_json::Value>>,
        ) -> anyhow::Result<()> {
            if let Some(existing) = self.0.lock().unwrap().get_mut(task_id) {
                existing.state = state;
            } else {
                self.0.lock().unwrap().insert(
                    task_id.to_string(),
                    TaskResult {
                        task_id: task_id.to_string(),
                        state,
                        result: None,
                        exception: None,
                        completed_at: None,
                        duration: None,
                        metadata: Default::default(),
                        retry_after: None,
                        requeue_delay: None,
                        do_not_increment_retries: false,
                    },
                );
            }
            Ok(())
        }
        async fn get_state(&self, task_id: &str) -> anyhow::Result<Option<TaskState>> {
            Ok(self.0.lock().unwrap().get(task_id).map(|r| r.state))
        }
    }

    #[derive(serde::Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    struct AddTask;

    #[async_trait]
    impl Task for AddTask {
        type Input = Add;
        type Output = i64;

        async fn run(&self, _ctx: &TaskContext, input: Self::Input) -> anyhow::Result<Self::Output> {
            Ok(input.a + input.b)
        }
    }

    struct AlwaysRetryOnce(std::sync::atomic::AtomicBool);

    #[async_trait]
    impl Task for AlwaysRetryOnce {
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        async fn run(&self, ctx: &TaskContext, input: Self::Input) -> anyhow::Result<Self::Output> {
            if !self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(ctx.retry(None, Some("first attempt".into())));
            }
            Ok(input)
        }
    }

    fn build_executor(registry: TaskRegistry, results: Arc<MemoryResults>) -> Executor {
        Executor::new(
            Invoker::new(registry),
            Arc::new(JsonSerializer),
            FilterPipeline::new(vec![]),
            ResultBackendHandle::from_arc(results),
            RevocationHandle::new(MemoryRevocationStore::default()),
            DeadLetterHandler::unconfigured(),
            ExecutorOptions::default(),
        )
    }

    #[tokio::test]
    async fn happy_path_stores_success() {
        let mut builder = TaskRegistry::build();
        builder.register("math.add", TypedHandler::new(AddTask), TaskPolicy::default()).unwrap();
        let results = Arc::new(MemoryResults::default());
        let executor = build_executor(builder.finish(), results.clone());

        let message = TaskMessage::builder("math.add", "default")
            .id("t1")
            .args(serde_json::to_vec(&serde_json::json!({"a": 2, "b": 3})).unwrap())
            .finish()
            .unwrap();

        let outcome = executor.execute(&Context::fixture(), &message, &CancellationToken::new()).await;
        assert!(matches!(outcome, Outcome::Success));
        let stored = results.0.lock().unwrap().get("t1").cloned().unwrap();
        assert_eq!(stored.state, TaskState::Success);
        let value: i64 = serde_json::from_slice(&stored.result.unwrap()).unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let results = Arc::new(MemoryResults::default());
        let executor = build_executor(TaskRegistry::build().finish(), results.clone());
        let message = TaskMessage::builder("missing.task", "default").id("t1").finish().unwrap();
        let outcome = executor.execute(&Context::fixture(), &message, &CancellationToken::new()).await;
        assert!(matches!(outcome, Outcome::Rejected));
        assert_eq!(results.0.lock().unwrap().get("t1").unwrap().state, TaskState::Rejected);
    }

    #[tokio::test]
    async fn retry_request_does_not_count_as_failure() {
        let mut builder = TaskRegistry::build();
        builder
            .register(
                "flaky.task",
                TypedHandler::new(AlwaysRetryOnce(std::sync::atomic::AtomicBool::new(false))),
                TaskPolicy::default(),
            )
            .unwrap();
        let results = Arc::new(MemoryResults::default());
        let executor = build_executor(builder.finish(), results.clone());
        let message = TaskMessage::builder("flaky.task", "default").id("t1").finish().unwrap();
        let outcome = executor.execute(&Context::fixture(), &message, &CancellationToken::new()).await;
        assert!(matches!(outcome, Outcome::Retry { .. }));
        assert_eq!(results.0.lock().unwrap().get("t1").unwrap().state, TaskState::Retry);
    }

    #[tokio::test]
    async fn revoked_tasks_never_run_the_handler() {
        let mut builder = TaskRegistry::build();
        builder.register("math.add", TypedHandler::new(AddTask), TaskPolicy::default()).unwrap();
        let results = Arc::new(MemoryResults::default());
        let revocation = RevocationHandle::new(MemoryRevocationStore::default());
        revocation.revoke("t1", true, None, Duration::from_secs(60)).await.unwrap();
        let executor = Executor::new(
            Invoker::new(builder.finish()),
            Arc::new(JsonSerializer),
            FilterPipeline::new(vec![]),
            ResultBackendHandle::from_arc(results.clone()),
            revocation,
            DeadLetterHandler::unconfigured(),
            ExecutorOptions::default(),
        );
        let message = TaskMessage::builder("math.add", "default")
            .id("t1")
            .args(serde_json::to_vec(&serde_json::json!({"a": 1, "b": 1})).unwrap())
            .finish()
            .unwrap();
        let outcome = executor.execute(&Context::fixture(), &message, &CancellationToken::new()).await;
        assert!(matches!(outcome, Outcome::Revoked));
        assert_eq!(results.0.lock().unwrap().get("t1").unwrap().state, TaskState::Revoked);
    }
}
