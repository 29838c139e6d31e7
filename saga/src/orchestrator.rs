//! Drives a [`Saga`] through its steps, publishing each step's task and reacting to
//! completion signals to advance or compensate.
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use dotcelery_context::Context;
use dotcelery_model::Broker;
use dotcelery_model::Saga;
use dotcelery_model::SagaState;
use dotcelery_model::SagaStep;
use dotcelery_model::SagaStepState;
use dotcelery_model::Signature;
use dotcelery_model::TaskMessage;

use crate::signal::SignalBus;
use crate::signal::SignalOutcome;
use crate::signal::TaskCompletionSignal;
use crate::store::SagaStoreHandle;

/// Coordinates saga execution: publishing step tasks and reacting to their completion.
///
/// `auto_compensate_on_failure` mirrors `saga.autoCompensateOnFailure`: when
/// unset, a failed execute step leaves the saga in `Failed` without rolling back prior steps.
pub struct SagaOrchestrator {
    store: SagaStoreHandle,
    broker: Arc<dyn Broker>,
    auto_compensate_on_failure: bool,
}

impl SagaOrchestrator {
    pub fn new(store: SagaStoreHandle, broker: Arc<dyn Broker>, auto_compensate_on_failure: bool) -> Self {
        SagaOrchestrator {
            store,
            broker,
            auto_compensate_on_failure,
        }
    }

    /// Persist a new saga and publish its first step.
    pub async fn start(&self, ctx: &Context, name: impl Into<String>, steps: Vec<SagaStep>, correlation_id: Option<String>) -> Result<Saga> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut saga = Saga::new(id, name, steps, correlation_id);
        saga.state = SagaState::Executing;
        self.publish_current_step(ctx, &mut saga).await?;
        self.store.insert(saga.clone()).await?;
        Ok(saga)
    }

    /// Request cancellation: if any step has completed, compensate them; otherwise cancel
    /// outright.
    pub async fn cancel(&self, ctx: &Context, saga_id: &str) -> Result<Option<Saga>> {
        let mut saga = match self.store.get(saga_id).await? {
            Some(saga) => saga,
            None => return Ok(None),
        };
        if saga.steps.iter().any(|step| step.state == SagaStepState::Completed) {
            saga.state = SagaState::Compensating;
            self.publish_next_compensation_or_finalize(ctx, &mut saga).await?;
        } else {
            saga.state = SagaState::Cancelled;
            saga.completed_at = Some(Utc::now());
        }
        self.store.update(saga.clone()).await?;
        Ok(Some(saga))
    }

    /// Reset the current step to `Pending` and republish its execute task.
    pub async fn retry_current_step(&self, ctx: &Context, saga_id: &str) -> Result<Option<Saga>> {
        let mut saga = match self.store.get(saga_id).await? {
            Some(saga) => saga,
            None => return Ok(None),
        };
        if let Some(step) = saga.current_step_mut() {
            step.state = SagaStepState::Pending;
            step.error = None;
        }
        self.publish_current_step(ctx, &mut saga).await?;
        self.store.update(saga.clone()).await?;
        Ok(Some(saga))
    }

    /// React to a task completion signal, advancing or compensating the owning saga.
    pub async fn handle_signal(&self, ctx: &Context, signal: &TaskCompletionSignal) -> Result<Option<Saga>> {
        let mut saga = match self.store.find_by_task_id(&signal.task_id).await? {
            Some(saga) => saga,
            None => return Ok(None),
        };

        let is_compensation = saga
            .steps
            .iter()
            .any(|step| step.compensate_task_id.as_deref() == Some(signal.task_id.as_str()));

        if is_compensation {
            self.handle_compensation_signal(ctx, &mut saga, signal).await?;
        } else {
            self.handle_execute_signal(ctx, &mut saga, signal).await?;
        }

        self.store.update(saga.clone()).await?;
        Ok(Some(saga))
    }

    async fn handle_execute_signal(&self, ctx: &Context, saga: &mut Saga, signal: &TaskCompletionSignal) -> Result<()> {
        match &signal.outcome {
            SignalOutcome::Success { result } => {
                if let Some(step) = saga.current_step_mut() {
                    if step.execute_task_id.as_deref() == Some(signal.task_id.as_str()) {
                        step.state = SagaStepState::Completed;
                        step.result = Some(result.clone());
                    }
                }
                if saga.state == SagaState::Executing {
                    saga.current_step_index += 1;
                    if saga.current_step_index >= saga.steps.len() {
                        saga.state = SagaState::Completed;
                        saga.completed_at = Some(Utc::now());
                    } else {
                        self.publish_current_step(ctx, saga).await?;
                    }
                }
            }
            SignalOutcome::Failure { exception } => {
                self.fail_current_step(ctx, saga, exception.message.clone()).await?;
            }
            SignalOutcome::Revoked => {
                self.fail_current_step(ctx, saga, "revoked".to_string()).await?;
            }
            SignalOutcome::Rejected => {
                self.fail_current_step(ctx, saga, "rejected".to_string()).await?;
            }
        }
        Ok(())
    }

    async fn fail_current_step(&self, ctx: &Context, saga: &mut Saga, reason: String) -> Result<()> {
        if let Some(step) = saga.current_step_mut() {
            step.state = SagaStepState::Failed;
            step.error = Some(reason.clone());
        }
        saga.failure_reason = Some(reason);
        if self.auto_compensate_on_failure {
            saga.state = SagaState::Compensating;
            self.publish_next_compensation_or_finalize(ctx, saga).await?;
        } else {
            saga.state = SagaState::Failed;
            saga.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn handle_compensation_signal(&self, ctx: &Context, saga: &mut Saga, signal: &TaskCompletionSignal) -> Result<()> {
        let step = saga
            .steps
            .iter_mut()
            .find(|step| step.compensate_task_id.as_deref() == Some(signal.task_id.as_str()));
        match (&signal.outcome, step) {
            (SignalOutcome::Success { .. }, Some(step)) => {
                step.state = SagaStepState::Compensated;
            }
            (_, Some(step)) => {
                step.state = SagaStepState::CompensationFailed;
            }
            (_, None) => {}
        }
        self.publish_next_compensation_or_finalize(ctx, saga).await
    }

    /// Publish the next eligible compensation, or finalize the saga if none remain.
    async fn publish_next_compensation_or_finalize(&self, ctx: &Context, saga: &mut Saga) -> Result<()> {
        match saga.next_compensation_step() {
            Some(step) => {
                let message = publish_signature(&self.broker, step.compensate_task.clone().expect("compensable() guarantees Some")).await?;
                step.compensate_task_id = Some(message.id);
                step.state = SagaStepState::Compensating;
            }
            None => {
                let any_failed = saga.steps.iter().any(|step| step.state == SagaStepState::CompensationFailed);
                saga.state = if any_failed { SagaState::CompensationFailed } else { SagaState::Compensated };
                saga.completed_at = Some(Utc::now());
                slog::info!(
                    ctx.logger, "saga compensation finished";
                    "saga_id" => &saga.id, "state" => format!("{:?}", saga.state),
                );
            }
        }
        Ok(())
    }

    /// Drain a [`SignalBus`] and drive [`handle_signal`](Self::handle_signal) off of it until
    /// `shutdown` is cancelled. Intended to run as its own supervised task alongside the worker
    ///.
    pub async fn run(&self, ctx: &Context, bus: &SignalBus, shutdown: &CancellationToken) {
        let mut signals = Box::pin(bus.subscribe());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = signals.next() => {
                    let Some(signal) = next else { break };
                    if let Err(error) = self.handle_signal(ctx, &signal).await {
                        slog::warn!(
                            ctx.logger, "saga signal handling failed";
                            "task_id" => &signal.task_id, "error" => %error,
                        );
                    }
                }
            }
        }
    }

    async fn publish_current_step(&self, ctx: &Context, saga: &mut Saga) -> Result<()> {
        let index = saga.current_step_index;
        let signature = match saga.steps.get(index) {
            Some(step) => step.execute_task.clone(),
            None => return Ok(()),
        };
        let message = publish_signature(&self.broker, signature).await?;
        let step = &mut saga.steps[index];
        step.execute_task_id = Some(message.id);
        step.state = SagaStepState::Executing;
        slog::debug!(ctx.logger, "saga published step"; "saga_id" => &saga.id, "step" => &step.name);
        Ok(())
    }
}

async fn publish_signature(broker: &Arc<dyn Broker>, signature: Signature) -> Result<TaskMessage> {
    let message = TaskMessage::builder(signature.task, signature.queue).args(signature.args).finish()?;
    broker.publish(message.clone()).await?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dotcelery_model::BrokerMessage;
    use dotcelery_model::ExceptionInfo;

    use super::*;
    use crate::store::MemorySagaStore;

    #[derive(Default)]
    struct RecordingBroker {
        published: Mutex<Vec<TaskMessage>>,
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn publish(&self, message: TaskMessage) -> Result<()> {
            self.published.lock().unwrap().push(message);
            Ok(())
        }
        async fn consume(&self, _queues: &[String], _prefetch: usize) -> Result<BrokerMessage> {
            unimplemented!()
        }
        async fn ack(&self, _message: &BrokerMessage) -> Result<()> {
            Ok(())
        }
        async fn reject(&self, _message: &BrokerMessage, _requeue: bool) -> Result<()> {
            Ok(())
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    fn step(order: i64, name: &str, compensate: bool) -> SagaStep {
        SagaStep {
            id: format!("step-{order}"),
            order,
            name: name.to_string(),
            execute_task: Signature {
                task: format!("{name}.execute"),
                queue: "default".into(),
                args: Vec::new(),
            },
            compensate_task: compensate.then(|| Signature {
                task: format!("{name}.compensate"),
                queue: "default".into(),
                args: Vec::new(),
            }),
            execute_task_id: None,
            compensate_task_id: None,
            state: SagaStepState::Pending,
            result: None,
            error: None,
        }
    }

    fn success(task_id: &str) -> TaskCompletionSignal {
        TaskCompletionSignal {
            task_id: task_id.to_string(),
            outcome: SignalOutcome::Success { result: Vec::new() },
        }
    }

    fn failure(task_id: &str) -> TaskCompletionSignal {
        TaskCompletionSignal {
            task_id: task_id.to_string(),
            outcome: SignalOutcome::Failure {
                exception: ExceptionInfo {
                    kind: "boom".into(),
                    message: "boom".into(),
                    stack: None,
                },
            },
        }
    }

    #[tokio::test]
    async fn three_step_saga_completes_in_order() {
        let store = SagaStoreHandle::new(MemorySagaStore::default());
        let broker = Arc::new(RecordingBroker::default());
        let orchestrator = SagaOrchestrator::new(store.clone(), broker.clone(), true);

        let saga = orchestrator
            .start(
                &Context::fixture(),
                "demo",
                vec![step(1, "a", true), step(2, "b", true), step(3, "c", true)],
                None,
            )
            .await
            .unwrap();
        assert_eq!(saga.state, SagaState::Executing);

        let first_id = saga.steps[0].execute_task_id.clone().unwrap();
        let saga = orchestrator.handle_signal(&Context::fixture(), &success(&first_id)).await.unwrap().unwrap();
        assert_eq!(saga.steps[0].state, SagaStepState::Completed);
        assert_eq!(saga.current_step_index, 1);

        let second_id = saga.steps[1].execute_task_id.clone().unwrap();
        let saga = orchestrator.handle_signal(&Context::fixture(), &success(&second_id)).await.unwrap().unwrap();
        assert_eq!(saga.current_step_index, 2);

        let third_id = saga.steps[2].execute_task_id.clone().unwrap();
        let saga = orchestrator.handle_signal(&Context::fixture(), &success(&third_id)).await.unwrap().unwrap();
        assert_eq!(saga.state, SagaState::Completed);
    }

    #[tokio::test]
    async fn failure_on_second_step_compensates_completed_steps_in_descending_order() {
        let store = SagaStoreHandle::new(MemorySagaStore::default());
        let broker = Arc::new(RecordingBroker::default());
        let orchestrator = SagaOrchestrator::new(store.clone(), broker.clone(), true);

        let saga = orchestrator
            .start(
                &Context::fixture(),
                "demo",
                vec![step(1, "a", true), step(2, "b", true), step(3, "c", true)],
                None,
            )
            .await
            .unwrap();

        let first_id = saga.steps[0].execute_task_id.clone().unwrap();
        let saga = orchestrator.handle_signal(&Context::fixture(), &success(&first_id)).await.unwrap().unwrap();

        let second_id = saga.steps[1].execute_task_id.clone().unwrap();
        let saga = orchestrator.handle_signal(&Context::fixture(), &failure(&second_id)).await.unwrap().unwrap();
        assert_eq!(saga.steps[1].state, SagaStepState::Failed);
        assert_eq!(saga.steps[2].state, SagaStepState::Pending, "step 3 never executed");
        assert_eq!(saga.state, SagaState::Compensating);

        let compensate_id = saga.steps[0].compensate_task_id.clone().unwrap();
        let saga = orchestrator.handle_signal(&Context::fixture(), &success(&compensate_id)).await.unwrap().unwrap();
        assert_eq!(saga.steps[0].state, SagaStepState::Compensated);
        assert_eq!(saga.state, SagaState::Compensated);

        let published = broker.published.lock().unwrap();
        assert_eq!(published.iter().filter(|m| m.task == "a.compensate").count(), 1, "compensate task runs exactly once");
    }

    #[tokio::test]
    async fn run_drains_the_signal_bus_until_shutdown() {
        let store = SagaStoreHandle::new(MemorySagaStore::default());
        let broker = Arc::new(RecordingBroker::default());
        let orchestrator = Arc::new(SagaOrchestrator::new(store, broker.clone(), true));
        let bus = SignalBus::new();
        let shutdown = CancellationToken::new();

        let saga = orchestrator
            .start(&Context::fixture(), "demo", vec![step(1, "a", false)], None)
            .await
            .unwrap();
        let task_id = saga.steps[0].execute_task_id.clone().unwrap();

        let driven = orchestrator.clone();
        let driver_shutdown = shutdown.clone();
        let driver_bus = bus.clone();
        let handle = tokio::spawn(async move {
            driven.run(&Context::fixture(), &driver_bus, &driver_shutdown).await;
        });

        bus.publish(success(&task_id));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let saga = store_completed_state(&orchestrator, &saga.id).await;
        assert_eq!(saga.state, SagaState::Completed);
    }

    async fn store_completed_state(orchestrator: &SagaOrchestrator, saga_id: &str) -> Saga {
        orchestrator.store.get(saga_id).await.unwrap().unwrap()
    }
}
