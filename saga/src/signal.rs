//! The completion signal the orchestrator reacts to, and the bus that delivers it.
use dotcelery_model::ExceptionInfo;
use dotcelery_model::TaskResult;
use dotcelery_model::TaskState;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tokio_stream::StreamExt;

/// Outcome of a single step's task, as reported by whatever publishes completion signals
/// (typically the executor's result backend, via a change feed or direct notification).
#[derive(Clone, Debug, PartialEq)]
pub enum SignalOutcome {
    Success { result: Vec<u8> },
    Failure { exception: ExceptionInfo },
    Revoked,
    Rejected,
}

/// A task completion event routed to the orchestrator by `task_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskCompletionSignal {
    pub task_id: String,
    pub outcome: SignalOutcome,
}

impl TaskCompletionSignal {
    /// Build a signal from a terminal [`TaskResult`], or `None` for a non-terminal state
    ///.
    pub fn from_result(result: &TaskResult) -> Option<Self> {
        let outcome = match result.state {
            TaskState::Success => SignalOutcome::Success {
                result: result.result.clone().unwrap_or_default(),
            },
            TaskState::Failure => SignalOutcome::Failure {
                exception: result.exception.clone().unwrap_or(ExceptionInfo {
                    kind: "Unknown".into(),
                    message: String::new(),
                    stack: None,
                }),
            },
            TaskState::Revoked => SignalOutcome::Revoked,
            TaskState::Rejected => SignalOutcome::Rejected,
            _ => return None,
        };
        Some(TaskCompletionSignal {
            task_id: result.task_id.clone(),
            outcome,
        })
    }
}

/// An in-process fan-out of completion signals from
/// wherever terminal [`TaskResult`]s are recorded (see [`crate::SignalingResultBackend`]) to
/// one or more [`crate::SagaOrchestrator`] listeners, mirroring the broadcast shape of
/// `dotcelery_coordination::RevocationHandle`.
#[derive(Clone)]
pub struct SignalBus {
    sender: tokio::sync::broadcast::Sender<TaskCompletionSignal>,
}

impl Default for SignalBus {
    fn default() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(1024);
        SignalBus { sender }
    }
}

impl SignalBus {
    pub fn new() -> Self {
        SignalBus::default()
    }

    /// Publish a signal. Silently dropped if there are currently no subscribers.
    pub fn publish(&self, signal: TaskCompletionSignal) {
        let _ = self.sender.send(signal);
    }

    /// An asynchronous stream of completion signals, for a saga-dispatch loop to drive
    /// [`crate::SagaOrchestrator::handle_signal`].
    pub fn subscribe(&self) -> impl Stream<Item = TaskCompletionSignal> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| item.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_terminal_states_produce_no_signal() {
        let mut result = TaskResult::pending("t1");
        assert!(TaskCompletionSignal::from_result(&result).is_none());
        result.state = TaskState::Started;
        assert!(TaskCompletionSignal::from_result(&result).is_none());
    }

    #[test]
    fn success_state_produces_a_success_signal() {
        let result = TaskResult::success("t1", b"hi".to_vec(), std::time::Duration::from_millis(5));
        let signal = TaskCompletionSignal::from_result(&result).unwrap();
        assert_eq!(signal.task_id, "t1");
        assert_eq!(signal.outcome, SignalOutcome::Success { result: b"hi".to_vec() });
    }

    #[tokio::test]
    async fn published_signals_reach_subscribers() {
        let bus = SignalBus::new();
        let mut stream = Box::pin(bus.subscribe());
        bus.publish(TaskCompletionSignal {
            task_id: "t1".into(),
            outcome: SignalOutcome::Revoked,
        });
        let received = stream.next().await.unwrap();
        assert_eq!(received.task_id, "t1");
        assert_eq!(received.outcome, SignalOutcome::Revoked);
    }
}
