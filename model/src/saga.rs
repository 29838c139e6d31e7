//! Workflow records for the saga orchestrator: ordered, compensatable task sequences.
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Lifecycle state of a [`Saga`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SagaState {
    Created,
    Executing,
    Completed,
    Compensating,
    Compensated,
    Failed,
    CompensationFailed,
    Cancelled,
}

/// Lifecycle state of a single [`SagaStep`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SagaStepState {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

/// A reference to a registered task plus the payload to invoke it with.
///
/// Enough information to submit the task
/// without re-resolving the saga definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub task: String,
    pub queue: String,
    pub args: Vec<u8>,
}

/// A single ordered step of a [`Saga`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub id: String,
    pub order: i64,
    pub name: String,
    pub execute_task: Signature,
    pub compensate_task: Option<Signature>,
    pub execute_task_id: Option<String>,
    pub compensate_task_id: Option<String>,
    pub state: SagaStepState,
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl SagaStep {
    /// A step is eligible for compensation once it has completed and declares a compensation.
    pub fn compensable(&self) -> bool {
        self.state == SagaStepState::Completed && self.compensate_task.is_some()
    }
}

/// An orchestrated, compensatable sequence of tasks.
///
/// Invariant: compensation runs over completed steps in strictly descending
/// `order`; execution runs in strictly ascending `order`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    pub id: String,
    pub name: String,
    pub state: SagaState,
    pub steps: Vec<SagaStep>,
    pub current_step_index: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub correlation_id: Option<String>,
}

impl Saga {
    /// Create a new saga in the `Created` state with the given ordered steps.
    ///
    /// Steps are sorted by `order` ascending so callers do not need to pre-sort them.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mut steps: Vec<SagaStep>,
        correlation_id: Option<String>,
    ) -> Saga {
        steps.sort_by_key(|step| step.order);
        Saga {
            id: id.into(),
            name: name.into(),
            state: SagaState::Created,
            steps,
            current_step_index: 0,
            started_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
            correlation_id,
        }
    }

    /// The step the orchestrator is currently waiting on, if any.
    pub fn current_step(&self) -> Option<&SagaStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut SagaStep> {
        self.steps.get_mut(self.current_step_index)
    }

    /// Progress as `(completed, total)`.
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .steps
            .iter()
            .filter(|step| step.state == SagaStepState::Completed)
            .count();
        (completed, self.steps.len())
    }

    /// The next eligible step to compensate: the highest-order remaining completed step
    /// that declares a compensation and has not already been compensated.
    pub fn next_compensation_step(&mut self) -> Option<&mut SagaStep> {
        self.steps
            .iter_mut()
            .filter(|step| step.compensable())
            .max_by_key(|step| step.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(order: i64, state: SagaStepState, compensate: bool) -> SagaStep {
        SagaStep {
            id: format!("step-{order}"),
            order,
            name: format!("step-{order}"),
            execute_task: Signature {
                task: "noop".into(),
                queue: "default".into(),
                args: Vec::new(),
            },
            compensate_task: compensate.then(|| Signature {
                task: "noop.undo".into(),
                queue: "default".into(),
                args: Vec::new(),
            }),
            execute_task_id: None,
            compensate_task_id: None,
            state,
            result: None,
            error: None,
        }
    }

    #[test]
    fn steps_are_sorted_by_order() {
        let saga = Saga::new(
            "saga-1",
            "demo",
            vec![
                step(3, SagaStepState::Pending, false),
                step(1, SagaStepState::Pending, false),
                step(2, SagaStepState::Pending, false),
            ],
            None,
        );
        let orders: Vec<_> = saga.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn compensation_picks_highest_order_completed_step() {
        let mut saga = Saga::new(
            "saga-1",
            "demo",
            vec![
                step(1, SagaStepState::Completed, true),
                step(2, SagaStepState::Completed, true),
                step(3, SagaStepState::Failed, true),
            ],
            None,
        );
        let next = saga.next_compensation_step().unwrap();
        assert_eq!(next.order, 2);
    }

    #[test]
    fn progress_counts_completed_steps() {
        let saga = Saga::new(
            "saga-1",
            "demo",
            vec![
                step(1, SagaStepState::Completed, false),
                step(2, SagaStepState::Pending, false),
            ],
            None,
        );
        assert_eq!(saga.progress(), (1, 2));
    }
}
