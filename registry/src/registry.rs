//! Collection of task handler implementations known to the worker process.
use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::TaskHandler;
use crate::policy::TaskPolicy;

/// Error returned when a task name is registered more than once.
#[derive(Debug, thiserror::Error)]
#[error("task '{0}' is already registered")]
pub struct AlreadyRegistered(pub String);

/// Metadata attached to a task registration.
pub struct TaskDescriptor {
    /// Registered task name, unique within a [`TaskRegistry`].
    pub name: String,

    /// Handler invoked to execute the task.
    pub handler: Arc<dyn TaskHandler>,

    /// Policy descriptors (overlap prevention, partitioning) declared at registration time.
    pub policy: TaskPolicy,
}

/// Maps `taskName -> handler` for precompiled, reflection-free dispatch.
#[derive(Clone)]
pub struct TaskRegistry {
    entries: Arc<HashMap<String, TaskDescriptor>>,
}

impl TaskRegistry {
    /// Begin building an empty [`TaskRegistry`].
    pub fn build() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Lookup the descriptor for a task name.
    pub fn lookup(&self, name: &str) -> Option<&TaskDescriptor> {
        self.entries.get(name)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Incrementally builds a [`TaskRegistry`].
#[derive(Default)]
pub struct TaskRegistryBuilder {
    entries: HashMap<String, TaskDescriptor>,
}

impl TaskRegistryBuilder {
    /// Register a handler for `name`. Duplicate registration is an error, not a panic:
    /// it is a configuration mistake a process should be able to recover from
    /// (for example, when assembling a registry from multiple optional feature modules).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl TaskHandler + 'static,
        policy: TaskPolicy,
    ) -> Result<&mut Self, AlreadyRegistered> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(AlreadyRegistered(name));
        }
        let descriptor = TaskDescriptor {
            name: name.clone(),
            handler: Arc::new(handler),
            policy,
        };
        self.entries.insert(name, descriptor);
        Ok(self)
    }

    pub fn finish(self) -> TaskRegistry {
        TaskRegistry {
            entries: Arc::new(self.entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::context::TaskContext;
    use crate::handler::Task;
    use crate::handler::TypedHandler;

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        async fn run(&self, _ctx: &TaskContext, input: Self::Input) -> anyhow::Result<Self::Output> {
            Ok(input)
        }
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut builder = TaskRegistry::build();
        builder
            .register("echo", TypedHandler::new(Echo), TaskPolicy::default())
            .unwrap();
        let error = builder
            .register("echo", TypedHandler::new(Echo), TaskPolicy::default())
            .unwrap_err();
        assert_eq!(error.0, "echo");
    }

    #[test]
    fn lookup_finds_registered_task() {
        let mut builder = TaskRegistry::build();
        builder
            .register("echo", TypedHandler::new(Echo), TaskPolicy::default())
            .unwrap();
        let registry = builder.finish();
        assert!(registry.lookup("echo").is_some());
        assert!(registry.lookup("missing").is_none());
    }
}
