//! Resolves input, dispatches to the registered handler, and serializes the output.
use anyhow::Result;

use dotcelery_errors::DeserializationFailed;
use dotcelery_errors::UnknownTask;
use dotcelery_model::Serializer;

use crate::context::TaskContext;
use crate::registry::TaskRegistry;

/// Resolves registered task handlers and invokes them with deserialized input.
#[derive(Clone)]
pub struct Invoker {
    registry: TaskRegistry,
}

impl Invoker {
    pub fn new(registry: TaskRegistry) -> Invoker {
        Invoker { registry }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Deserialize `args` with `serializer`, invoke the handler registered for `task_name`,
    /// and serialize its output back with the same serializer.
    pub async fn invoke(
        &self,
        task_name: &str,
        args: &[u8],
        serializer: &dyn Serializer,
        ctx: &TaskContext,
    ) -> Result<Vec<u8>> {
        let descriptor = self.registry.lookup(task_name).ok_or_else(|| UnknownTask {
            task: task_name.to_string(),
        })?;
        let input = if args.is_empty() {
            serde_json::Value::Null
        } else {
            serializer.deserialize(args).map_err(|error| DeserializationFailed {
                task_id: ctx.task_id.clone(),
                reason: error.to_string(),
            })?
        };
        let output = descriptor.handler.invoke(ctx, input).await?;
        if output.is_null() {
            Ok(Vec::new())
        } else {
            serializer.serialize(&output)
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use dotcelery_model::JsonSerializer;

    use super::*;
    use crate::context::TaskContext;
    use crate::handler::Task;
    use crate::handler::TypedHandler;
    use crate::policy::TaskPolicy;
    use crate::registry::TaskRegistry;

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

    fn fixture_context(task_id: &str) -> TaskContext {
        use dotcelery_model::ResultBackendHandle;
        use dotcelery_model::TaskMessage;

        struct NullBackend;
        #[async_trait::async_trait]
        impl dotcelery_model::ResultBackend for NullBackend {
            async fn store(
                &self,
                _result: dotcelery_model::TaskResult,
                _expiry: Option<std::time::Duration>,
            ) -> anyhow::Result<()> {
                Ok(())
            }
            async fn get(&self, _task_id: &str) -> anyhow::Result<Option<dotcelery_model::TaskResult>> {
                Ok(None)
            }
            async fn wait_for(
                &self,
                _task_id: &str,
                _timeout: Option<std::time::Duration>,
            ) -> anyhow::Result<dotcelery_model::TaskResult> {
                unimplemented!()
            }
            async fn update_state(
                &self,
                _task_id: &str,
                _state: dotcelery_model::TaskState,
                _metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
            ) -> anyhow::Result<()> {
                Ok(())
            }
            async fn get_state(&self, _task_id: &str) -> anyhow::Result<Option<dotcelery_model::TaskState>> {
                Ok(None)
            }
        }

        let message = TaskMessage::builder("math.add", "default")
            .id(task_id)
            .finish()
            .unwrap();
        TaskContext::new(
            &message,
            dotcelery_context::Context::fixture(),
            ResultBackendHandle::new(NullBackend),
        )
    }

    #[tokio::test]
    async fn invokes_registered_handler_with_deserialized_input() {
        let mut builder = TaskRegistry::build();
        builder
            .register("math.add", TypedHandler::new(AddTask), TaskPolicy::default())
            .unwrap();
        let invoker = Invoker::new(builder.finish());
        let serializer = JsonSerializer;
        let args = serializer.serialize(&serde_json::json!({"a": 2, "b": 3})).unwrap();
        let ctx = fixture_context("t1");

        let output = invoker
            .invoke("math.add", &args, &serializer, &ctx)
            .await
            .unwrap();
        let decoded: i64 = serde_json::from_slice(&output).unwrap();
        assert_eq!(decoded, 5);
    }

    #[tokio::test]
    async fn unknown_task_is_reported() {
        let invoker = Invoker::new(TaskRegistry::build().finish());
        let serializer = JsonSerializer;
        let ctx = fixture_context("t1");
        let error = invoker
            .invoke("missing.task", &[], &serializer, &ctx)
            .await
            .unwrap_err();
        assert!(error.is::<UnknownTask>());
    }
}
