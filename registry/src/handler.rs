//! Type-erased task handler invocation.
//!
//! Dispatch must avoid per-call reflection: registration pre-captures the
//! serialize/deserialize adapters for a task's concrete input/output types by monomorphizing
//! [`TypedHandler`] once, at registration time, rather than branching on a type tag on every
//! invocation.
use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::TaskContext;

/// Async callback invoked to execute a task once its input has been resolved.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute task logic against a pre-resolved JSON input, returning a JSON output.
    ///
    /// `input` is `Value::Null` for tasks with no input.
    async fn invoke(&self, ctx: &TaskContext, input: serde_json::Value) -> Result<serde_json::Value>;
}

/// A strongly typed task body, adapted into a [`TaskHandler`] by [`TypedHandler`].
#[async_trait]
pub trait Task: Send + Sync {
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn run(&self, ctx: &TaskContext, input: Self::Input) -> Result<Self::Output>;
}

/// Adapts a strongly typed [`Task`] into the type-erased [`TaskHandler`] the registry stores.
///
/// The `Input`/`Output` bounds are resolved once when `TypedHandler::new` is called at
/// registration time; the object stored in the registry no longer carries the type parameters.
pub struct TypedHandler<T: Task> {
    inner: T,
    _marker: PhantomData<T>,
}

impl<T: Task> TypedHandler<T> {
    pub fn new(inner: T) -> Self {
        TypedHandler {
            inner,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task> TaskHandler for TypedHandler<T> {
    async fn invoke(&self, ctx: &TaskContext, input: serde_json::Value) -> Result<serde_json::Value> {
        let input: T::Input = serde_json::from_value(input).map_err(|error| dotcelery_errors::DeserializationFailed {
            task_id: ctx.task_id.clone(),
            reason: error.to_string(),
        })?;
        let output = self.inner.run(ctx, input).await?;
        Ok(serde_json::to_value(output)?)
    }
}
