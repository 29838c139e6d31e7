//! Mutable per-invocation state threaded through the filter pipeline.
use std::collections::HashMap;
use std::time::Duration;

use dotcelery_registry::TaskContext;

/// Scratch space shared by every filter that runs against a single delivery.
///
/// Wraps the read-only [`TaskContext`] with the mutable signals filters use to influence
/// the executor: `properties` is a free-form bag filters use to pass data to each other
/// (for example, a computed idempotency key); `skip_execution`/`skip_result` let a filter
/// short-circuit the handler invocation with a synthesized result; `requeue_message`/
/// `requeue_delay` ask the executor to return the delivery to the broker instead.
pub struct FilterContext<'a> {
    pub task: &'a TaskContext,

    /// Raw, not-yet-deserialized payload bytes for the delivery.
    ///
    /// Filters run before step 5 of the executor, so
    /// built-in filters that need to look at the payload (payload size checks, single-flight
    /// content hashing) work against these bytes directly rather than waiting on the
    /// registered handler's typed input.
    pub args: &'a [u8],

    /// `schemaVersion` carried by the envelope, exposed here (rather than on the handler-facing
    /// `TaskContext`) since only built-in security filters need it.
    pub schema_version: u32,

    pub properties: HashMap<String, serde_json::Value>,
    pub skip_execution: bool,
    pub skip_result: Option<serde_json::Value>,
    pub requeue_message: bool,
    pub requeue_delay: Option<Duration>,
}

impl<'a> FilterContext<'a> {
    pub fn new(task: &'a TaskContext, args: &'a [u8], schema_version: u32) -> FilterContext<'a> {
        FilterContext {
            task,
            args,
            schema_version,
            properties: HashMap::new(),
            skip_execution: false,
            skip_result: None,
            requeue_message: false,
            requeue_delay: None,
        }
    }

    /// Request that the executor skip invoking the handler and use `result` instead.
    pub fn skip_with_result(&mut self, result: serde_json::Value) {
        self.skip_execution = true;
        self.skip_result = Some(result);
    }

    /// Request that the executor skip invoking the handler with no synthetic result.
    pub fn skip(&mut self) {
        self.skip_execution = true;
    }

    /// Request that the executor requeue the delivery instead of running it.
    pub fn requeue(&mut self, delay: Option<Duration>) {
        self.requeue_message = true;
        self.requeue_delay = delay;
    }
}
