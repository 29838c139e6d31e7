//! Policy descriptors published at registration time.
//!
//! Attribute-driven policy discovery (e.g. `PreventOverlapping`) needs re-architecting away
//! from runtime reflection: policies are declared
//! explicitly when a task is registered, and filters read the descriptor directly instead of
//! scanning attributes.

/// How the single-flight lock key's `userKey` component is derived for a task invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OverlapKey {
    /// Lock at the task level: `userKey` is absent.
    TaskLevel,
    /// Use a named property out of the deserialized input.
    InputProperty(String),
    /// Use a stable content hash of the whole input.
    ContentHash,
}

/// Single-flight ("prevent overlapping") policy for a task.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlapPolicy {
    pub key: OverlapKey,
    pub timeout: std::time::Duration,
}

impl OverlapPolicy {
    pub fn task_level(timeout: std::time::Duration) -> Self {
        OverlapPolicy {
            key: OverlapKey::TaskLevel,
            timeout,
        }
    }
}

/// Partitioned execution policy for a task: serializes execution per `partitionKey`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionPolicy {
    pub enabled: bool,
}

/// Sliding-window rate-limit policy for a task.
///
/// `resource_key` defaults to the task name when absent, so tasks sharing a key contend for
/// the same budget (e.g. multiple task names hitting one downstream API).
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitPolicy {
    pub resource_key: Option<String>,
    pub limit: usize,
    pub window: std::time::Duration,
}

impl RateLimitPolicy {
    pub fn task_level(limit: usize, window: std::time::Duration) -> Self {
        RateLimitPolicy {
            resource_key: None,
            limit,
            window,
        }
    }
}

/// Policy descriptors attached to a task registration.
#[derive(Clone, Debug, Default)]
pub struct TaskPolicy {
    pub overlap: Option<OverlapPolicy>,
    pub partition: PartitionPolicy,
    pub rate_limit: Option<RateLimitPolicy>,
}
