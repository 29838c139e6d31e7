//! Task registry, invoker and the read-only per-invocation task context.
//!
//! Registry maps `taskName -> {handler, policy}`. Names are unique; duplicate registration is an
//! error. The invoker resolves an input value by deserializing with the registered content
//! type, then invokes the handler's entry point with `(input, context)`.
pub mod context;
#[cfg(any(test, feature = "test-fixture"))]
pub mod fixture;
pub mod handler;
pub mod invoker;
pub mod policy;
pub mod registry;

pub use self::context::TaskContext;
#[cfg(any(test, feature = "test-fixture"))]
pub use self::fixture::fixture_task_context;
#[cfg(any(test, feature = "test-fixture"))]
pub use self::fixture::NullResultBackend;
pub use self::handler::Task;
pub use self::handler::TaskHandler;
pub use self::handler::TypedHandler;
pub use self::invoker::Invoker;
pub use self::policy::OverlapKey;
pub use self::policy::OverlapPolicy;
pub use self::policy::PartitionPolicy;
pub use self::policy::RateLimitPolicy;
pub use self::policy::TaskPolicy;
pub use self::registry::AlreadyRegistered;
pub use self::registry::TaskDescriptor;
pub use self::registry::TaskRegistry;
pub use self::registry::TaskRegistryBuilder;
