//! Per-delivery task executor: revocation and expiry checks, the filter
//! pipeline, handler invocation, and outcome classification for the worker to act on.
mod executor;
mod outcome;

pub use self::executor::Executor;
pub use self::executor::ExecutorOptions;
pub use self::outcome::Outcome;
