//! Distributed coordination primitives consumed by the filter pipeline and the worker:
//! partition lock, execution tracker (single-flight), sliding-window
//! rate limiter, kill switch, revocation store and dead-letter handler.
//!
//! Partition lock and execution tracker are CAS-on-holder stores generalised from a
//! single-process non-blocking lock to a holder-tagged, auto-expiring row so multiple worker
//! processes can coordinate through a shared store. The kill switch is the one primitive that
//! is *not* store-backed: its sliding window is in-process, guarded state, so it lives
//! entirely in this crate's memory.
pub mod dead_letter;
pub mod execution_tracker;
pub mod kill_switch;
pub mod partition_lock;
pub mod rate_limiter;
pub mod revocation;
pub mod security;
pub mod tenant;

pub use self::dead_letter::DeadLetterHandler;
pub use self::dead_letter::DeadLetterReason;
pub use self::dead_letter::DeadLetterRecord;
pub use self::dead_letter::MemoryDeadLetterStore;
pub use self::dead_letter::DeadLetterStore;
pub use self::execution_tracker::ExecutionTrackerHandle;
pub use self::execution_tracker::ExecutionTrackerStore;
pub use self::execution_tracker::MemoryExecutionTrackerStore;
pub use self::execution_tracker::PreventOverlappingFilter;
pub use self::kill_switch::KillSwitch;
pub use self::kill_switch::KillSwitchState;
pub use self::partition_lock::MemoryPartitionLockStore;
pub use self::partition_lock::PartitionLockHandle;
pub use self::partition_lock::PartitionLockStore;
pub use self::partition_lock::PartitionedExecutionFilter;
pub use self::rate_limiter::AcquireOutcome;
pub use self::rate_limiter::MemoryRateLimiterStore;
pub use self::rate_limiter::RateLimitPolicy;
pub use self::rate_limiter::RateLimiter;
pub use self::rate_limiter::RateLimiterFilter;
pub use self::rate_limiter::RateLimiterHandle;
pub use self::rate_limiter::RateLimiterStore;
pub use self::revocation::MemoryRevocationStore;
pub use self::revocation::RevocationEvent;
pub use self::revocation::RevocationHandle;
pub use self::revocation::RevocationStore;
pub use self::security::SecurityValidationFilter;
pub use self::tenant::TenantContextFilter;
