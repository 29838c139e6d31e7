//! In-memory reference implementations of the pluggable broker and result backend,
//! suitable for single-process deployments, local development, and tests.
//!
//! The other pluggable stores (partition lock, execution tracker, revocation, rate limiter,
//! dead-letter, delay, outbox/inbox, saga) ship their in-memory variants alongside their
//! traits in their owning crates; this crate covers the two that have no natural owner.
mod broker;
mod result_backend;

pub use self::broker::MemoryBroker;
pub use self::result_backend::MemoryResultBackend;
