//! Transactional outbox: staged rows are dispatched to the broker in strict
//! `sequence_number` order, and the paired inbox filter deduplicates at-least-once redelivery.
mod dispatcher;
mod inbox;
mod store;

pub use self::dispatcher::OutboxDispatcher;
pub use self::inbox::InboxFilter;
pub use self::inbox::InboxHandle;
pub use self::inbox::InboxStore;
pub use self::inbox::MemoryInboxStore;
pub use self::store::MemoryOutboxStore;
pub use self::store::OutboxStore;
