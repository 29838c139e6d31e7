//! Value types shared across the DotCelery task queue core.
//!
//! These are plain, `serde`-derived data structs. Invariants called out in the data model are
//! enforced at construction time (via builders returning `Result`), not by runtime validation
//! scattered across call sites.
pub mod backend;
pub mod coordination;
pub mod message;
pub mod outbox;
pub mod result;
pub mod saga;

pub use self::backend::Broker;
pub use self::backend::JsonSerializer;
pub use self::backend::ResultBackend;
pub use self::backend::ResultBackendHandle;
pub use self::backend::Serializer;
pub use self::coordination::ExecutionTrack;
pub use self::coordination::PartitionLock;
pub use self::coordination::RateLimitWindow;
pub use self::coordination::RevocationRecord;
pub use self::message::BrokerMessage;
pub use self::message::TaskMessage;
pub use self::message::TaskMessageBuilder;
pub use self::outbox::OutboxMessage;
pub use self::outbox::OutboxStatus;
pub use self::result::TaskResult;
pub use self::result::TaskState;
pub use self::saga::Saga;
pub use self::saga::SagaState;
pub use self::saga::SagaStep;
pub use self::saga::SagaStepState;
pub use self::saga::Signature;
