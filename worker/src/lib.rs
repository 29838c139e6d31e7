//! Worker service: broker consumer → bounded work channel → executor fiber
//! pool → outcome-to-broker-operation translation, with kill-switch gating and graceful
//! shutdown.
mod backoff;
mod worker;

pub use self::worker::Worker;
