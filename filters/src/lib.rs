//! Ordered pre/post/exception hooks that gate task execution.
//!
//! A [`Filter`] is a pipeline stage; a [`FilterPipeline`] orders a set of them and drives the
//! pre-phase (ascending `order`) and the post/exception phases (descending, LIFO). Filters
//! that need an external store (partition locks, inbox dedup, security policy) live in the
//! crates that own those stores and are re-exported there; this crate only carries the
//! pipeline machinery and the store-free `QueueMetrics` filter.
pub mod context;
pub mod filter;
pub mod metrics;
pub mod pipeline;

pub use self::context::FilterContext;
pub use self::filter::Filter;
pub use self::metrics::register_metrics as register_queue_metrics;
pub use self::metrics::QueueMetricsFilter;
pub use self::pipeline::FilterPipeline;
pub use self::pipeline::PreOutcome;
pub use self::pipeline::PreRun;
