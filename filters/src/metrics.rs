//! Built-in `QueueMetrics` filter: records per-task counters with no external store.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

use crate::context::FilterContext;
use crate::filter::Filter;

/// Canonical order for the built-in `QueueMetrics` filter.
pub const ORDER: i32 = -3000;

static TASKS_STARTED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new("dotcelery_tasks_started_total", "Tasks that entered the pre-phase"),
        &["task"],
    )
    .expect("failed to create dotcelery_tasks_started_total")
});

static TASKS_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "dotcelery_tasks_skipped_total",
        "Tasks whose execution was skipped by a filter",
    )
    .expect("failed to create dotcelery_tasks_skipped_total")
});

static TASK_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "dotcelery_task_pipeline_duration_seconds",
            "Time spent between the pre- and post-phase of the filter pipeline",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
    )
    .expect("failed to create dotcelery_task_pipeline_duration_seconds")
});

/// Register the filter's metrics with a Prometheus [`Registry`].
///
/// Metrics that fail to register (for example, a re-registration during tests) are logged and
/// ignored rather than panicking the process.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(error) = registry.register(Box::new(TASKS_STARTED.clone())) {
        debug!(logger, "failed to register dotcelery_tasks_started_total"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(TASKS_SKIPPED.clone())) {
        debug!(logger, "failed to register dotcelery_tasks_skipped_total"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(TASK_DURATION.clone())) {
        debug!(logger, "failed to register dotcelery_task_pipeline_duration_seconds"; "error" => ?error);
    }
}

/// Records start counts, skip counts and pipeline latency for every delivery.
pub struct QueueMetricsFilter {
    started_at_key: &'static str,
}

impl Default for QueueMetricsFilter {
    fn default() -> Self {
        QueueMetricsFilter {
            started_at_key: "__dotcelery_metrics_started_at",
        }
    }
}

#[async_trait]
impl Filter for QueueMetricsFilter {
    fn name(&self) -> &str {
        "QueueMetrics"
    }

    fn order(&self) -> i32 {
        ORDER
    }

    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        TASKS_STARTED.with_label_values(&[ctx.task.task_name.as_str()]).inc();
        ctx.properties
            .insert(self.started_at_key.to_string(), serde_json::json!(now_seconds()));
        Ok(())
    }

    async fn on_executed(&self, ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        if ctx.skip_execution {
            TASKS_SKIPPED.inc();
        }
        if let Some(started_at) = ctx
            .properties
            .get(self.started_at_key)
            .and_then(|value| value.as_f64())
        {
            let elapsed = (now_seconds() - started_at).max(0.0);
            TASK_DURATION.observe(elapsed);
        }
        Ok(())
    }
}

fn now_seconds() -> f64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or(0.0)
}
