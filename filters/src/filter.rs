//! The [`Filter`] trait: `onExecuting`/`onExecuted`/`onException` hooks plus an ordering key.
use async_trait::async_trait;

use crate::context::FilterContext;

/// A pipeline stage that can gate, observe, or react to a task's execution.
///
/// Every hook is optional in practice: the default implementations are no-ops, so a filter
/// only needs to override the phases it cares about. `order` controls placement in the
/// pipeline: ascending for the pre-phase, descending (LIFO) for post and exception phases,
/// so cleanup for a filter that entered last runs first.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Stable identifier used in logs and metrics.
    fn name(&self) -> &str;

    /// Position in the pipeline. Lower values run earlier in the pre-phase.
    fn order(&self) -> i32;

    /// Runs before the handler. May set `ctx.skip_execution` or `ctx.requeue_message` to
    /// short-circuit the remaining pipeline and the handler invocation.
    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Runs after a successful handler invocation (or a skipped one), in reverse order.
    async fn on_executed(&self, ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Runs when the handler (or an earlier filter) raised an error, in reverse order.
    /// Return `Ok(true)` to mark the exception handled, suppressing it from further filters
    /// and from the executor's own classification.
    async fn on_exception(&self, ctx: &mut FilterContext<'_>, error: &anyhow::Error) -> anyhow::Result<bool> {
        let _ = (ctx, error);
        Ok(false)
    }
}
