//! Orders registered filters and drives the pre/post/exception phases.
use std::sync::Arc;
use std::time::Duration;

use crate::context::FilterContext;
use crate::filter::Filter;

/// What the pre-phase decided, short of an error.
#[derive(Debug)]
pub enum PreOutcome {
    /// Every filter ran `on_executing` without requesting a short-circuit; proceed to invoke
    /// the handler.
    Continue,
    /// A filter requested the handler be skipped, optionally supplying its result.
    Skip { result: Option<serde_json::Value> },
    /// A filter requested the delivery be returned to the broker.
    Requeue { delay: Option<Duration> },
}

/// Result of running the pre-phase: how many filters successfully entered (and therefore
/// need their post-hooks run for cleanup), plus what happened.
pub struct PreRun {
    pub entered: usize,
    pub outcome: Result<PreOutcome, anyhow::Error>,
}

/// An ordered collection of [`Filter`]s.
///
/// Sorted ascending by `order` at construction time; the pre-phase walks that order, the
/// post and exception phases walk it in reverse.
#[derive(Clone)]
pub struct FilterPipeline {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterPipeline {
    pub fn new(mut filters: Vec<Arc<dyn Filter>>) -> FilterPipeline {
        filters.sort_by_key(|filter| filter.order());
        FilterPipeline { filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Run `on_executing` on every filter in ascending order, stopping at the first error or
    /// short-circuit request.
    pub async fn run_pre(&self, ctx: &mut FilterContext<'_>) -> PreRun {
        for (index, filter) in self.filters.iter().enumerate() {
            if let Err(error) = filter.on_executing(ctx).await {
                return PreRun {
                    entered: index,
                    outcome: Err(error),
                };
            }
            if ctx.skip_execution {
                return PreRun {
                    entered: index + 1,
                    outcome: Ok(PreOutcome::Skip {
                        result: ctx.skip_result.take(),
                    }),
                };
            }
            if ctx.requeue_message {
                return PreRun {
                    entered: index + 1,
                    outcome: Ok(PreOutcome::Requeue {
                        delay: ctx.requeue_delay,
                    }),
                };
            }
        }
        PreRun {
            entered: self.filters.len(),
            outcome: Ok(PreOutcome::Continue),
        }
    }

    /// Run `on_executed` over the first `entered` filters, in reverse order. Used both for a
    /// normal completion and for cleanup after a pre-phase abort.3: "all
    /// already-entered post-hooks still run in reverse to guarantee cleanup".
    ///
    /// A filter's own `on_executed` error does not stop the unwind: every entered filter gets a
    /// chance to clean up, and the first error encountered is returned once the loop completes.
    pub async fn run_post(&self, entered: usize, ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        let mut first_error = None;
        for filter in self.filters[..entered].iter().rev() {
            if let Err(error) = filter.on_executed(ctx).await {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Run `on_exception` over the first `entered` filters, in reverse order, stopping as soon
    /// as one reports the exception handled.
    pub async fn run_exception(
        &self,
        entered: usize,
        ctx: &mut FilterContext<'_>,
        error: &anyhow::Error,
    ) -> bool {
        for filter in self.filters[..entered].iter().rev() {
            match filter.on_exception(ctx, error).await {
                Ok(true) => return true,
                Ok(false) => continue,
                // A filter's own exception-handling failure must not mask the original error;
                // move on to the next filter in the unwind.
                Err(_) => continue,
            }
        }
        false
    }
}
