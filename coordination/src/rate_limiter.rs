//! Sliding-window rate limiter.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use dotcelery_errors::RateLimited;
use dotcelery_errors::RetryRequest;
use dotcelery_filters::Filter;
use dotcelery_filters::FilterContext;
use dotcelery_model::RateLimitWindow;
use dotcelery_registry::TaskRegistry;

/// A rate-limit policy: at most `limit` admitted requests within `window`.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    pub limit: usize,
    pub window: Duration,
}

/// Outcome of a rate-limit acquisition attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquireOutcome {
    pub acquired: bool,
    pub remaining: Option<usize>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after: Option<Duration>,
}

/// Minimum positive `retry_after` floor so rejected callers never get a zero or negative delay
/// that would cause them to spin.
const MIN_RETRY_AFTER: Duration = Duration::from_millis(1);

/// Storage for sliding-window state per `resourceKey`.
#[async_trait]
pub trait RateLimiterStore: Send + Sync {
    async fn window(&self, resource_key: &str) -> Result<RateLimitWindow>;
    async fn save(&self, window: RateLimitWindow) -> Result<()>;
}

/// A shared, cheaply cloneable handle to a [`RateLimiterStore`] implementation.
#[derive(Clone)]
pub struct RateLimiterHandle(Arc<dyn RateLimiterStore>);

impl RateLimiterHandle {
    pub fn new(store: impl RateLimiterStore + 'static) -> Self {
        RateLimiterHandle(Arc::new(store))
    }
}

/// Admits requests against a sliding window of timestamps per resource. Semantics: the number of admitted timestamps within the last `policy.window`
/// never exceeds `policy.limit`.
#[derive(Clone)]
pub struct RateLimiter {
    store: RateLimiterHandle,
}

impl RateLimiter {
    pub fn new(store: RateLimiterHandle) -> Self {
        RateLimiter { store }
    }

    pub async fn try_acquire(&self, resource_key: &str, policy: RateLimitPolicy) -> Result<AcquireOutcome> {
        self.try_acquire_at(resource_key, policy, Utc::now()).await
    }

    /// Same as [`try_acquire`](Self::try_acquire) but with an explicit `now`, to keep the
    /// admission logic deterministic and testable.
    pub async fn try_acquire_at(
        &self,
        resource_key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome> {
        let mut window = self.store.0.window(resource_key).await?;
        window.prune(now, policy.window);

        if window.timestamps.len() < policy.limit {
            window.timestamps.insert(now);
            let remaining = policy.limit - window.timestamps.len();
            let reset_at = now + chrono::Duration::from_std(policy.window).unwrap_or_default();
            self.store.0.save(window).await?;
            return Ok(AcquireOutcome {
                acquired: true,
                remaining: Some(remaining),
                reset_at: Some(reset_at),
                retry_after: None,
            });
        }

        let oldest = window.oldest().expect("limit of 0 is rejected at construction");
        let window_duration = chrono::Duration::from_std(policy.window).unwrap_or_default();
        let retry_after = (oldest + window_duration - now)
            .to_std()
            .unwrap_or(MIN_RETRY_AFTER)
            .max(MIN_RETRY_AFTER);
        Ok(AcquireOutcome {
            acquired: false,
            remaining: Some(0),
            reset_at: None,
            retry_after: Some(retry_after),
        })
    }
}

/// Canonical order of the built-in `RateLimiter` filter.
pub const ORDER: i32 = -1100;

/// Gates execution against a task's rate-limit policy.
///
/// A rejection is not surfaced as a failure: it raises `RetryRequest` with
/// `do_not_increment_retries=true` so the delivery is rescheduled after `retry_after` without
/// counting against the task's retry budget.
pub struct RateLimiterFilter {
    limiter: RateLimiter,
    registry: TaskRegistry,
}

impl RateLimiterFilter {
    pub fn new(limiter: RateLimiter, registry: TaskRegistry) -> Self {
        RateLimiterFilter { limiter, registry }
    }
}

#[async_trait]
impl Filter for RateLimiterFilter {
    fn name(&self) -> &str {
        "RateLimiter"
    }

    fn order(&self) -> i32 {
        ORDER
    }

    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let policy = match self
            .registry
            .lookup(&ctx.task.task_name)
            .and_then(|descriptor| descriptor.policy.rate_limit.clone())
        {
            Some(policy) => policy,
            None => return Ok(()),
        };
        let resource_key = policy.resource_key.clone().unwrap_or_else(|| ctx.task.task_name.clone());
        let outcome = self
            .limiter
            .try_acquire(
                &resource_key,
                RateLimitPolicy {
                    limit: policy.limit,
                    window: policy.window,
                },
            )
            .await?;
        if outcome.acquired {
            return Ok(());
        }
        let retry_after = outcome.retry_after.unwrap_or(MIN_RETRY_AFTER);
        let cause = RateLimited {
            resource_key,
            retry_after,
        };
        Err(RetryRequest {
            countdown: Some(retry_after),
            cause: Some(cause.to_string()),
            do_not_increment_retries: true,
        }
        .into())
    }
}

/// Simple in-memory [`RateLimiterStore`], shipped as the required test/local-dev
/// in-memory variant.
#[derive(Default)]
pub struct MemoryRateLimiterStore(std::sync::Mutex<std::collections::HashMap<String, RateLimitWindow>>);

#[async_trait]
impl RateLimiterStore for MemoryRateLimiterStore {
    async fn window(&self, resource_key: &str) -> Result<RateLimitWindow> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .get(resource_key)
            .cloned()
            .unwrap_or_else(|| RateLimitWindow::new(resource_key)))
    }

    async fn save(&self, window: RateLimitWindow) -> Result<()> {
        self.0.lock().unwrap().insert(window.resource_key.clone(), window);
        Ok(())
    }
}
