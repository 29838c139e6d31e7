//! Worker service: consumer fiber, bounded work channel, executor fiber pool, outcome-to-broker
//! translation, kill-switch gating, graceful shutdown.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use dotcelery_conf::WorkerConf;
use dotcelery_context::Context;
use dotcelery_coordination::KillSwitch;
use dotcelery_coordination::KillSwitchState;
use dotcelery_delay::DelayedEnvelope;
use dotcelery_delay::DelayedMessageStore;
use dotcelery_errors::BrokerUnavailable;
use dotcelery_errors::KillSwitchTripped;
use dotcelery_errors::ShutdownInProgress;
use dotcelery_executor::Executor;
use dotcelery_executor::Outcome;
use dotcelery_model::Broker;
use dotcelery_model::BrokerMessage;

use crate::backoff::Backoff;

/// A currently-checked-out delivery, tracked so a forced shutdown can reject-requeue it
/// instead of silently dropping it.
type Slot = Arc<Mutex<Option<BrokerMessage>>>;

/// Translates executor outcomes into broker operations for one consumer + `concurrency`
/// executor fibers communicating over a bounded work channel.
#[derive(Clone)]
pub struct Worker {
    broker: Arc<dyn Broker>,
    executor: Executor,
    kill_switch: KillSwitch,
    delay_store: Option<Arc<dyn DelayedMessageStore>>,
    conf: WorkerConf,
    default_requeue_delay: Duration,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        executor: Executor,
        kill_switch: KillSwitch,
        delay_store: Option<Arc<dyn DelayedMessageStore>>,
        conf: WorkerConf,
        default_requeue_delay: Duration,
    ) -> Self {
        Worker {
            broker,
            executor,
            kill_switch,
            delay_store,
            conf,
            default_requeue_delay,
        }
    }

    /// Run the worker until `shutdown` is cancelled, then drain in-flight work for up to
    /// `shutdown.timeout` before forcing remaining deliveries back onto the broker.
    pub async fn run(&self, ctx: &Context, shutdown: CancellationToken) {
        let capacity = (self.conf.prefetch_count * self.conf.concurrency).max(1);
        let (tx, rx) = mpsc::channel::<BrokerMessage>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut fibers = Vec::with_capacity(self.conf.concurrency);
        let mut slots = Vec::with_capacity(self.conf.concurrency);
        for _ in 0..self.conf.concurrency {
            let slot: Slot = Arc::new(Mutex::new(None));
            slots.push(slot.clone());
            let worker = self.clone();
            let rx = rx.clone();
            let fiber_ctx = ctx.derive().build();
            let fiber_shutdown = shutdown.clone();
            fibers.push(tokio::spawn(async move {
                worker.run_fiber(fiber_ctx, rx, slot, fiber_shutdown).await;
            }));
        }

        self.run_consumer(ctx, tx, shutdown.clone()).await;

        if self.conf.enable_graceful_shutdown {
            let deadline = tokio::time::sleep(self.conf.shutdown_timeout());
            tokio::pin!(deadline);
            let mut remaining = fibers;
            loop {
                if remaining.is_empty() {
                    break;
                }
                tokio::select! {
                    _ = &mut deadline => {
                        slog::warn!(ctx.logger, "shutdown timeout elapsed, forcing remaining fibers");
                        for fiber in &remaining {
                            fiber.abort();
                        }
                        break;
                    }
                    (result, _index, left) = futures::future::select_all(remaining) => {
                        if let Err(error) = result {
                            if !error.is_cancelled() {
                                slog::warn!(ctx.logger, "executor fiber panicked"; "error" => %error);
                            }
                        }
                        remaining = left;
                    }
                }
            }
        } else {
            for fiber in &fibers {
                fiber.abort();
            }
        }

        if self.conf.nack_on_forced_shutdown {
            self.drain_slots(ctx, &slots).await;
        }
        self.drain_channel(ctx, &rx).await;
    }

    async fn drain_slots(&self, ctx: &Context, slots: &[Slot]) {
        for slot in slots {
            if let Some(message) = slot.lock().await.take() {
                slog::warn!(ctx.logger, "rejecting in-flight delivery on forced shutdown"; "task_id" => &message.message.id);
                let _ = self.broker.reject(&message, true).await;
            }
        }
    }

    async fn drain_channel(&self, ctx: &Context, rx: &Arc<Mutex<mpsc::Receiver<BrokerMessage>>>) {
        let mut rx = rx.lock().await;
        while let Ok(message) = rx.try_recv() {
            slog::warn!(ctx.logger, "rejecting queued delivery on shutdown"; "task_id" => &message.message.id);
            let _ = self.broker.reject(&message, true).await;
        }
    }

    /// Fetch deliveries from the broker and forward them into the bounded work channel, gated
    /// by the kill switch immediately before each handoff.
    async fn run_consumer(&self, ctx: &Context, tx: mpsc::Sender<BrokerMessage>, shutdown: CancellationToken) {
        let mut backoff = Backoff::new();
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.broker.consume(&self.conf.queues, self.conf.prefetch_count) => result,
            };
            let delivery = match delivery {
                Ok(delivery) => {
                    backoff.reset();
                    delivery
                }
                Err(error) => {
                    let unavailable = BrokerUnavailable {
                        reason: error.to_string(),
                    };
                    slog::warn!(ctx.logger, "broker consume failed, backing off"; "error" => %unavailable);
                    backoff.wait().await;
                    continue;
                }
            };

            if self.kill_switch.state() == KillSwitchState::Tripped {
                let tripped = KillSwitchTripped {
                    restart_after: self.kill_switch.restart_timeout().await,
                };
                slog::warn!(ctx.logger, "kill switch tripped, suspending consumption"; "error" => %tripped);
            }
            self.kill_switch.wait_until_ready().await;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    let dropped = ShutdownInProgress;
                    slog::info!(ctx.logger, "worker shutdown in progress, requeueing delivery"; "error" => %dropped);
                    let _ = self.broker.reject(&delivery, true).await;
                    break;
                }
                send = tx.send(delivery) => {
                    if send.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_fiber(
        &self,
        ctx: Context,
        rx: Arc<Mutex<mpsc::Receiver<BrokerMessage>>>,
        slot: Slot,
        shutdown: CancellationToken,
    ) {
        loop {
            let delivery = {
                let mut guard = rx.lock().await;
                guard.recv().await
            };
            let delivery = match delivery {
                Some(delivery) => delivery,
                None => break,
            };
            *slot.lock().await = Some(delivery.clone());
            self.handle_delivery(&ctx, delivery, &shutdown).await;
            *slot.lock().await = None;
        }
    }

    async fn handle_delivery(&self, ctx: &Context, delivery: BrokerMessage, shutdown: &CancellationToken) {
        if let Some(eta) = delivery.message.eta {
            if eta > Utc::now() {
                self.defer_future_eta(ctx, delivery, eta).await;
                return;
            }
        }

        let outcome = self.executor.execute(ctx, &delivery.message, shutdown).await;
        match outcome {
            Outcome::Success | Outcome::Revoked => {
                let _ = self.broker.ack(&delivery).await;
            }
            Outcome::Rejected => {
                slog::info!(ctx.logger, "ack and drop rejected delivery"; "task_id" => &delivery.message.id);
                let _ = self.broker.ack(&delivery).await;
            }
            Outcome::Failure => {
                let _ = self.broker.ack(&delivery).await;
            }
            Outcome::Retry { retry_after, do_not_increment_retries } => {
                self.handle_retry(ctx, delivery, retry_after, do_not_increment_retries).await;
            }
            Outcome::Requeued { delay } => {
                let delay = delay.unwrap_or(self.default_requeue_delay);
                tokio::time::sleep(delay).await;
                let _ = self.broker.reject(&delivery, true).await;
            }
        }
    }

    async fn defer_future_eta(&self, ctx: &Context, delivery: BrokerMessage, eta: chrono::DateTime<Utc>) {
        match &self.delay_store {
            Some(store) => {
                let envelope = DelayedEnvelope::new(delivery.message.clone(), eta);
                if store.insert(envelope).await.is_ok() {
                    let _ = self.broker.ack(&delivery).await;
                } else {
                    let _ = self.broker.reject(&delivery, true).await;
                }
            }
            None => {
                let wait = (eta - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(Duration::from_secs(5));
                slog::debug!(ctx.logger, "no delay store configured, sleeping before requeue"; "wait_ms" => wait.as_millis() as u64);
                tokio::time::sleep(wait).await;
                let _ = self.broker.reject(&delivery, true).await;
            }
        }
    }

    async fn handle_retry(
        &self,
        ctx: &Context,
        delivery: BrokerMessage,
        retry_after: Option<Duration>,
        do_not_increment_retries: bool,
    ) {
        let mut retried = delivery.message.for_retry(do_not_increment_retries);
        match retry_after {
            None => {
                let _ = self.broker.publish(retried).await;
                let _ = self.broker.ack(&delivery).await;
            }
            Some(delay) => {
                let deliver_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                if self.conf.requeue_rate_limited_to_delay_queue {
                    if let Some(store) = &self.delay_store {
                        let envelope = DelayedEnvelope::new(retried, deliver_at);
                        let _ = store.insert(envelope).await;
                        let _ = self.broker.ack(&delivery).await;
                        return;
                    }
                    slog::debug!(ctx.logger, "requeue_rate_limited_to_delay_queue set but no delay store configured, falling back to broker eta");
                }
                retried.eta = Some(deliver_at);
                let _ = self.broker.publish(retried).await;
                let _ = self.broker.ack(&delivery).await;
            }
        }
    }
}
