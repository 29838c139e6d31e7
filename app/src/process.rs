//! Assembles a runnable worker process from [`Conf`] using a configure-then-run builder shape.
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use dotcelery_client::Client;
use dotcelery_conf::Conf;
use dotcelery_context::Context;
use dotcelery_coordination::DeadLetterHandler;
use dotcelery_coordination::ExecutionTrackerHandle;
use dotcelery_coordination::KillSwitch;
use dotcelery_coordination::MemoryDeadLetterStore;
use dotcelery_coordination::MemoryExecutionTrackerStore;
use dotcelery_coordination::MemoryPartitionLockStore;
use dotcelery_coordination::MemoryRateLimiterStore;
use dotcelery_coordination::MemoryRevocationStore;
use dotcelery_coordination::PartitionLockHandle;
use dotcelery_coordination::PartitionedExecutionFilter;
use dotcelery_coordination::PreventOverlappingFilter;
use dotcelery_coordination::RateLimiter;
use dotcelery_coordination::RateLimiterFilter;
use dotcelery_coordination::RateLimiterHandle;
use dotcelery_coordination::RevocationHandle;
use dotcelery_coordination::SecurityValidationFilter;
use dotcelery_coordination::TenantContextFilter;
use dotcelery_delay::DelayedDispatcher;
use dotcelery_delay::DelayedMessageStore;
use dotcelery_delay::MemoryDelayStore;
use dotcelery_executor::Executor;
use dotcelery_executor::ExecutorOptions;
use dotcelery_filters::Filter;
use dotcelery_filters::FilterPipeline;
use dotcelery_filters::QueueMetricsFilter;
use dotcelery_model::Broker;
use dotcelery_model::JsonSerializer;
use dotcelery_model::ResultBackendHandle;
use dotcelery_outbox::InboxFilter;
use dotcelery_outbox::InboxHandle;
use dotcelery_outbox::MemoryInboxStore;
use dotcelery_outbox::MemoryOutboxStore;
use dotcelery_outbox::OutboxDispatcher;
use dotcelery_outbox::OutboxStore;
use dotcelery_registry::Invoker;
use dotcelery_registry::TaskRegistry;
use dotcelery_saga::MemorySagaStore;
use dotcelery_saga::SagaOrchestrator;
use dotcelery_saga::SagaStoreHandle;
use dotcelery_saga::SignalBus;
use dotcelery_saga::SignalingResultBackend;
use dotcelery_worker::Worker;

use crate::backends;

/// A fully wired worker process, ready to run until asked to shut down.
///
/// Background services (the delayed-message dispatcher, the outbox dispatcher, the saga
/// signal loop) are only constructed when their section of [`Conf`] opts in; callers that need
/// none of them still get a plain broker-to-executor worker.
pub struct WorkerProcess {
    ctx: Context,
    conf: Conf,
    broker: Arc<dyn Broker>,
    result_backend: ResultBackendHandle,
    worker: Worker,
    delay_store: Option<Arc<dyn DelayedMessageStore>>,
    outbox_store: Option<Arc<dyn OutboxStore>>,
    signal_bus: Option<SignalBus>,
    saga_store: Option<SagaStoreHandle>,
}

impl WorkerProcess {
    /// Wire every component named in this process's configuration.
    pub async fn configure(ctx: Context, conf: Conf, registry: TaskRegistry) -> Result<WorkerProcess> {
        let broker = backends::broker(&conf.broker)?;
        let backend_arc = backends::result_backend(&conf.result_backend)?;

        let (result_backend, signal_bus) = if conf.saga.dispatch_signals {
            let bus = SignalBus::new();
            let signaling = SignalingResultBackend::new(backend_arc, bus.clone());
            (ResultBackendHandle::new(signaling), Some(bus))
        } else {
            (ResultBackendHandle::from_arc(backend_arc), None)
        };

        let revocation = RevocationHandle::new(MemoryRevocationStore::default());
        let partition_lock = PartitionLockHandle::new(MemoryPartitionLockStore::default());
        let execution_tracker = ExecutionTrackerHandle::new(MemoryExecutionTrackerStore::default());
        let rate_limiter = RateLimiter::new(RateLimiterHandle::new(MemoryRateLimiterStore::default()));

        let dead_letter = if conf.dead_letter.enabled {
            DeadLetterHandler::new(Some(MemoryDeadLetterStore::default()), conf.dead_letter.include_stack_trace)
        } else {
            DeadLetterHandler::unconfigured()
        };
        let dead_letter_expired_messages = conf
            .dead_letter
            .reasons
            .iter()
            .any(|reason| reason == "ExpiredMessage");

        let outbox_store: Option<Arc<dyn OutboxStore>> = if conf.outbox.enabled {
            Some(Arc::new(MemoryOutboxStore::default()))
        } else {
            None
        };
        let inbox = InboxHandle::new(MemoryInboxStore::default());

        let mut filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(SecurityValidationFilter::new(conf.security.clone())),
            Arc::new(TenantContextFilter),
            Arc::new(RateLimiterFilter::new(rate_limiter, registry.clone())),
            Arc::new(PartitionedExecutionFilter::new(
                partition_lock,
                conf.partition.lock_timeout(),
                conf.partition.requeue_delay(),
            )),
            Arc::new(PreventOverlappingFilter::new(execution_tracker, registry.clone())),
            Arc::new(QueueMetricsFilter::default()),
        ];
        if conf.outbox.enabled {
            filters.push(Arc::new(InboxFilter::new(inbox)));
        }

        let executor = Executor::new(
            Invoker::new(registry),
            Arc::new(JsonSerializer),
            FilterPipeline::new(filters),
            result_backend.clone(),
            revocation,
            dead_letter,
            ExecutorOptions {
                dead_letter_expired_messages,
            },
        );

        let kill_switch = KillSwitch::new(
            conf.kill_switch.tracking_window(),
            conf.kill_switch.activation_threshold,
            conf.kill_switch.trip_threshold,
            conf.kill_switch.restart_timeout(),
            conf.kill_switch.trip_on_exceptions.clone(),
            conf.kill_switch.ignore_exceptions.clone(),
        );

        let delay_store: Option<Arc<dyn DelayedMessageStore>> = if conf.worker.use_delay_queue {
            Some(Arc::new(MemoryDelayStore::default()))
        } else {
            None
        };

        let worker = Worker::new(
            broker.clone(),
            executor,
            kill_switch,
            delay_store.clone(),
            conf.worker.clone(),
            conf.partition.requeue_delay(),
        );

        let saga_store = if conf.saga.dispatch_signals {
            Some(SagaStoreHandle::new(MemorySagaStore::default()))
        } else {
            None
        };

        Ok(WorkerProcess {
            ctx,
            conf,
            broker,
            result_backend,
            worker,
            delay_store,
            outbox_store,
            signal_bus,
            saga_store,
        })
    }

    /// A client bound to this process's broker and result backend, for embedding code that
    /// needs to submit tasks from the same process that runs them.
    pub fn client(&self) -> Client {
        let client = Client::new(self.broker.clone(), self.result_backend.clone());
        match &self.outbox_store {
            Some(outbox) => client.with_outbox(outbox.clone()),
            None => client,
        }
    }

    /// Run every configured component until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut background = Vec::new();

        if let (Some(store), true) = (self.delay_store.clone(), self.conf.worker.use_delay_queue) {
            let dispatcher = DelayedDispatcher::new(
                store,
                self.broker.clone(),
                self.conf.worker.delayed_message_poll_interval(),
                self.conf.worker.delayed_message_retry_interval(),
            );
            let ctx = self.ctx.clone();
            let shutdown = shutdown.clone();
            background.push(tokio::spawn(async move {
                dispatcher.run(&ctx, &shutdown).await;
            }));
        }

        if let Some(store) = self.outbox_store.clone() {
            let dispatcher = OutboxDispatcher::new(
                store,
                self.broker.clone(),
                self.conf.outbox.dispatch_interval(),
                self.conf.outbox.cleanup_interval(),
                self.conf.outbox.retention_period(),
                self.conf.outbox.batch_size,
                self.conf.outbox.max_attempts,
            );
            let ctx = self.ctx.clone();
            let shutdown = shutdown.clone();
            background.push(tokio::spawn(async move {
                dispatcher.run(&ctx, &shutdown).await;
            }));
        }

        if let (Some(bus), Some(store)) = (self.signal_bus.clone(), self.saga_store.clone()) {
            let orchestrator = SagaOrchestrator::new(store, self.broker.clone(), self.conf.saga.auto_compensate_on_failure);
            let ctx = self.ctx.clone();
            let shutdown = shutdown.clone();
            background.push(tokio::spawn(async move {
                orchestrator.run(&ctx, &bus, &shutdown).await;
            }));
        }

        slog::info!(self.ctx.logger, "dotcelery worker process initialisation complete");
        self.worker.run(&self.ctx, shutdown).await;

        for handle in background {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Wait for either `SIGTERM` or `SIGINT`, whichever arrives first, then cancel `shutdown`.
pub async fn watch_shutdown_signals(ctx: &Context, shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate.recv() => {}
    };
    #[cfg(not(unix))]
    let _ = ctrl_c.await;

    slog::info!(ctx.logger, "shutdown signal received, stopping dotcelery worker process");
    shutdown.cancel();
}
