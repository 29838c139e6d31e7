//! Data object storing DotCelery's configuration.
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::logging::LoggingConf;

/// Unstructured configuration for a runtime-selected backend implementation (broker, stores).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendConf {
    /// ID of the backend selected to provide the service (e.g. "memory", "rabbitmq", "redis").
    pub backend: String,

    /// Backend specific configuration options.
    #[serde(default, flatten)]
    pub options: serde_json::Value,
}

impl Default for BackendConf {
    fn default() -> Self {
        BackendConf {
            backend: String::from("memory"),
            options: serde_json::Value::Null,
        }
    }
}

/// `worker.*` configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerConf {
    /// Ordered list of queues this worker consumes from.
    #[serde(default = "WorkerConf::default_queues")]
    pub queues: Vec<String>,

    /// Number of executor fibers.
    #[serde(default = "WorkerConf::default_concurrency")]
    pub concurrency: usize,

    /// Per-consumer outstanding deliveries.
    #[serde(default = "WorkerConf::default_prefetch_count")]
    pub prefetch_count: usize,

    #[serde(default)]
    pub use_delay_queue: bool,

    #[serde(default = "WorkerConf::default_delayed_message_poll_interval_ms")]
    pub delayed_message_poll_interval_ms: u64,

    #[serde(default = "WorkerConf::default_delayed_message_retry_interval_ms")]
    pub delayed_message_retry_interval_ms: u64,

    /// When true, rate-limit retries are routed through the delay store instead of broker ETA.
    #[serde(default)]
    pub requeue_rate_limited_to_delay_queue: bool,

    #[serde(default = "WorkerConf::default_enable_graceful_shutdown")]
    pub enable_graceful_shutdown: bool,

    #[serde(default = "WorkerConf::default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default)]
    pub nack_on_forced_shutdown: bool,
}

impl WorkerConf {
    fn default_queues() -> Vec<String> {
        vec![String::from("default")]
    }
    fn default_concurrency() -> usize {
        let parallel = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        parallel
    }
    fn default_prefetch_count() -> usize {
        4
    }
    fn default_delayed_message_poll_interval_ms() -> u64 {
        1_000
    }
    fn default_delayed_message_retry_interval_ms() -> u64 {
        5_000
    }
    fn default_enable_graceful_shutdown() -> bool {
        true
    }
    fn default_shutdown_timeout_ms() -> u64 {
        30_000
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn delayed_message_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delayed_message_poll_interval_ms)
    }

    pub fn delayed_message_retry_interval(&self) -> Duration {
        Duration::from_millis(self.delayed_message_retry_interval_ms)
    }
}

impl Default for WorkerConf {
    fn default() -> Self {
        WorkerConf {
            queues: Self::default_queues(),
            concurrency: Self::default_concurrency(),
            prefetch_count: Self::default_prefetch_count(),
            use_delay_queue: false,
            delayed_message_poll_interval_ms: Self::default_delayed_message_poll_interval_ms(),
            delayed_message_retry_interval_ms: Self::default_delayed_message_retry_interval_ms(),
            requeue_rate_limited_to_delay_queue: false,
            enable_graceful_shutdown: Self::default_enable_graceful_shutdown(),
            shutdown_timeout_ms: Self::default_shutdown_timeout_ms(),
            nack_on_forced_shutdown: false,
        }
    }
}

/// `killSwitch.*` configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchConf {
    #[serde(default = "KillSwitchConf::default_activation_threshold")]
    pub activation_threshold: u32,

    /// Fraction in `[0, 1]`.
    #[serde(default = "KillSwitchConf::default_trip_threshold")]
    pub trip_threshold: f64,

    #[serde(default = "KillSwitchConf::default_tracking_window_ms")]
    pub tracking_window_ms: u64,

    #[serde(default = "KillSwitchConf::default_restart_timeout_ms")]
    pub restart_timeout_ms: u64,

    #[serde(default)]
    pub trip_on_exceptions: Vec<String>,

    #[serde(default)]
    pub ignore_exceptions: Vec<String>,
}

impl KillSwitchConf {
    fn default_activation_threshold() -> u32 {
        20
    }
    fn default_trip_threshold() -> f64 {
        0.5
    }
    fn default_tracking_window_ms() -> u64 {
        60_000
    }
    fn default_restart_timeout_ms() -> u64 {
        30_000
    }

    pub fn tracking_window(&self) -> Duration {
        Duration::from_millis(self.tracking_window_ms)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }
}

impl Default for KillSwitchConf {
    fn default() -> Self {
        KillSwitchConf {
            activation_threshold: Self::default_activation_threshold(),
            trip_threshold: Self::default_trip_threshold(),
            tracking_window_ms: Self::default_tracking_window_ms(),
            restart_timeout_ms: Self::default_restart_timeout_ms(),
            trip_on_exceptions: Vec::new(),
            ignore_exceptions: Vec::new(),
        }
    }
}

/// `partition.*` configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionConf {
    #[serde(default = "PartitionConf::default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "PartitionConf::default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,
}

impl PartitionConf {
    fn default_lock_timeout_ms() -> u64 {
        30 * 60 * 1000
    }
    fn default_requeue_delay_ms() -> u64 {
        500
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }
}

impl Default for PartitionConf {
    fn default() -> Self {
        PartitionConf {
            lock_timeout_ms: Self::default_lock_timeout_ms(),
            requeue_delay_ms: Self::default_requeue_delay_ms(),
        }
    }
}

/// `security.*` configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConf {
    pub max_allowed_schema_version: Option<u32>,
    pub max_payload_size_bytes: Option<u64>,
    #[serde(default)]
    pub enforce_task_allowlist: bool,
    #[serde(default)]
    pub allowed_task_names: Vec<String>,
}

/// `deadLetter.*` configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterConf {
    #[serde(default = "DeadLetterConf::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub include_stack_trace: bool,
    #[serde(default = "DeadLetterConf::default_retention_period_secs")]
    pub retention_period_secs: u64,
}

impl DeadLetterConf {
    fn default_enabled() -> bool {
        true
    }
    fn default_retention_period_secs() -> u64 {
        30 * 24 * 60 * 60
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }
}

impl Default for DeadLetterConf {
    fn default() -> Self {
        DeadLetterConf {
            enabled: Self::default_enabled(),
            reasons: Vec::new(),
            include_stack_trace: false,
            retention_period_secs: Self::default_retention_period_secs(),
        }
    }
}

/// `saga.*` configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SagaConf {
    #[serde(default)]
    pub dispatch_signals: bool,
    #[serde(default = "SagaConf::default_auto_compensate_on_failure")]
    pub auto_compensate_on_failure: bool,
}

impl SagaConf {
    fn default_auto_compensate_on_failure() -> bool {
        true
    }
}

impl Default for SagaConf {
    fn default() -> Self {
        SagaConf {
            dispatch_signals: false,
            auto_compensate_on_failure: Self::default_auto_compensate_on_failure(),
        }
    }
}

/// `outbox.*` configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxConf {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "OutboxConf::default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    #[serde(default = "OutboxConf::default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "OutboxConf::default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "OutboxConf::default_retention_period_secs")]
    pub retention_period_secs: u64,
    #[serde(default = "OutboxConf::default_max_attempts")]
    pub max_attempts: u32,
}

impl OutboxConf {
    fn default_dispatch_interval_ms() -> u64 {
        500
    }
    fn default_batch_size() -> usize {
        100
    }
    fn default_cleanup_interval_ms() -> u64 {
        60_000
    }
    fn default_retention_period_secs() -> u64 {
        7 * 24 * 60 * 60
    }
    fn default_max_attempts() -> u32 {
        5
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }
}

impl Default for OutboxConf {
    fn default() -> Self {
        OutboxConf {
            enabled: false,
            dispatch_interval_ms: Self::default_dispatch_interval_ms(),
            batch_size: Self::default_batch_size(),
            cleanup_interval_ms: Self::default_cleanup_interval_ms(),
            retention_period_secs: Self::default_retention_period_secs(),
            max_attempts: Self::default_max_attempts(),
        }
    }
}

/// `client.*` configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConf {
    #[serde(default = "ClientConf::default_default_queue")]
    pub default_queue: String,
    #[serde(default = "ClientConf::default_default_max_retries")]
    pub default_max_retries: u32,
}

impl ClientConf {
    fn default_default_queue() -> String {
        String::from("default")
    }
    fn default_default_max_retries() -> u32 {
        3
    }
}

impl Default for ClientConf {
    fn default() -> Self {
        ClientConf {
            default_queue: Self::default_default_queue(),
            default_max_retries: Self::default_default_max_retries(),
        }
    }
}

/// Global configuration for the DotCelery worker process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conf {
    /// Broker backend configuration.
    #[serde(default)]
    pub broker: BackendConf,

    /// Result backend configuration.
    #[serde(default)]
    pub result_backend: BackendConf,

    #[serde(default)]
    pub worker: WorkerConf,

    #[serde(default)]
    pub kill_switch: KillSwitchConf,

    #[serde(default)]
    pub partition: PartitionConf,

    #[serde(default)]
    pub security: SecurityConf,

    #[serde(default)]
    pub dead_letter: DeadLetterConf,

    #[serde(default)]
    pub saga: SagaConf,

    #[serde(default)]
    pub outbox: OutboxConf,

    #[serde(default)]
    pub client: ClientConf,

    /// Structured logging configuration.
    #[serde(default)]
    pub logging: LoggingConf,
}

impl Default for Conf {
    fn default() -> Self {
        Conf {
            broker: Default::default(),
            result_backend: Default::default(),
            worker: Default::default(),
            kill_switch: Default::default(),
            partition: Default::default(),
            security: Default::default(),
            dead_letter: Default::default(),
            saga: Default::default(),
            outbox: Default::default(),
            client: Default::default(),
            logging: Default::default(),
        }
    }
}
