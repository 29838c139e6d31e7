//! `logging.*` configuration: which drain to send structured logs to and at what level.
use serde::Deserialize;
use serde::Serialize;

/// Supported logging drains.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum LoggingDrain {
    /// Log JSON objects to standard output.
    #[serde(rename = "json")]
    Json,
}

impl Default for LoggingDrain {
    fn default() -> LoggingDrain {
        LoggingDrain::Json
    }
}

/// Minimum logging level to emit.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum LoggingLevel {
    #[serde(rename = "critical")]
    Critical,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "debug")]
    Debug,
}

impl Default for LoggingLevel {
    fn default() -> LoggingLevel {
        LoggingLevel::Info
    }
}

/// `logging.*` configuration.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct LoggingConf {
    /// Flush log records asynchronously rather than on the calling thread.
    #[serde(default = "LoggingConf::default_async_flush")]
    pub async_flush: bool,

    /// The drain to send logs to.
    #[serde(default)]
    pub drain: LoggingDrain,

    /// The minimum logging level.
    #[serde(default)]
    pub level: LoggingLevel,
}

impl LoggingConf {
    fn default_async_flush() -> bool {
        true
    }
}

impl Default for LoggingConf {
    fn default() -> Self {
        LoggingConf {
            async_flush: Self::default_async_flush(),
            drain: LoggingDrain::default(),
            level: LoggingLevel::default(),
        }
    }
}
