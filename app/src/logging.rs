//! Builds a [`Logger`] from [`LoggingConf`]: level and format filters are applied to the
//! drain before it is wrapped for async delivery, with a synchronous fallback for tests.
use std::io::stdout;
use std::sync::Mutex;

use slog::Drain;
use slog::IgnoreResult;
use slog::Logger;
use slog::Never;
use slog::SendSyncRefUnwindSafeDrain;
use slog::SendSyncUnwindSafeDrain;
use slog_async::Async;
use slog_json::Json;

use dotcelery_conf::LoggingConf;
use dotcelery_conf::LoggingDrain;

/// Alternative implementation of slog's `LevelFilter` with `Ok == ()`.
///
/// The built-in `LevelFilter` wraps `D::Ok` into an `Option`, which makes it impossible to
/// wrap a filtering drain into a [`Logger`] (its `Drain::Ok` must be `()`).
#[derive(Debug, Clone)]
struct LevelFilter<D: Drain>(D, slog::Level);

impl<D: Drain> Drain for LevelFilter<D> {
    type Ok = ();
    type Err = D::Err;

    fn log(&self, record: &slog::Record, logger_values: &slog::OwnedKVList) -> Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.1) {
            self.0.log(record, logger_values)?;
        }
        Ok(())
    }
}

fn into_logger<D>(drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    Logger::root(drain, slog::o!("version" => env!("CARGO_PKG_VERSION")))
}

fn config_async<D>(conf: &LoggingConf, drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    if conf.async_flush {
        into_logger(Async::new(drain).build().ignore_res())
    } else {
        into_logger(drain)
    }
}

fn config_level<D>(conf: &LoggingConf, drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    let level = match conf.level {
        dotcelery_conf::LoggingLevel::Critical => slog::Level::Critical,
        dotcelery_conf::LoggingLevel::Error => slog::Level::Error,
        dotcelery_conf::LoggingLevel::Warning => slog::Level::Warning,
        dotcelery_conf::LoggingLevel::Info => slog::Level::Info,
        dotcelery_conf::LoggingLevel::Debug => slog::Level::Debug,
    };
    config_async(conf, LevelFilter(drain, level))
}

/// Build the process logger from configuration.
pub fn configure(conf: &LoggingConf) -> Logger {
    match conf.drain {
        LoggingDrain::Json => {
            let drain = Mutex::new(Json::default(stdout())).map(IgnoreResult::new);
            config_level(conf, drain)
        }
    }
}

/// A fixed logger used before configuration is loaded, so early startup failures (a missing or
/// unreadable config file) are still reported as structured JSON.
pub fn starter() -> Logger {
    let drain = Mutex::new(Json::default(stdout())).map(IgnoreResult::new);
    into_logger(drain)
}
