//! Combines configuration loading, structured logging and backend wiring to run a DotCelery
//! worker process end to end.
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use dotcelery_context::Context;
use dotcelery_registry::TaskRegistry;

mod backends;
mod cmd;
mod logging;
mod process;

pub use self::cmd::Cli;
pub use self::cmd::Command;
pub use self::process::WorkerProcess;

/// Initialise the process and run the selected command.
///
/// No task handlers are registered by this crate: sample tasks are an external
/// concern, so the worker process starts with an empty [`TaskRegistry`].
/// Embedding code that ships real tasks builds its own registry and calls
/// [`WorkerProcess::configure`] directly instead of going through [`run`].
pub async fn execute(cli: Cli, conf: dotcelery_conf::Conf) -> Result<()> {
    let logger = logging::configure(&conf.logging);
    let ctx = Context::root(logger).build();

    match cli.command {
        Command::Worker => {
            let registry = TaskRegistry::build().finish();
            let process = WorkerProcess::configure(ctx.clone(), conf, registry).await?;

            let shutdown = CancellationToken::new();
            let watcher = {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    process::watch_shutdown_signals(&ctx, shutdown).await;
                })
            };

            process.run(shutdown).await?;
            watcher.abort();
            Ok(())
        }
    }
}

/// Parse arguments, load configuration and run the multi-threaded runtime to completion.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let starter = logging::starter();
    let conf = match dotcelery_conf::load(&cli.config) {
        Ok(conf) => conf,
        Err(error) => {
            slog::crit!(starter, "failed to load configuration"; "path" => &cli.config, "error" => %error);
            return Err(error);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to initialise the tokio runtime")
        .block_on(execute(cli, conf))
}
