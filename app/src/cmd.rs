//! Built-in `dotcelery` commands.
use clap::Parser;
use clap::Subcommand;

/// DotCelery distributed task-queue worker process.
#[derive(Debug, Parser)]
#[command(version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the DotCelery configuration file to use.
    #[arg(short = 'c', long = "config", default_value_t = String::from("dotcelery.yaml"))]
    pub config: String,

    /// Select the dotcelery command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Select the dotcelery command to run.
#[derive(Clone, Copy, Debug, Subcommand)]
pub enum Command {
    /// Run the worker process: consume deliveries, execute tasks, drive the background
    /// dispatchers configured for this process.
    #[command(alias = "run")]
    Worker,
}
