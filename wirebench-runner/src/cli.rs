//! Command-line entry point for the benchmark runner.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::driver::Driver;
use crate::observability;
use crate::remote::SshExecutor;

/// Drive distributed wirebench experiments from a YAML configuration.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: PathBuf,

    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Single(SingleCommand),
}

/// run the full experiment matrix
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// run one trial and print its statistics
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "single")]
struct SingleCommand {
    /// system to benchmark
    #[argh(option)]
    system: String,

    /// message variant, for systems that encode one
    #[argh(option)]
    message: Option<String>,

    /// payload size in bytes
    #[argh(option, short = 's')]
    size: u64,

    /// number of logical clients
    #[argh(option, short = 'n', default = "1")]
    clients: u32,
}

/// Loads and validates the configuration, then executes the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let config = Config::load(Some(&args.config))?;
    // Reject invalid flag combinations before any remote side effect.
    config.validate()?;

    observability::init_tracing();
    tracing::debug!(?config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let executor = Arc::new(SshExecutor::new(&config.transport));
        let driver = Driver::new(config, executor);

        match args.command {
            Command::Run(RunCommand {}) => {
                driver.run_matrix().await;
                Ok(())
            }
            Command::Single(single) => {
                driver
                    .run_single(&single.system, single.message, single.size, single.clients)
                    .await
            }
        }
    })
}
