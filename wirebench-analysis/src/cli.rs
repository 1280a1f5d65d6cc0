//! Command-line entry point for batch aggregation.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use yansi::Paint;

use crate::engine::EngineParams;
use crate::scheduler::{self, Filters};
use crate::{observability, table};

/// Aggregate wirebench trial folders into a latency/throughput CSV table.
#[derive(Debug, FromArgs)]
struct Args {
    /// root of the result-directory tree
    #[argh(option, short = 'l')]
    logdir: PathBuf,

    /// path of the output CSV table
    #[argh(option, short = 'o')]
    outfile: PathBuf,

    /// percentage trimmed from each end of every client stream
    #[argh(option, default = "3.0")]
    trim: f64,

    /// requests issued per logical client
    #[argh(option, short = 'i', default = "500_000")]
    iterations: u64,

    /// maximum client processes per trial
    #[argh(option, default = "10")]
    max_client_procs: u32,

    /// only aggregate this system (repeatable)
    #[argh(option)]
    system: Vec<String>,

    /// only aggregate this payload size (repeatable)
    #[argh(option)]
    size: Vec<u64>,

    /// only aggregate this client count (repeatable)
    #[argh(option)]
    clients: Vec<u32>,
}

/// Runs discovery and aggregation, then writes the table.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();
    observability::init_tracing();

    let filters = Filters {
        systems: args.system,
        sizes: args.size,
        clients: args.clients,
    };
    let params = EngineParams {
        trim_fraction: args.trim,
        iterations: args.iterations,
        max_client_procs: args.max_client_procs,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (rows, discovered) = runtime
        .block_on(scheduler::aggregate_tree(&args.logdir, &filters, params))
        .with_context(|| format!("failed to walk {}", args.logdir.display()))?;

    let file = File::create(&args.outfile)
        .with_context(|| format!("failed to create {}", args.outfile.display()))?;
    table::write_table(&mut BufWriter::new(file), &rows)?;

    let skipped = discovered - rows.len();
    println!(
        "{} {} rows from {} folders, {} skipped",
        "## AGGREGATE".bold(),
        rows.len().bold().green(),
        discovered,
        if skipped > 0 {
            skipped.bold().red().to_string()
        } else {
            skipped.to_string()
        },
    );

    Ok(())
}
