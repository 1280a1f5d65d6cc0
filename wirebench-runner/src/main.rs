//! Orchestration driver for distributed wirebench experiments.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use anyhow::Result;

fn main() -> Result<()> {
    wirebench_runner::cli::execute()
}
