//! Aggregates distributed benchmark results into a latency/throughput table.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use anyhow::Result;

fn main() -> Result<()> {
    wirebench_analysis::cli::execute()
}
