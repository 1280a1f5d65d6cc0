//! Per-trial aggregation: trim, merge, order statistics, throughput.

use std::path::Path;

use wirebench_types::error::{Error, Result};
use wirebench_types::key::{ExperimentKey, TrialPaths};

use crate::artifacts::{self, ClientArtifact};
use crate::merge::{merge_sorted, trim_sorted};

/// Tunables threaded into every aggregation task.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Percentage of samples to drop from each end of every client stream.
    pub trim_fraction: f64,
    /// Requests issued per logical client.
    pub iterations: u64,
    /// Maximum client processes per trial; beyond this, logical clients are
    /// multiplexed into processes and sample counts scale accordingly.
    pub max_client_procs: u32,
}

/// One output row of the aggregate table.
///
/// Latencies are in microseconds, throughput in requests per millisecond
/// and in gigabits per second, matching the table consumed by the plotting
/// pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// The trial this row was computed from.
    pub key: ExperimentKey,
    /// Median end-to-end latency.
    pub median_us: f64,
    /// Mean end-to-end latency.
    pub avg_us: f64,
    /// 99th-percentile end-to-end latency.
    pub p99_us: f64,
    /// Closed-loop throughput in requests per millisecond.
    pub tput: f64,
    /// Closed-loop throughput in gigabits per second.
    pub tput_gbps: f64,
    /// Sum of the clients' retry counters.
    pub retries: u64,
}

/// Statistics contributed by one client, used when any client in the trial
/// has to fall back to its precomputed summary.
#[derive(Debug, Clone, Copy)]
struct ClientContribution {
    avg_ns: f64,
    median_ns: f64,
    p99_ns: f64,
}

/// Aggregates one trial folder into a row.
///
/// Every failure mode -- missing artifacts, inconsistent sample counts
/// without a summary to fall back to, empty streams -- is logged and turned
/// into `None` so that one broken folder never takes down a batch.
pub fn aggregate_trial(root: &Path, key: &ExperimentKey, params: &EngineParams) -> Option<AggregateRow> {
    match try_aggregate(root, key, params) {
        Ok(row) => Some(row),
        Err(err) => {
            tracing::warn!(key = %key, %err, "skipping trial folder");
            None
        }
    }
}

fn try_aggregate(root: &Path, key: &ExperimentKey, params: &EngineParams) -> Result<AggregateRow> {
    let paths = TrialPaths::new(root, key);
    if !paths.dir().is_dir() {
        return Err(Error::MissingArtifact(paths.dir().to_path_buf()));
    }

    let procs = key.num_clients.min(params.max_client_procs);
    if procs == 0 || key.num_clients % procs != 0 {
        return Err(Error::DataInconsistency {
            path: paths.dir().to_path_buf(),
            reason: format!(
                "{} logical clients cannot be split into {procs} processes",
                key.num_clients
            ),
        });
    }
    let multiplier = (key.num_clients / procs) as u64;
    let expected_samples = params.iterations * multiplier;

    let clients: Vec<ClientArtifact> = (1..=procs)
        .map(|idx| artifacts::load_client(&paths, idx, expected_samples))
        .collect::<Result<_>>()?;

    let retries = clients.iter().map(|c| c.retries).sum();

    let (mean_ns, median_ns, p99_ns) = if clients.iter().all(|c| c.samples.is_some()) {
        merged_statistics(&paths, &clients, params)?
    } else {
        fallback_statistics(&paths, &clients, params)?
    };

    let avg_ms = mean_ns / 1e6;
    let tput = key.num_clients as f64 / avg_ms;
    let tput_gbps = tput * 1000.0 * key.size as f64 * 8.0 / 1e9;

    Ok(AggregateRow {
        key: key.clone(),
        median_us: median_ns / 1e3,
        avg_us: mean_ns / 1e3,
        p99_us: p99_ns / 1e3,
        tput,
        tput_gbps,
        retries,
    })
}

/// The preferred path: every client has a usable raw stream, so statistics
/// come from the global k-way merge of the trimmed streams.
fn merged_statistics(
    paths: &TrialPaths,
    clients: &[ClientArtifact],
    params: &EngineParams,
) -> Result<(f64, f64, f64)> {
    let trimmed: Vec<&[u64]> = clients
        .iter()
        .filter_map(|c| c.samples.as_deref())
        .map(|samples| trim_sorted(samples, params.trim_fraction))
        .collect();

    let merged = merge_sorted(&trimmed);
    if merged.is_empty() {
        return Err(Error::DataInconsistency {
            path: paths.dir().to_path_buf(),
            reason: "no samples left after trimming".into(),
        });
    }

    let sum: u128 = merged.iter().map(|&v| v as u128).sum();
    let mean = sum as f64 / merged.len() as f64;
    Ok((
        mean,
        order_statistic(&merged, 0.50) as f64,
        order_statistic(&merged, 0.99) as f64,
    ))
}

/// The fallback path: at least one client's raw stream is unusable, so every
/// client contributes its own avg/median/p99 -- from its trimmed stream when
/// available, from its precomputed summary otherwise -- and the trial
/// statistics are the mean of the averages and medians and the worst p99.
fn fallback_statistics(
    paths: &TrialPaths,
    clients: &[ClientArtifact],
    params: &EngineParams,
) -> Result<(f64, f64, f64)> {
    let contributions: Vec<ClientContribution> = clients
        .iter()
        .map(|client| client_contribution(paths, client, params))
        .collect::<Result<_>>()?;

    let count = contributions.len() as f64;
    let mean = contributions.iter().map(|c| c.avg_ns).sum::<f64>() / count;
    let median = contributions.iter().map(|c| c.median_ns).sum::<f64>() / count;
    let p99 = contributions.iter().map(|c| c.p99_ns).fold(0.0, f64::max);
    Ok((mean, median, p99))
}

fn client_contribution(
    paths: &TrialPaths,
    client: &ClientArtifact,
    params: &EngineParams,
) -> Result<ClientContribution> {
    if let Some(samples) = &client.samples {
        let trimmed = trim_sorted(samples, params.trim_fraction);
        if !trimmed.is_empty() {
            let sum: u128 = trimmed.iter().map(|&v| v as u128).sum();
            return Ok(ClientContribution {
                avg_ns: sum as f64 / trimmed.len() as f64,
                median_ns: order_statistic(trimmed, 0.50) as f64,
                p99_ns: order_statistic(trimmed, 0.99) as f64,
            });
        }
    }

    let report = client.report.as_ref();
    let latency = report.and_then(|r| r.latency);
    let tail = report.and_then(|r| r.tail);
    match (latency, tail) {
        (Some(latency), Some(tail)) => Ok(ClientContribution {
            avg_ns: latency.avg_ns as f64,
            median_ns: latency.median_ns as f64,
            p99_ns: tail.p99_ns as f64,
        }),
        _ => Err(Error::DataInconsistency {
            path: paths.dir().to_path_buf(),
            reason: "client has neither usable samples nor a summary".into(),
        }),
    }
}

/// `sequence[floor(q * N)]` over a sorted sequence, without interpolation.
fn order_statistic(sorted: &[u64], quantile: f64) -> u64 {
    let idx = (sorted.len() as f64 * quantile) as usize;
    sorted[idx.min(sorted.len() - 1)]
}
