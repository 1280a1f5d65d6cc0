//! Parsing of the statistics lines emitted by benchmark clients.
//!
//! Clients print a latency summary to stderr and a retry counter to stdout
//! at the end of a run:
//!
//! ```text
//! LATENCY end-to-end: 8176 ns 12 us/8192 ns 979 us (500000 samples, 6267 ms total)
//! TAIL LATENCY 99=24 us 99.9=48 us 99.99=979 us
//! Final num retries: 3
//! ```
//!
//! All values are normalized to nanoseconds on parse. These summaries are
//! only used as a fallback when a client's raw latency samples are unusable.

use crate::error::{Error, Result};

/// The `LATENCY end-to-end:` summary of one client run, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndToEnd {
    /// Minimum per-request latency.
    pub min_ns: u64,
    /// Mean per-request latency.
    pub avg_ns: u64,
    /// Median per-request latency.
    pub median_ns: u64,
    /// Maximum per-request latency.
    pub max_ns: u64,
    /// Number of samples the summary was computed over.
    pub samples: u64,
    /// Total wall time spent in requests.
    pub total_ns: u64,
}

/// The `TAIL LATENCY` summary of one client run, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail {
    /// 99th percentile latency.
    pub p99_ns: u64,
    /// 99.9th percentile latency.
    pub p999_ns: u64,
    /// 99.99th percentile latency.
    pub p9999_ns: u64,
}

/// Everything a client reports about its own run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientReport {
    /// End-to-end latency summary, if the client printed one.
    pub latency: Option<EndToEnd>,
    /// Tail latency summary, if the client printed one.
    pub tail: Option<Tail>,
    /// Final retry counter, if the client printed one.
    pub retries: Option<u64>,
}

impl ClientReport {
    /// Scans log contents for the known statistics lines.
    ///
    /// Lines that do not start with one of the known prefixes are ignored;
    /// a recognized line that fails to parse (including an unknown time
    /// unit) is an error.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut report = ClientReport::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.starts_with("LATENCY end-to-end:") {
                report.latency = Some(parse_latency_line(line)?);
            } else if line.starts_with("TAIL LATENCY") {
                report.tail = Some(parse_tail_line(line)?);
            } else if line.starts_with("Final num retries:") {
                report.retries = Some(parse_retries_line(line)?);
            }
        }
        Ok(report)
    }

    /// Whether any statistics line was found at all.
    pub fn is_empty(&self) -> bool {
        self.latency.is_none() && self.tail.is_none() && self.retries.is_none()
    }
}

/// Converts a value with a time unit to nanoseconds.
///
/// Unrecognized units are a hard error, never silently interpreted.
pub fn to_nanos(value: u64, unit: &str) -> Result<u64> {
    let factor = match unit {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        other => return Err(Error::Parse(format!("unknown time unit `{other}`"))),
    };
    Ok(value * factor)
}

/// Parses `LATENCY end-to-end: {min} {u} {avg} {u}/{median} {u} {max} {u}
/// ({n} samples, {total} {u} total)`.
fn parse_latency_line(line: &str) -> Result<EndToEnd> {
    let body = line
        .strip_prefix("LATENCY end-to-end:")
        .ok_or_else(|| malformed(line))?;

    // The avg unit and the median value share a token ("12 us/8192 ns"), and
    // the trailing sample count is parenthesized. Flatten both before
    // tokenizing.
    let body = body.replace('/', " ");
    let tokens: Vec<&str> = body
        .split_whitespace()
        .map(|t| t.trim_matches(|c| c == '(' || c == ')' || c == ','))
        .collect();

    let [min, min_u, avg, avg_u, median, median_u, max, max_u, samples, "samples", total, total_u, "total"] =
        tokens[..]
    else {
        return Err(malformed(line));
    };

    Ok(EndToEnd {
        min_ns: to_nanos(parse_int(min, line)?, min_u)?,
        avg_ns: to_nanos(parse_int(avg, line)?, avg_u)?,
        median_ns: to_nanos(parse_int(median, line)?, median_u)?,
        max_ns: to_nanos(parse_int(max, line)?, max_u)?,
        samples: parse_int(samples, line)?,
        total_ns: to_nanos(parse_int(total, line)?, total_u)?,
    })
}

/// Parses `TAIL LATENCY 99={p99} {u} 99.9={p999} {u} 99.99={p9999} {u}`.
fn parse_tail_line(line: &str) -> Result<Tail> {
    let body = line
        .strip_prefix("TAIL LATENCY")
        .ok_or_else(|| malformed(line))?;
    let tokens: Vec<&str> = body.split_whitespace().collect();

    let [p99, p99_u, p999, p999_u, p9999, p9999_u] = tokens[..] else {
        return Err(malformed(line));
    };

    let quantile = |token: &str, marker: &str| -> Result<u64> {
        token
            .strip_prefix(marker)
            .and_then(|t| t.strip_prefix('='))
            .ok_or_else(|| malformed(line))
            .and_then(|n| parse_int(n, line))
    };

    Ok(Tail {
        p99_ns: to_nanos(quantile(p99, "99")?, p99_u)?,
        p999_ns: to_nanos(quantile(p999, "99.9")?, p999_u)?,
        p9999_ns: to_nanos(quantile(p9999, "99.99")?, p9999_u)?,
    })
}

/// Parses `Final num retries: {n}`.
fn parse_retries_line(line: &str) -> Result<u64> {
    let n = line
        .strip_prefix("Final num retries:")
        .ok_or_else(|| malformed(line))?;
    parse_int(n.trim(), line)
}

fn parse_int(token: &str, line: &str) -> Result<u64> {
    token
        .parse()
        .map_err(|_| Error::Parse(format!("bad number `{token}` in `{line}`")))
}

fn malformed(line: &str) -> Error {
    Error::Parse(format!("malformed statistics line `{line}`"))
}
