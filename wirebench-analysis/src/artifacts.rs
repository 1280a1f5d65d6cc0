//! Reading per-client artifacts from a completed trial folder.

use std::fs;
use std::path::Path;

use wirebench_types::error::{Error, Result};
use wirebench_types::key::TrialPaths;
use wirebench_types::report::ClientReport;

/// Everything one client left behind in a trial folder.
///
/// The raw sample stream is the preferred source of statistics; the parsed
/// summary report is a fallback for when the stream is missing or does not
/// match the expected request count.
#[derive(Debug, Default)]
pub struct ClientArtifact {
    /// Raw latency samples in nanoseconds, sorted ascending.
    ///
    /// `None` if the latencies file is missing, truncated, or otherwise
    /// unusable.
    pub samples: Option<Vec<u64>>,
    /// The client's own latency summary, parsed from its stderr log.
    pub report: Option<ClientReport>,
    /// The client's final retry counter.
    pub retries: u64,
}

/// Loads the artifacts of client `idx` (1-based) from a trial folder.
///
/// A missing or inconsistent latencies file demotes the client to its
/// summary report with a warning; only a hard parse failure of the summary
/// itself (such as an unknown time unit) is returned as an error.
pub fn load_client(paths: &TrialPaths, idx: u32, expected_samples: u64) -> Result<ClientArtifact> {
    let mut artifact = ClientArtifact::default();

    match read_samples(&paths.client_latencies(idx), expected_samples) {
        Ok(samples) => artifact.samples = Some(samples),
        Err(err) => tracing::warn!(%err, "falling back to client summary"),
    }

    let err_log = paths.client_err_log(idx);
    if let Ok(contents) = fs::read_to_string(&err_log) {
        let report = ClientReport::parse(&contents)?;
        if !report.is_empty() {
            artifact.report = Some(report);
        }
    }

    // Retries are printed to stdout, separately from the latency summary.
    if let Ok(contents) = fs::read_to_string(paths.client_log(idx)) {
        artifact.retries = ClientReport::parse(&contents)?.retries.unwrap_or(0);
    }

    Ok(artifact)
}

/// Reads a raw latencies file and validates it against the expected count.
fn read_samples(path: &Path, expected: u64) -> Result<Vec<u64>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingArtifact(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };

    let mut samples = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = line.parse().map_err(|_| Error::DataInconsistency {
            path: path.to_path_buf(),
            reason: format!("non-integer sample `{line}`"),
        })?;
        samples.push(value);
    }

    if samples.len() as u64 != expected {
        return Err(Error::DataInconsistency {
            path: path.to_path_buf(),
            reason: format!("{} samples, expected {expected}", samples.len()),
        });
    }
    if !samples.is_sorted() {
        return Err(Error::DataInconsistency {
            path: path.to_path_buf(),
            reason: "samples are not sorted ascending".into(),
        });
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use wirebench_types::key::ExperimentKey;

    use super::*;

    fn trial_paths(root: &TempDir) -> TrialPaths {
        let key = ExperimentKey {
            system: "baseline".into(),
            message: None,
            size: 1024,
            num_clients: 1,
            trial: 0,
        };
        let paths = TrialPaths::new(root.path(), &key);
        fs::create_dir_all(paths.dir()).unwrap();
        paths
    }

    #[test]
    fn loads_raw_samples_and_retries() {
        let root = TempDir::new().unwrap();
        let paths = trial_paths(&root);
        fs::write(paths.client_latencies(1), "100\n200\n300\n").unwrap();
        fs::write(paths.client_log(1), "Final num retries: 7\n").unwrap();

        let artifact = load_client(&paths, 1, 3).unwrap();
        assert_eq!(artifact.samples, Some(vec![100, 200, 300]));
        assert_eq!(artifact.retries, 7);
    }

    #[test]
    fn sample_count_mismatch_demotes_to_summary() {
        let root = TempDir::new().unwrap();
        let paths = trial_paths(&root);
        fs::write(paths.client_latencies(1), "100\n200\n").unwrap();
        fs::write(
            paths.client_err_log(1),
            "LATENCY end-to-end: 100 ns 150 ns/150 ns 200 ns (3 samples, 450 ns total)\n",
        )
        .unwrap();

        let artifact = load_client(&paths, 1, 3).unwrap();
        assert!(artifact.samples.is_none());
        assert!(artifact.report.is_some());
    }

    #[test]
    fn unsorted_samples_are_unusable() {
        let root = TempDir::new().unwrap();
        let paths = trial_paths(&root);
        fs::write(paths.client_latencies(1), "300\n100\n200\n").unwrap();

        let artifact = load_client(&paths, 1, 3).unwrap();
        assert!(artifact.samples.is_none());
    }

    #[test]
    fn missing_everything_yields_empty_artifact() {
        let root = TempDir::new().unwrap();
        let paths = trial_paths(&root);

        let artifact = load_client(&paths, 1, 3).unwrap();
        assert!(artifact.samples.is_none());
        assert!(artifact.report.is_none());
        assert_eq!(artifact.retries, 0);
    }

    #[test]
    fn bad_unit_in_summary_is_an_error() {
        let root = TempDir::new().unwrap();
        let paths = trial_paths(&root);
        fs::write(
            paths.client_err_log(1),
            "TAIL LATENCY 99=24 fortnights 99.9=48 us 99.99=979 us\n",
        )
        .unwrap();

        assert!(load_client(&paths, 1, 3).is_err());
    }
}
