//! Discovery of trial folders and parallel dispatch of aggregation tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::available_parallelism;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};

use wirebench_types::key::ExperimentKey;

use crate::engine::{self, AggregateRow, EngineParams};

/// Optional allow-lists restricting which trials are aggregated.
///
/// Empty lists place no restriction; this is what makes incremental
/// re-aggregation of a subset of the tree cheap.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    /// Only aggregate these systems.
    pub systems: Vec<String>,
    /// Only aggregate these payload sizes.
    pub sizes: Vec<u64>,
    /// Only aggregate these client concurrencies.
    pub clients: Vec<u32>,
}

impl Filters {
    fn accepts(&self, key: &ExperimentKey) -> bool {
        (self.systems.is_empty() || self.systems.contains(&key.system))
            && (self.sizes.is_empty() || self.sizes.contains(&key.size))
            && (self.clients.is_empty() || self.clients.contains(&key.num_clients))
    }
}

/// Walks the result tree and parses every trial leaf back into a key.
///
/// The tree has the fixed shape
/// `{system}/{message}/size_{N}/{K}clients/trial_{T}`; files and
/// directories that do not fit it are logged and skipped, since result
/// roots tend to accumulate stray notes and plots.
pub fn discover(root: &Path, filters: &Filters) -> std::io::Result<Vec<ExperimentKey>> {
    let mut keys = Vec::new();

    let mut pending = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if depth < 4 {
                pending.push((path, depth + 1));
                continue;
            }
            let relative = path.strip_prefix(root).expect("walk stays under root");
            match ExperimentKey::parse_path(relative) {
                Ok(key) if filters.accepts(&key) => keys.push(key),
                Ok(_) => {}
                Err(err) => tracing::debug!(%err, "ignoring non-trial directory"),
            }
        }
    }

    Ok(keys)
}

/// Aggregates all discovered trials over a bounded worker pool.
///
/// Tasks are independent and stateless; each one reads only its own trial's
/// artifacts and returns either a row or nothing. Rows come back in
/// completion order. A panicking task is logged and contributes nothing,
/// exactly like a trial that failed to aggregate.
pub async fn run(
    root: &Path,
    keys: Vec<ExperimentKey>,
    params: EngineParams,
) -> Vec<AggregateRow> {
    let parallelism = available_parallelism().map(|n| n.get()).unwrap_or(1);

    let bar = ProgressBar::new(keys.len() as u64).with_style(
        ProgressStyle::with_template("{wide_bar} {pos}/{len} folders")
            .expect("static progress template"),
    );

    let root = Arc::new(root.to_path_buf());
    let params = Arc::new(params);

    let rows: Vec<AggregateRow> = futures::stream::iter(keys)
        .map(|key| {
            let root = Arc::clone(&root);
            let params = Arc::clone(&params);
            tokio::task::spawn_blocking(move || engine::aggregate_trial(&root, &key, &params))
        })
        .buffer_unordered(parallelism)
        .filter_map(|task| {
            bar.inc(1);
            futures::future::ready(match task {
                Ok(row) => row,
                Err(err) => {
                    tracing::error!(%err, "aggregation task panicked");
                    None
                }
            })
        })
        .collect()
        .await;

    bar.finish_and_clear();
    rows
}

/// Convenience wrapper running discovery and aggregation in one call.
pub async fn aggregate_tree(
    root: &Path,
    filters: &Filters,
    params: EngineParams,
) -> std::io::Result<(Vec<AggregateRow>, usize)> {
    let keys = discover(root, filters)?;
    let discovered = keys.len();
    let rows = run(root, keys, params).await;
    Ok((rows, discovered))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fmt::Write as _;
    use std::fs;

    use tempfile::TempDir;
    use wirebench_types::key::TrialPaths;

    use super::*;

    fn params() -> EngineParams {
        EngineParams {
            trim_fraction: 0.0,
            iterations: 3,
            max_client_procs: 10,
        }
    }

    fn seed_trial(root: &Path, key: &ExperimentKey, streams: &[&[u64]]) {
        let paths = TrialPaths::new(root, key);
        fs::create_dir_all(paths.dir()).unwrap();
        for (i, stream) in streams.iter().enumerate() {
            let mut contents = String::new();
            for sample in *stream {
                writeln!(contents, "{sample}").unwrap();
            }
            fs::write(paths.client_latencies(i as u32 + 1), contents).unwrap();
        }
    }

    fn seed_key(system: &str, size: u64, num_clients: u32, trial: u32) -> ExperimentKey {
        ExperimentKey {
            system: system.into(),
            message: None,
            size,
            num_clients,
            trial,
        }
    }

    #[test]
    fn discovery_skips_stray_entries() {
        let root = TempDir::new().unwrap();
        let key = seed_key("baseline", 1024, 1, 0);
        seed_trial(root.path(), &key, &[&[1, 2, 3]]);

        fs::write(root.path().join("notes.txt"), "scratch").unwrap();
        fs::create_dir_all(root.path().join("baseline/none/size_1024/oops")).unwrap();

        let keys = discover(root.path(), &Filters::default()).unwrap();
        assert_eq!(keys, vec![key]);
    }

    #[test]
    fn allow_lists_restrict_discovery() {
        let root = TempDir::new().unwrap();
        seed_trial(root.path(), &seed_key("baseline", 1024, 1, 0), &[&[1, 2, 3]]);
        seed_trial(root.path(), &seed_key("protobuf", 1024, 1, 0), &[&[1, 2, 3]]);
        seed_trial(root.path(), &seed_key("baseline", 4096, 2, 0), &[&[1, 2, 3], &[1, 2, 3]]);

        let filters = Filters {
            systems: vec!["baseline".into()],
            sizes: vec![1024],
            clients: vec![],
        };
        let keys = discover(root.path(), &filters).unwrap();
        assert_eq!(keys, vec![seed_key("baseline", 1024, 1, 0)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn broken_folder_is_isolated() {
        let root = TempDir::new().unwrap();
        let good = seed_key("baseline", 1024, 1, 0);
        seed_trial(root.path(), &good, &[&[1, 2, 3]]);
        // Trial 1 exists but client 1 never wrote anything.
        let broken = seed_key("baseline", 1024, 1, 1);
        fs::create_dir_all(TrialPaths::new(root.path(), &broken).dir()).unwrap();

        let (rows, discovered) = aggregate_tree(root.path(), &Filters::default(), params())
            .await
            .unwrap();
        assert_eq!(discovered, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, good);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reruns_are_idempotent() {
        let root = TempDir::new().unwrap();
        for trial in 0..3 {
            seed_trial(
                root.path(),
                &seed_key("baseline", 1024, 1, trial),
                &[&[10, 20, 30]],
            );
        }

        let (first, _) = aggregate_tree(root.path(), &Filters::default(), params())
            .await
            .unwrap();
        let (second, _) = aggregate_tree(root.path(), &Filters::default(), params())
            .await
            .unwrap();

        let as_set = |rows: &[AggregateRow]| -> HashSet<String> {
            rows.iter().map(|r| r.key.to_string()).collect()
        };
        assert_eq!(as_set(&first), as_set(&second));
        assert_eq!(first.len(), 3);
    }
}
