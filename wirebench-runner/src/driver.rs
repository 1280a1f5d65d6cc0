//! Deterministic iteration over the experiment matrix.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytesize::ByteSize;

use wirebench_types::error::Error;
use wirebench_types::key::{ExperimentKey, TrialPaths};
use wirebench_types::report::ClientReport;

use crate::config::{Config, ExperimentMode};
use crate::coordinator::{Coordinator, TrialOutcome};
use crate::lifecycle::ProcessManager;
use crate::remote::RemoteExecutor;

/// Outcome counters for a full matrix run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatrixSummary {
    /// Trials that ran to completion (or were printed in print-only mode).
    pub completed: usize,
    /// Trials whose result directory already existed.
    pub skipped: usize,
    /// Trials that failed; their reasons are in the log.
    pub failed: usize,
}

/// Owns the configuration and process manager for a batch of experiments.
#[derive(Debug)]
pub struct Driver {
    config: Config,
    manager: ProcessManager,
}

impl Driver {
    /// Creates a driver issuing remote operations through `executor`.
    pub fn new(config: Config, executor: Arc<dyn RemoteExecutor>) -> Self {
        let manager = ProcessManager::new(executor, config.timing.poll_interval);
        Self { config, manager }
    }

    /// The full experiment plan in its fixed, reproducible order: trial
    /// repetition outermost, then system, then payload size (or message
    /// variant), then concurrency.
    ///
    /// Keeping the order deterministic makes interrupted batches cheap to
    /// re-run: completed trials are skipped and the remainder fills in.
    pub fn plan(&self) -> Vec<ExperimentKey> {
        let mut keys = Vec::new();
        for trial in 0..self.config.trials {
            for system in &self.config.systems {
                match self.config.experiment {
                    ExperimentMode::Size => {
                        let message = system.base_message();
                        for &size in &self.config.sizes {
                            for &num_clients in &self.config.clients_list {
                                keys.push(ExperimentKey {
                                    system: system.name.clone(),
                                    message: message.clone(),
                                    size,
                                    num_clients,
                                    trial,
                                });
                            }
                        }
                    }
                    ExperimentMode::Depth => {
                        for message in &system.messages {
                            for &num_clients in &self.config.clients_list {
                                keys.push(ExperimentKey {
                                    system: system.name.clone(),
                                    message: Some(message.clone()),
                                    size: self.config.base_size,
                                    num_clients,
                                    trial,
                                });
                            }
                        }
                    }
                }
            }
        }
        keys
    }

    /// Runs every trial of the matrix, strictly sequentially.
    ///
    /// Individual trial failures are logged and counted, never fatal: the
    /// remaining trials still run and their artifacts are still usable.
    pub async fn run_matrix(&self) -> MatrixSummary {
        if !self.config.print_only {
            self.manager.cleanup_all(&self.config).await;
        }

        let coordinator = Coordinator::new(&self.config, &self.manager);
        let mut summary = MatrixSummary::default();
        for key in self.plan() {
            tracing::info!(key = %key, payload = %ByteSize::b(key.size), "running trial");
            match coordinator.run_trial(&key).await {
                TrialOutcome::Completed | TrialOutcome::Printed => summary.completed += 1,
                TrialOutcome::Skipped => summary.skipped += 1,
                TrialOutcome::Failed(reason) => {
                    tracing::warn!(key = %key, reason, "trial failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "matrix finished"
        );
        summary
    }

    /// Runs one trial of a single configuration and prints its statistics.
    ///
    /// The trial index is chosen automatically as the next free `trial_*`
    /// slot under the configuration's result directory.
    pub async fn run_single(
        &self,
        system: &str,
        message: Option<String>,
        size: u64,
        num_clients: u32,
    ) -> Result<()> {
        let spec = self
            .config
            .systems
            .iter()
            .find(|s| s.name == system)
            .with_context(|| format!("system `{system}` is not configured"))?;
        let message = message.or_else(|| spec.base_message());

        let mut key = ExperimentKey {
            system: system.to_string(),
            message,
            size,
            num_clients,
            trial: 0,
        };
        let parent = key
            .trial_dir(&self.config.result_root)
            .parent()
            .map(Path::to_path_buf)
            .context("trial directory has no parent")?;
        key.trial = count_trial_dirs(&parent)?;

        if !self.config.print_only {
            self.manager.cleanup_all(&self.config).await;
        }

        let coordinator = Coordinator::new(&self.config, &self.manager);
        match coordinator.run_trial(&key).await {
            TrialOutcome::Completed => self.summarize_trial(&key)?,
            TrialOutcome::Printed => {}
            TrialOutcome::Skipped => bail!("trial directory for {key} already exists"),
            TrialOutcome::Failed(reason) => bail!("trial {key} failed: {reason}"),
        }

        Ok(())
    }

    /// Prints per-client and combined statistics from the clients' own
    /// summary lines, in the units the aggregate table uses.
    fn summarize_trial(&self, key: &ExperimentKey) -> Result<()> {
        let paths = TrialPaths::new(&self.config.result_root, key);
        let procs = key.num_clients.min(self.config.max_client_procs);

        let mut avgs = Vec::with_capacity(procs as usize);
        let mut medians = Vec::with_capacity(procs as usize);
        let mut p99s = Vec::with_capacity(procs as usize);
        let mut total_retries = 0u64;

        for idx in 1..=procs {
            let err_log = paths.client_err_log(idx);
            let contents = fs::read_to_string(&err_log)
                .map_err(|_| Error::MissingArtifact(err_log.clone()))?;
            let report = ClientReport::parse(&contents)?;
            let (latency, tail) = report
                .latency
                .zip(report.tail)
                .ok_or_else(|| Error::DataInconsistency {
                    path: err_log,
                    reason: "client printed no latency summary".into(),
                })?;

            let retries = fs::read_to_string(paths.client_log(idx))
                .ok()
                .and_then(|contents| ClientReport::parse(&contents).ok())
                .and_then(|report| report.retries)
                .unwrap_or(0);
            total_retries += retries;

            let avg_us = latency.avg_ns as f64 / 1e3;
            let median_us = latency.median_ns as f64 / 1e3;
            let p99_us = tail.p99_ns as f64 / 1e3;
            let tput = 1000.0 / avg_us;
            tracing::info!(
                client = idx,
                "tput: {tput:.2} req/ms | {:.2} Gbps, avg: {avg_us:.2} us, \
                 median: {median_us:.2} us, p99: {p99_us:.2} us, {retries} retries",
                gbps(tput, key.size),
            );

            avgs.push(avg_us);
            medians.push(median_us);
            p99s.push(p99_us);
        }

        let avg = mean(&avgs);
        let tput = key.num_clients as f64 / avg * 1000.0;
        tracing::info!(
            "combined tput: {tput:.2} req/ms | {:.2} Gbps, avg: {avg:.2} us, \
             median: {:.2} us, p99: {:.2} us, {total_retries} retries",
            gbps(tput, key.size),
            mean(&medians),
            p99s.iter().copied().fold(0.0, f64::max),
        );

        Ok(())
    }
}

/// Counts the `trial_*` directories already present under `parent`.
fn count_trial_dirs(parent: &Path) -> Result<u32> {
    if !parent.exists() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if entry.path().is_dir() && entry.file_name().to_string_lossy().starts_with("trial") {
            count += 1;
        }
    }
    Ok(count)
}

/// Converts a requests-per-millisecond rate to gigabits per second.
fn gbps(tput_req_per_ms: f64, size: u64) -> f64 {
    tput_req_per_ms * 1000.0 * size as f64 * 8.0 / 1e9
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::config::{Host, Hosts, SystemSpec, Transport};
    use crate::remote::testing::ScriptedExecutor;

    use super::*;

    fn config(root: &TempDir) -> Config {
        Config {
            hosts: Hosts {
                server: Host {
                    addr: "server-host".into(),
                },
                clients: vec![
                    Host {
                        addr: "client-host-1".into(),
                    },
                    Host {
                        addr: "client-host-2".into(),
                    },
                ],
            },
            transport: Transport {
                user: "bench".into(),
                ..Transport::default()
            },
            systems: vec![
                SystemSpec {
                    name: "baseline".into(),
                    messages: vec![],
                },
                SystemSpec {
                    name: "protobuf".into(),
                    messages: vec!["Get".into(), "Msg1L".into()],
                },
            ],
            sizes: vec![512, 1024],
            clients_list: vec![1, 2],
            trials: 2,
            result_root: root.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn plan_order_is_deterministic() {
        let root = TempDir::new().unwrap();
        let driver = Driver::new(
            config(&root),
            Arc::new(ScriptedExecutor::new(|_, _| Ok(String::new()))),
        );

        let plan = driver.plan();
        // 2 trials x 2 systems x 2 sizes x 2 concurrencies
        assert_eq!(plan.len(), 16);

        // Concurrency varies fastest, then size, then system; the trial
        // repetition is outermost.
        assert_eq!(plan[0].to_string(), "baseline/none/size_512/1clients/trial_0");
        assert_eq!(plan[1].to_string(), "baseline/none/size_512/2clients/trial_0");
        assert_eq!(plan[2].to_string(), "baseline/none/size_1024/1clients/trial_0");
        assert_eq!(plan[4].to_string(), "protobuf/Get/size_512/1clients/trial_0");
        assert_eq!(plan[8].to_string(), "baseline/none/size_512/1clients/trial_1");

        assert_eq!(plan, driver.plan());
    }

    #[test]
    fn depth_plan_sweeps_messages_at_base_size() {
        let root = TempDir::new().unwrap();
        let mut config = config(&root);
        config.experiment = ExperimentMode::Depth;
        config.systems.remove(0);
        config.trials = 1;
        let driver = Driver::new(
            config,
            Arc::new(ScriptedExecutor::new(|_, _| Ok(String::new()))),
        );

        let plan = driver.plan();
        // 1 trial x 1 system x 2 messages x 2 concurrencies
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().all(|k| k.size == 4096));
        assert_eq!(plan[0].message.as_deref(), Some("Get"));
        assert_eq!(plan[2].message.as_deref(), Some("Msg1L"));
    }

    #[tokio::test(start_paused = true)]
    async fn print_only_runs_no_commands() {
        let root = TempDir::new().unwrap();
        let mut config = config(&root);
        config.print_only = true;

        let executor = Arc::new(ScriptedExecutor::new(|_, _| Ok(String::new())));
        let driver = Driver::new(config, executor.clone());

        let summary = driver.run_matrix().await;
        assert_eq!(summary.completed, 16);
        assert_eq!(summary.failed, 0);
        assert!(executor.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn existing_directories_are_skipped() {
        let root = TempDir::new().unwrap();
        let config = config(&root);

        // Pre-create every trial directory; only cleanup commands may run.
        let executor = Arc::new(ScriptedExecutor::new(|host, command| {
            if command.starts_with("pgrep") && command.contains("> /dev/null") {
                return Err(ScriptedExecutor::no_such_process(host));
            }
            Ok(String::new())
        }));
        let driver = Driver::new(config, executor.clone());
        for key in driver.plan() {
            fs::create_dir_all(key.trial_dir(root.path())).unwrap();
        }

        let summary = driver.run_matrix().await;
        assert_eq!(summary.skipped, 16);
        assert_eq!(summary.completed, 0);
        assert!(
            executor
                .commands()
                .iter()
                .all(|(_, c)| c.contains("pgrep") || c.contains("xargs"))
        );
    }

    #[test]
    fn trial_dirs_are_counted_per_configuration() {
        let root = TempDir::new().unwrap();
        let parent = root.path().join("baseline/none/size_1024/1clients");
        assert_eq!(count_trial_dirs(&parent).unwrap(), 0);

        fs::create_dir_all(parent.join("trial_0")).unwrap();
        fs::create_dir_all(parent.join("trial_1")).unwrap();
        fs::write(parent.join("notes.txt"), "scratch").unwrap();
        assert_eq!(count_trial_dirs(&parent).unwrap(), 2);
    }
}
