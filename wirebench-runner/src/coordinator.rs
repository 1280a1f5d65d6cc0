//! Drives one trial from idempotency check to teardown.
//!
//! A trial moves through a fixed sequence: if its result directory already
//! exists it is skipped without side effects; otherwise the server is
//! launched detached, probed until alive within the warm-up window, the
//! clients are fanned out, joined behind a bounded barrier, and finally the
//! server is drained with an interrupt and its grace window. Every launched
//! process is tracked by the handle captured at spawn time.

use std::fmt::Write as _;
use std::time::Duration;

use tokio::time::Instant;

use wirebench_types::key::{ExperimentKey, TrialPaths};

use crate::config::Config;
use crate::lifecycle::{ProcessManager, RemoteProcess, Signal};

/// Event counters `perf stat` collects when the server runs under it.
const PERF_EVENTS: &str = "task-clock,cycles,instructions,cache-references,cache-misses";

/// How a trial ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    /// The trial ran and its artifacts are on disk.
    Completed,
    /// The result directory already existed; nothing was launched and
    /// existing files were left untouched.
    Skipped,
    /// Print-only mode: the commands were logged, nothing was launched.
    Printed,
    /// The trial could not be completed. The driver logs the reason and
    /// moves on to the next trial.
    Failed(String),
}

/// A client launch that is about to happen, or be printed.
struct ClientLaunch {
    host: String,
    command: String,
}

/// Runs trials against a fixed configuration.
#[derive(Debug)]
pub struct Coordinator<'a> {
    config: &'a Config,
    manager: &'a ProcessManager,
}

impl<'a> Coordinator<'a> {
    /// Creates a coordinator issuing process operations through `manager`.
    pub fn new(config: &'a Config, manager: &'a ProcessManager) -> Self {
        Self { config, manager }
    }

    /// Runs a single trial to one of its terminal states.
    pub async fn run_trial(&self, key: &ExperimentKey) -> TrialOutcome {
        let paths = TrialPaths::new(&self.config.result_root, key);
        if paths.dir().exists() {
            tracing::info!(key = %key, "result directory exists, skipping");
            return TrialOutcome::Skipped;
        }

        let procs = key.num_clients.min(self.config.max_client_procs);
        if procs == 0 {
            return TrialOutcome::Failed("trial has no clients".into());
        }
        if key.num_clients % procs != 0 {
            return TrialOutcome::Failed(format!(
                "{} logical clients cannot be multiplexed over {procs} processes evenly",
                key.num_clients
            ));
        }
        if (self.config.hosts.clients.len() as u32) < procs {
            return TrialOutcome::Failed(format!(
                "need {procs} client hosts, have {}",
                self.config.hosts.clients.len()
            ));
        }
        let multiplier = key.num_clients / procs;
        let server_host = self.config.hosts.server.addr.as_str();
        let server_command = self.server_command(key);
        let clients: Vec<ClientLaunch> = (1..=procs)
            .map(|idx| ClientLaunch {
                host: self.config.hosts.clients[idx as usize - 1].addr.clone(),
                command: self.client_command(key, multiplier, &paths, idx),
            })
            .collect();

        if self.config.print_only {
            tracing::info!(host = server_host, command = %server_command, "server launch");
            for (idx, client) in clients.iter().enumerate() {
                tracing::info!(
                    host = %client.host,
                    command = %client.command,
                    "client {} launch",
                    idx + 1
                );
            }
            return TrialOutcome::Printed;
        }

        if let Err(err) = tokio::fs::create_dir_all(paths.dir()).await {
            return TrialOutcome::Failed(format!(
                "failed to create {}: {err}",
                paths.dir().display()
            ));
        }

        let server = match self
            .manager
            .spawn_detached(
                server_host,
                &server_command,
                &paths.server_log(),
                &paths.server_err_log(),
            )
            .await
        {
            Ok(server) => server,
            Err(err) => return TrialOutcome::Failed(format!("server launch failed: {err}")),
        };
        tracing::info!(key = %key, pid = server.pid, "server starting");

        if !self
            .manager
            .await_started(&server, self.config.timing.server_warmup)
            .await
        {
            self.manager.signal(&server, Signal::Kill).await;
            return TrialOutcome::Failed("server did not come up within the warm-up window".into());
        }

        let mut launched = Vec::with_capacity(clients.len());
        for (idx, client) in clients.iter().enumerate() {
            let slot = idx as u32 + 1;
            match self
                .manager
                .spawn_detached(
                    &client.host,
                    &client.command,
                    &paths.client_log(slot),
                    &paths.client_err_log(slot),
                )
                .await
            {
                Ok(process) => launched.push(process),
                Err(err) => {
                    self.abort(&launched, &server).await;
                    return TrialOutcome::Failed(format!("client {slot} launch failed: {err}"));
                }
            }
        }
        tracing::info!(
            key = %key,
            processes = launched.len(),
            concurrency = multiplier,
            "clients running"
        );

        if !self.join_clients(&launched).await {
            tracing::warn!(key = %key, "client join timed out, escalating to SIGKILL");
            self.abort(&launched, &server).await;
            return TrialOutcome::Failed("client join timed out".into());
        }

        self.drain_server(&server).await;
        TrialOutcome::Completed
    }

    /// Blocks until every client process has exited, bounded by the
    /// configured join timeout.
    async fn join_clients(&self, clients: &[RemoteProcess]) -> bool {
        let deadline = Instant::now() + self.config.timing.client_join_timeout;
        for (idx, client) in clients.iter().enumerate() {
            let now = Instant::now();
            let remaining = if now >= deadline {
                return false;
            } else {
                deadline - now
            };
            if !self.manager.wait_for_exit(client, remaining).await {
                return false;
            }
            tracing::debug!(client = idx + 1, "client done");
        }
        true
    }

    /// Kills every remaining client, then drains the server.
    async fn abort(&self, clients: &[RemoteProcess], server: &RemoteProcess) {
        for client in clients {
            self.manager.signal(client, Signal::Kill).await;
        }
        for client in clients {
            self.manager
                .wait_for_exit(client, self.config.timing.client_grace)
                .await;
        }
        self.drain_server(server).await;
    }

    /// Interrupts the server so it flushes its statistics, waiting out its
    /// grace window and escalating to a kill if it does not exit.
    async fn drain_server(&self, server: &RemoteProcess) {
        self.manager.signal(server, Signal::Interrupt).await;
        if !self
            .manager
            .wait_for_exit(server, self.config.timing.server_grace)
            .await
        {
            tracing::warn!(pid = server.pid, "server survived its grace window, killing");
            self.manager.signal(server, Signal::Kill).await;
            self.manager
                .wait_for_exit(server, Duration::from_secs(1))
                .await;
        }
    }

    fn server_command(&self, key: &ExperimentKey) -> String {
        let mut cmd = String::new();
        if !self.config.server_wrapper.is_empty() {
            write_cmd(&mut cmd, &self.config.server_wrapper);
        }
        if self.config.perf {
            write_cmd(&mut cmd, &format!("perf stat -e {PERF_EVENTS}"));
        }
        write_cmd(
            &mut cmd,
            &format!(
                "{}/{} --port {} --config-path {}",
                self.config.exec_dir.display(),
                self.config.server_bin,
                self.config.port,
                self.config.config_path.display()
            ),
        );
        let _ = write!(cmd, " -s {}", key.size);
        if let Some(message) = &key.message {
            let _ = write!(cmd, " --system {} --message {message}", key.system);
        }
        cmd
    }

    fn client_command(
        &self,
        key: &ExperimentKey,
        multiplier: u32,
        paths: &TrialPaths,
        idx: u32,
    ) -> String {
        let mut cmd = format!(
            "{}/{} --port {} --config-path {} -i {}",
            self.config.exec_dir.display(),
            self.config.client_bin,
            self.config.port,
            self.config.config_path.display(),
            self.config.iterations * multiplier as u64,
        );
        if self.config.retries {
            cmd.push_str(" --retry");
        }
        let _ = write!(cmd, " -s {} -c {multiplier}", key.size);
        if let Some(message) = &key.message {
            let _ = write!(cmd, " --system {} --message {message}", key.system);
        }
        let _ = write!(cmd, " --latlog {}", paths.client_latencies(idx).display());
        cmd
    }
}

/// Appends a command fragment, space-separated.
fn write_cmd(cmd: &mut String, fragment: &str) {
    if !cmd.is_empty() {
        cmd.push(' ');
    }
    cmd.push_str(fragment);
}
