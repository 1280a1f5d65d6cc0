//! Configuration for the wirebench runner.
//!
//! Configuration can be loaded from multiple sources with the following
//! precedence (highest to lowest):
//!
//! 1. Environment variables (prefixed with `WB__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use `WB__` as a prefix and double underscores
//! (`__`) to denote nested configuration structures, e.g.
//! `WB__HOSTS__SERVER__ADDR=10.0.0.1` or `WB__TIMING__SERVER_WARMUP=5s`.
//!
//! A minimal YAML configuration looks like this:
//!
//! ```yaml
//! hosts:
//!   server:
//!     addr: 10.0.0.1
//!   clients:
//!     - addr: 10.0.0.2
//!     - addr: 10.0.0.3
//! transport:
//!   user: bench
//!   key_file: /home/bench/.ssh/id_rsa
//! exec_dir: /opt/wirebench/bin
//! result_root: /nfs/results
//! systems:
//!   - name: baseline
//!   - name: protobuf
//!     messages: [Get, Msg1L, Msg2L]
//! sizes: [128, 1024, 4096]
//! clients_list: [1, 2, 4]
//! trials: 5
//! ```
//!
//! The result root is assumed to live on a filesystem shared between the
//! driver machine and every host, as on a cluster with NFS-mounted homes:
//! remote processes redirect their output into it, and the idempotency
//! check and later analysis read it locally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use wirebench_types::error::Error;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "WB__";

/// A remote machine taking part in an experiment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Host {
    /// Address the SSH transport connects to.
    pub addr: String,
}

/// The server host and the pool of client hosts.
///
/// Client slot `i` (1-based) always runs on `clients[i - 1]`, so a slot's
/// logs and processes stay on the same machine across trials.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Hosts {
    /// Host the server process runs on.
    pub server: Host,
    /// Hosts available for client processes.
    pub clients: Vec<Host>,
}

/// SSH transport settings shared by every remote command.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Transport {
    /// Login user on the remote hosts.
    pub user: String,
    /// Private key used for authentication.
    pub key_file: PathBuf,
    /// SSH port on the remote hosts.
    pub ssh_port: u16,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            user: String::new(),
            key_file: PathBuf::from("~/.ssh/id_rsa"),
            ssh_port: 22,
        }
    }
}

/// One serialization system under test.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemSpec {
    /// Name as it appears in result paths and in the binaries' `--system`
    /// flag.
    pub name: String,
    /// Message variants the system can encode. Empty for raw-byte baselines,
    /// which are launched without `--system`/`--message` flags.
    #[serde(default)]
    pub messages: Vec<String>,
}

impl SystemSpec {
    /// The message variant used when the sweep is over payload sizes.
    pub fn base_message(&self) -> Option<String> {
        self.messages.first().cloned()
    }
}

/// Which dimension the experiment sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentMode {
    /// Sweep payload sizes, using each system's base message variant.
    Size,
    /// Sweep message variants at the base payload size.
    Depth,
}

/// Waits and grace windows around process lifecycle transitions.
///
/// Each of these bounds a poll-until-condition loop rather than being slept
/// through unconditionally.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Timing {
    /// Upper bound on the server warm-up probe before clients launch.
    #[serde(with = "humantime_serde")]
    pub server_warmup: Duration,

    /// Grace window for the server to exit after an interrupt.
    #[serde(with = "humantime_serde")]
    pub server_grace: Duration,

    /// Grace window for a client to exit after a kill.
    #[serde(with = "humantime_serde")]
    pub client_grace: Duration,

    /// Upper bound on the client join barrier. When it expires the remaining
    /// clients are killed and the trial is recorded as failed.
    #[serde(with = "humantime_serde")]
    pub client_join_timeout: Duration,

    /// Base interval between liveness polls; backs off up to one second.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            server_warmup: Duration::from_secs(3),
            server_grace: Duration::from_secs(10),
            client_grace: Duration::from_secs(2),
            client_join_timeout: Duration::from_secs(15 * 60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Main configuration for the runner.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Remote machines taking part in experiments.
    pub hosts: Hosts,

    /// SSH transport settings.
    pub transport: Transport,

    /// Directory on the remote hosts holding the benchmark binaries.
    pub exec_dir: PathBuf,

    /// File name of the server binary inside [`exec_dir`](Self::exec_dir).
    pub server_bin: String,

    /// File name of the client binary inside [`exec_dir`](Self::exec_dir).
    pub client_bin: String,

    /// Port the server listens on.
    pub port: u16,

    /// Path of the network configuration file passed to both binaries.
    pub config_path: PathBuf,

    /// Root of the result tree, shared between the driver and all hosts.
    pub result_root: PathBuf,

    /// Which dimension the experiment sweeps.
    pub experiment: ExperimentMode,

    /// The systems under test.
    pub systems: Vec<SystemSpec>,

    /// Payload sizes for size sweeps.
    pub sizes: Vec<u64>,

    /// Payload size used when sweeping message variants.
    pub base_size: u64,

    /// Logical client counts to sweep.
    pub clients_list: Vec<u32>,

    /// Number of repetitions of the whole matrix.
    pub trials: u32,

    /// Requests issued per logical client.
    pub iterations: u64,

    /// Whether clients retry lost requests.
    pub retries: bool,

    /// Maximum client processes launched per trial. Logical clients beyond
    /// this bound run as intra-process concurrency on the launched clients.
    pub max_client_procs: u32,

    /// Prefix for the server command, controlling scheduling and affinity.
    pub server_wrapper: String,

    /// Run the server under `perf stat` to collect cache statistics.
    pub perf: bool,

    /// Log every remote command instead of running anything.
    pub print_only: bool,

    /// Lifecycle waits and grace windows.
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: Hosts::default(),
            transport: Transport::default(),

            exec_dir: PathBuf::from("/usr/local/bin"),
            server_bin: "echo-server".into(),
            client_bin: "echo-client".into(),
            port: 12345,
            config_path: PathBuf::from("config.yaml"),
            result_root: PathBuf::from("results"),

            experiment: ExperimentMode::Size,
            systems: Vec::new(),
            sizes: vec![1024],
            base_size: 4096,
            clients_list: vec![1],
            trials: 5,
            iterations: 500_000,
            retries: true,

            max_client_procs: 10,
            server_wrapper: "nice -n -20 taskset 0x1".into(),
            perf: false,
            print_only: false,

            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file, and the
    /// environment, in increasing order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Rejects invalid flag combinations before any remote side effect.
    pub fn validate(&self) -> wirebench_types::Result<()> {
        let fail = |reason: String| Err(Error::Misconfiguration(reason));

        if self.hosts.server.addr.is_empty() {
            return fail("server host address is empty".into());
        }
        if self.transport.user.is_empty() {
            return fail("transport user is empty".into());
        }
        if self.systems.is_empty() {
            return fail("no systems configured".into());
        }
        if self.trials == 0 {
            return fail("trials must be at least 1".into());
        }
        if self.iterations == 0 {
            return fail("iterations must be at least 1".into());
        }
        if self.max_client_procs == 0 {
            return fail("max_client_procs must be at least 1".into());
        }
        if self.clients_list.is_empty() {
            return fail("clients_list is empty".into());
        }

        match self.experiment {
            ExperimentMode::Size if self.sizes.is_empty() => {
                return fail("size experiment without payload sizes".into());
            }
            ExperimentMode::Depth => {
                for system in &self.systems {
                    if system.messages.is_empty() {
                        return fail(format!(
                            "depth experiment requires message variants, but system `{}` has none",
                            system.name
                        ));
                    }
                }
            }
            _ => {}
        }

        let mut needed_hosts = 0;
        for &num_clients in &self.clients_list {
            if num_clients == 0 {
                return fail("clients_list entries must be at least 1".into());
            }
            if num_clients > self.max_client_procs && num_clients % self.max_client_procs != 0 {
                return fail(format!(
                    "{num_clients} logical clients cannot be multiplexed over \
                     {} processes evenly",
                    self.max_client_procs
                ));
            }
            needed_hosts = needed_hosts.max(num_clients.min(self.max_client_procs));
        }
        if (self.hosts.clients.len() as u32) < needed_hosts {
            return fail(format!(
                "need {needed_hosts} client hosts, have {}",
                self.hosts.clients.len()
            ));
        }

        Ok(())
    }

    /// Command-line pattern matching the server binary, for cleanup kills.
    pub fn server_pattern(&self) -> String {
        format!("{}/{}", self.exec_dir.display(), self.server_bin)
    }

    /// Command-line pattern matching the client binary, for cleanup kills.
    pub fn client_pattern(&self) -> String {
        format!("{}/{}", self.exec_dir.display(), self.client_bin)
    }
}
