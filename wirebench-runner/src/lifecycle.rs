//! Starting, probing, and signaling remote benchmark processes.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use wirebench_types::error::{Error, Result};

use crate::config::Config;
use crate::remote::RemoteExecutor;

/// How many pattern matches a cleanup kill will target at most.
const PATTERN_KILL_LIMIT: usize = 4;

/// Ceiling for the poll backoff between liveness probes.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Signals the lifecycle manager sends to remote processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, asking the process to wind down and flush its statistics.
    Interrupt,
    /// SIGKILL, removing the process immediately.
    Kill,
}

impl Signal {
    fn number(self) -> u8 {
        match self {
            Signal::Interrupt => 2,
            Signal::Kill => 9,
        }
    }
}

/// A process launched on a remote host, identified by the PID captured at
/// spawn time.
///
/// Holding on to the spawn-time handle means teardown never has to
/// rediscover the process by name matching, which can hit the wrong
/// process.
#[derive(Debug, Clone)]
pub struct RemoteProcess {
    /// Host the process runs on.
    pub host: String,
    /// PID on that host.
    pub pid: u32,
}

/// Launches, probes, and signals processes on remote hosts.
pub struct ProcessManager {
    executor: Arc<dyn RemoteExecutor>,
    poll_interval: Duration,
}

impl fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessManager")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ProcessManager {
    /// Creates a manager issuing commands through `executor`.
    pub fn new(executor: Arc<dyn RemoteExecutor>, poll_interval: Duration) -> Self {
        Self {
            executor,
            poll_interval,
        }
    }

    /// Launches a detached process on `host`, redirecting its output to
    /// files on that host, and captures its PID.
    ///
    /// The launch returns as soon as the process is forked; nothing waits
    /// for the program to become ready.
    pub async fn spawn_detached(
        &self,
        host: &str,
        command: &str,
        stdout: &Path,
        stderr: &Path,
    ) -> Result<RemoteProcess> {
        let launch = format!(
            "nohup {command} > {} 2> {} < /dev/null & echo $!",
            stdout.display(),
            stderr.display()
        );
        let pid = self.executor.run_capture(host, &launch).await?;
        let pid = pid
            .parse()
            .map_err(|_| Error::Parse(format!("spawn on {host} returned pid `{pid}`")))?;

        Ok(RemoteProcess {
            host: host.to_string(),
            pid,
        })
    }

    /// Sends `signal` to the process. Best-effort: reports whether the
    /// remote command ran, and a dead process counts as success.
    pub async fn signal(&self, process: &RemoteProcess, signal: Signal) -> bool {
        let command = format!("kill -{} {}", signal.number(), process.pid);
        match self.executor.run(&process.host, &command).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, pid = process.pid, "failed to signal process");
                false
            }
        }
    }

    /// Whether the process currently exists on its host.
    pub async fn is_alive(&self, process: &RemoteProcess) -> bool {
        let command = format!("kill -0 {}", process.pid);
        self.executor.run(&process.host, &command).await.is_ok()
    }

    /// Polls until the process has exited, bounded by `grace`.
    ///
    /// Returns whether the process is gone.
    pub async fn wait_for_exit(&self, process: &RemoteProcess, grace: Duration) -> bool {
        self.poll(grace, || async move { !self.is_alive(process).await })
            .await
    }

    /// Polls until the process is running, bounded by `window`.
    ///
    /// This replaces the fixed warm-up sleep: the window is an upper bound,
    /// and control returns as soon as the probe succeeds.
    pub async fn await_started(&self, process: &RemoteProcess, window: Duration) -> bool {
        self.poll(window, || async move { self.is_alive(process).await })
            .await
    }

    /// Kills up to `max_matches` processes on `host` whose command line
    /// matches `pattern`.
    ///
    /// Only used for pre-batch cleanup of leftovers no handle is tracking.
    /// A no-match is indistinguishable from a successful no-op kill: both
    /// report success as long as the remote command itself ran.
    pub async fn kill_by_pattern(
        &self,
        host: &str,
        pattern: &str,
        signal: Signal,
        max_matches: usize,
    ) -> bool {
        let command = format!(
            "pgrep -f {pattern} | head -n {max_matches} | xargs -r kill -{}",
            signal.number()
        );
        match self.executor.run(host, &command).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, pattern, "pattern kill did not run");
                false
            }
        }
    }

    /// Whether any process matching `pattern` still exists on `host`.
    async fn pattern_alive(&self, host: &str, pattern: &str) -> bool {
        let command = format!("pgrep -f {pattern} > /dev/null");
        self.executor.run(host, &command).await.is_ok()
    }

    /// Kills leftover server and client processes from a previous, possibly
    /// crashed run.
    ///
    /// Called once before a batch of trials. Regular teardown goes through
    /// tracked handles instead.
    pub async fn cleanup_all(&self, config: &Config) {
        let server_pattern = config.server_pattern();
        let pattern = server_pattern.as_str();
        let server_host = config.hosts.server.addr.as_str();
        self.kill_by_pattern(server_host, pattern, Signal::Kill, PATTERN_KILL_LIMIT)
            .await;
        self.poll(config.timing.server_grace, || async move {
            !self.pattern_alive(server_host, pattern).await
        })
        .await;

        let client_pattern = config.client_pattern();
        let pattern = client_pattern.as_str();
        for host in &config.hosts.clients {
            let addr = host.addr.as_str();
            self.kill_by_pattern(addr, pattern, Signal::Kill, PATTERN_KILL_LIMIT)
                .await;
            self.poll(config.timing.client_grace, || async move {
                !self.pattern_alive(addr, pattern).await
            })
            .await;
        }

        tracing::info!("done with cleanup, starting experiments");
    }

    /// Polls `condition` until it holds or `window` elapses, backing off
    /// from the base interval up to [`MAX_POLL_INTERVAL`].
    async fn poll<F, Fut>(&self, window: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + window;
        let mut interval = self.poll_interval;
        loop {
            if condition().await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::remote::testing::ScriptedExecutor;

    use super::*;

    fn manager(executor: ScriptedExecutor) -> (Arc<ScriptedExecutor>, ProcessManager) {
        let executor = Arc::new(executor);
        let manager = ProcessManager::new(executor.clone(), Duration::from_millis(250));
        (executor, manager)
    }

    fn process(pid: u32) -> RemoteProcess {
        RemoteProcess {
            host: "10.0.0.1".into(),
            pid,
        }
    }

    #[tokio::test]
    async fn spawn_captures_pid_and_redirects() {
        let (executor, manager) = manager(ScriptedExecutor::new(|_, _| Ok("4242".into())));

        let process = manager
            .spawn_detached(
                "10.0.0.1",
                "/usr/local/bin/echo-server --port 12345",
                Path::new("/results/server.log"),
                Path::new("/results/server.err.log"),
            )
            .await
            .unwrap();

        assert_eq!(process.pid, 4242);
        let (host, command) = &executor.commands()[0];
        assert_eq!(host, "10.0.0.1");
        assert_eq!(
            command,
            "nohup /usr/local/bin/echo-server --port 12345 > /results/server.log \
             2> /results/server.err.log < /dev/null & echo $!"
        );
    }

    #[tokio::test]
    async fn spawn_with_garbage_pid_fails() {
        let (_, manager) = manager(ScriptedExecutor::new(|_, _| Ok("no pid here".into())));

        let result = manager
            .spawn_detached("h", "cmd", Path::new("out"), Path::new("err"))
            .await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_exit_polls_until_gone() {
        let probes = Arc::new(AtomicUsize::new(0));
        let probes_seen = probes.clone();
        let (_, manager) = manager(ScriptedExecutor::new(move |host, _| {
            // Alive for the first two probes, gone afterwards.
            if probes_seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(String::new())
            } else {
                Err(ScriptedExecutor::no_such_process(host))
            }
        }));

        assert!(
            manager
                .wait_for_exit(&process(7), Duration::from_secs(10))
                .await
        );
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_exit_gives_up_after_grace() {
        let (executor, manager) = manager(ScriptedExecutor::new(|_, _| Ok(String::new())));

        assert!(
            !manager
                .wait_for_exit(&process(7), Duration::from_secs(2))
                .await
        );
        // 250ms, 500ms, 1s, then clamped to the deadline.
        assert_eq!(executor.commands().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn await_started_resolves_on_first_success() {
        let probes = Arc::new(AtomicUsize::new(0));
        let probes_seen = probes.clone();
        let (_, manager) = manager(ScriptedExecutor::new(move |host, _| {
            if probes_seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ScriptedExecutor::no_such_process(host))
            } else {
                Ok(String::new())
            }
        }));

        assert!(
            manager
                .await_started(&process(7), Duration::from_secs(3))
                .await
        );
    }

    #[tokio::test]
    async fn pattern_kill_command_shape() {
        let (executor, manager) = manager(ScriptedExecutor::new(|_, _| Ok(String::new())));

        assert!(
            manager
                .kill_by_pattern("10.0.0.1", "/usr/local/bin/echo-server", Signal::Kill, 4)
                .await
        );
        let (_, command) = &executor.commands()[0];
        assert_eq!(
            command,
            "pgrep -f /usr/local/bin/echo-server | head -n 4 | xargs -r kill -9"
        );
    }

    #[tokio::test]
    async fn signal_failure_is_best_effort() {
        let (_, manager) = manager(ScriptedExecutor::new(|host, _| {
            Err(ScriptedExecutor::no_such_process(host))
        }));

        assert!(!manager.signal(&process(7), Signal::Interrupt).await);
    }
}
