//! Remote command execution over SSH.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use wirebench_types::error::{Error, Result};

use crate::config::Transport;

/// Runs a privileged shell command on a named host.
///
/// This is the single primitive the orchestrator builds on: run the
/// command, report success or failure. Implementations do not retry; kill
/// and start commands are best-effort at the call sites.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` on `host`, discarding its output.
    async fn run(&self, host: &str, command: &str) -> Result<()>;

    /// Runs `command` on `host` and returns its trimmed stdout.
    async fn run_capture(&self, host: &str, command: &str) -> Result<String>;
}

/// [`RemoteExecutor`] backed by the system `ssh` client.
///
/// Commands run under `sudo` on the remote side, since the benchmark
/// binaries bind raw devices and pin cores.
#[derive(Debug)]
pub struct SshExecutor {
    user: String,
    key_file: PathBuf,
    port: u16,
}

impl SshExecutor {
    /// Creates an executor from the configured transport settings.
    pub fn new(transport: &Transport) -> Self {
        Self {
            user: transport.user.clone(),
            key_file: transport.key_file.clone(),
            port: transport.ssh_port,
        }
    }

    fn command(&self, host: &str, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-i")
            .arg(&self.key_file)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg(format!("{}@{host}", self.user))
            .arg(format!("sudo sh -c '{remote_command}'"))
            .stdin(Stdio::null());
        cmd
    }

    fn transient(host: &str, reason: impl ToString) -> Error {
        Error::TransientRemote {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<()> {
        let status = self
            .command(host, command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| Self::transient(host, err))?;

        if status.success() {
            Ok(())
        } else {
            Err(Self::transient(host, format!("exited with {status}")))
        }
    }

    async fn run_capture(&self, host: &str, command: &str) -> Result<String> {
        let output = self
            .command(host, command)
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|err| Self::transient(host, err))?;

        if !output.status.success() {
            return Err(Self::transient(
                host,
                format!("exited with {}", output.status),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    type Handler = Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

    /// Scriptable in-memory executor recording every command it is asked to
    /// run.
    pub(crate) struct ScriptedExecutor {
        commands: Mutex<Vec<(String, String)>>,
        handler: Handler,
    }

    impl ScriptedExecutor {
        pub(crate) fn new<F>(handler: F) -> Self
        where
            F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
        {
            Self {
                commands: Mutex::new(Vec::new()),
                handler: Box::new(handler),
            }
        }

        /// Every `(host, command)` pair seen so far.
        pub(crate) fn commands(&self) -> Vec<(String, String)> {
            self.commands.lock().unwrap().clone()
        }

        /// A transient failure, as the scripted response to a probe of a
        /// process that does not exist.
        pub(crate) fn no_such_process(host: &str) -> Error {
            Error::TransientRemote {
                host: host.to_string(),
                reason: "exited with exit status: 1".into(),
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn run(&self, host: &str, command: &str) -> Result<()> {
            self.run_capture(host, command).await.map(|_| ())
        }

        async fn run_capture(&self, host: &str, command: &str) -> Result<String> {
            self.commands
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));
            (self.handler)(host, command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_invocation_shape() {
        let executor = SshExecutor::new(&Transport {
            user: "bench".into(),
            key_file: PathBuf::from("/home/bench/.ssh/id_rsa"),
            ssh_port: 22,
        });

        let command = executor.command("10.0.0.1", "kill -0 42");
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(command.as_std().get_program(), "ssh");
        assert!(args.contains(&"bench@10.0.0.1".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().unwrap(), "sudo sh -c 'kill -0 42'");
    }
}
