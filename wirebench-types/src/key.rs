//! The typed identity of a single benchmark trial and its on-disk layout.

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Path segment used for systems that have no message variant.
const NO_MESSAGE: &str = "none";

/// Uniquely identifies one trial of one experiment configuration.
///
/// The key and its result-directory path are interchangeable: the path
/// segments *are* the serialized key, in the fixed layout
/// `{system}/{message|none}/size_{N}/{K}clients/trial_{T}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentKey {
    /// Name of the serialization system under test (e.g. `baseline`).
    pub system: String,
    /// Message variant, for systems that encode structured messages.
    pub message: Option<String>,
    /// Payload size in bytes.
    pub size: u64,
    /// Number of logical clients, counting intra-process concurrency.
    pub num_clients: u32,
    /// Trial repetition index, starting at 0.
    pub trial: u32,
}

impl ExperimentKey {
    /// The result-directory path of this trial, relative to the result root.
    pub fn relative_path(&self) -> PathBuf {
        let message = self.message.as_deref().unwrap_or(NO_MESSAGE);
        PathBuf::from(&self.system)
            .join(message)
            .join(format!("size_{}", self.size))
            .join(format!("{}clients", self.num_clients))
            .join(format!("trial_{}", self.trial))
    }

    /// The absolute result directory of this trial under `root`.
    pub fn trial_dir(&self, root: &Path) -> PathBuf {
        root.join(self.relative_path())
    }

    /// Parses a root-relative trial path back into a key.
    ///
    /// This is the inverse of [`relative_path`](Self::relative_path) and
    /// rejects anything that does not have exactly the five expected
    /// segments.
    pub fn parse_path(relative: &Path) -> Result<Self> {
        let mut segments = Vec::with_capacity(5);
        for component in relative.components() {
            let segment = component
                .as_os_str()
                .to_str()
                .ok_or_else(|| Error::Parse(format!("non-utf8 path: {}", relative.display())))?;
            segments.push(segment);
        }

        let [system, message, size, clients, trial] = segments[..] else {
            return Err(Error::Parse(format!(
                "expected `system/message/size_N/Kclients/trial_T`, got `{}`",
                relative.display()
            )));
        };

        if system.is_empty() {
            return Err(Error::Parse("empty system segment".into()));
        }

        let message = match message {
            NO_MESSAGE => None,
            "" => return Err(Error::Parse("empty message segment".into())),
            other => Some(other.to_string()),
        };

        Ok(ExperimentKey {
            system: system.to_string(),
            message,
            size: parse_segment(size, "size_", size.strip_prefix("size_"))?,
            num_clients: parse_segment(clients, "clients", clients.strip_suffix("clients"))?,
            trial: parse_segment(trial, "trial_", trial.strip_prefix("trial_"))?,
        })
    }
}

/// Parses the numeric part of a path segment such as `size_1024`.
fn parse_segment<T: std::str::FromStr>(
    segment: &str,
    marker: &str,
    stripped: Option<&str>,
) -> Result<T> {
    stripped
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| Error::Parse(format!("segment `{segment}` does not match `{marker}`")))
}

impl Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/size_{}/{}clients/trial_{}",
            self.system,
            self.message.as_deref().unwrap_or(NO_MESSAGE),
            self.size,
            self.num_clients,
            self.trial
        )
    }
}

/// The artifact files inside one trial's result directory.
///
/// The layout is fixed and shared with downstream analysis tooling:
///
/// ```text
/// server.log  server.err.log
/// client{i}.log  client{i}.err.log  client{i}.latencies.log   (i = 1..K)
/// ```
#[derive(Debug, Clone)]
pub struct TrialPaths {
    dir: PathBuf,
}

impl TrialPaths {
    /// Creates the path set for `key` under `root`.
    pub fn new(root: &Path, key: &ExperimentKey) -> Self {
        Self {
            dir: key.trial_dir(root),
        }
    }

    /// The trial's result directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The server's stdout log.
    pub fn server_log(&self) -> PathBuf {
        self.dir.join("server.log")
    }

    /// The server's stderr log.
    pub fn server_err_log(&self) -> PathBuf {
        self.dir.join("server.err.log")
    }

    /// Stdout log of client `idx` (1-based).
    pub fn client_log(&self, idx: u32) -> PathBuf {
        self.dir.join(format!("client{idx}.log"))
    }

    /// Stderr log of client `idx` (1-based), which carries the summary lines.
    pub fn client_err_log(&self, idx: u32) -> PathBuf {
        self.dir.join(format!("client{idx}.err.log"))
    }

    /// Raw latency samples of client `idx` (1-based): newline-delimited
    /// nanosecond integers, pre-sorted ascending by the writer.
    pub fn client_latencies(&self, idx: u32) -> PathBuf {
        self.dir.join(format!("client{idx}.latencies.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(message: Option<&str>) -> ExperimentKey {
        ExperimentKey {
            system: "protobuf".into(),
            message: message.map(String::from),
            size: 1024,
            num_clients: 4,
            trial: 2,
        }
    }

    #[test]
    fn path_round_trip() {
        for message in [None, Some("Get")] {
            let key = key(message);
            let parsed = ExperimentKey::parse_path(&key.relative_path()).unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn baseline_uses_none_segment() {
        assert_eq!(
            key(None).relative_path(),
            Path::new("protobuf/none/size_1024/4clients/trial_2")
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in [
            "protobuf/none/size_1024/4clients",
            "protobuf/none/size_1024/4clients/trial_2/extra",
            "protobuf/none/sz_1024/4clients/trial_2",
            "protobuf/none/size_1024/clients/trial_2",
            "protobuf/none/size_1024/4clients/trial_x",
        ] {
            assert!(ExperimentKey::parse_path(Path::new(path)).is_err(), "{path}");
        }
    }

    #[test]
    fn display_matches_relative_path() {
        let key = key(Some("Msg3L"));
        assert_eq!(
            key.to_string(),
            key.relative_path().to_string_lossy().as_ref()
        );
    }

    #[test]
    fn trial_paths_layout() {
        let paths = TrialPaths::new(Path::new("/results"), &key(None));
        assert_eq!(
            paths.client_latencies(3),
            Path::new("/results/protobuf/none/size_1024/4clients/trial_2/client3.latencies.log")
        );
        assert_eq!(
            paths.server_err_log(),
            Path::new("/results/protobuf/none/size_1024/4clients/trial_2/server.err.log")
        );
    }
}
