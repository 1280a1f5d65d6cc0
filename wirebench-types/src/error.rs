use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the wirebench control and analysis planes.
#[derive(Debug, Error)]
pub enum Error {
    /// A remote command failed to execute.
    ///
    /// Kill and start commands are best-effort: callers log this and move on,
    /// it never aborts a batch.
    #[error("remote command failed on {host}: {reason}")]
    TransientRemote {
        /// The host the command was issued to.
        host: String,
        /// Why the command did not run to a successful exit.
        reason: String,
    },

    /// An expected log or latency file is absent.
    #[error("missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Recorded data does not match what the trial should have produced.
    #[error("data inconsistency in {}: {reason}", .path.display())]
    DataInconsistency {
        /// The artifact the inconsistency was found in.
        path: PathBuf,
        /// What did not line up.
        reason: String,
    },

    /// An invalid configuration, rejected before any remote side effect.
    #[error("invalid configuration: {0}")]
    Misconfiguration(String),

    /// A malformed path segment or statistics line.
    #[error("parse error: {0}")]
    Parse(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout wirebench.
pub type Result<T> = std::result::Result<T, Error>;
