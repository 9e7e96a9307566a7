//! Custom error types for the harness.
//!
//! This module defines the primary error type, `HarnessError`, used by every stage of a
//! large test: resolving configuration, downloading binaries, supervising `snapd`,
//! shelling out to `snapctl`, and checking the results.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: figment extraction failures and semantic
//!   validation failures respectively.
//! - **`Io`**, **`Http`**, **`Url`**: wrapped library errors, created with `?` via `#[from]`.
//! - **`Spawn`**, **`CommandFailed`**, **`CommandTimeout`**: a child process could not be
//!   started, exited non-zero, or did not finish in time.
//! - **`DaemonExited`**, **`DaemonNotReady`**: `snapd` lifecycle failures.
//! - **`Parse`**, **`TaskNotFound`**, **`Manifest`**: unexpected `snapctl` output or input files.
//! - **`Check`**: a scenario assertion did not hold. The message is the assertion text.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the harness error type.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Errors raised while preparing or running a large test.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transfer failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A download URL could not be parsed or has no file name.
    #[error("Invalid URL '{url}': {reason}")]
    Url {
        /// Offending URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A download answered with a non-success status.
    #[error("Download of {url} failed with status {status}")]
    DownloadStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A download stopped delivering data.
    #[error("Download of {url} stalled for {timeout:?}")]
    DownloadStalled {
        /// Requested URL.
        url: String,
        /// Time allowed between body chunks.
        timeout: Duration,
    },

    /// A process could not be spawned.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        /// Program path.
        program: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A command exited unsuccessfully.
    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// Rendered command line.
        command: String,
        /// Exit status text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A command did not finish in time.
    #[error("Command `{command}` timed out after {timeout:?}")]
    CommandTimeout {
        /// Rendered command line.
        command: String,
        /// Time allowed.
        timeout: Duration,
    },

    /// The daemon exited while it was expected to run.
    #[error("snapd exited: {0}")]
    DaemonExited(String),

    /// The daemon did not report readiness in time.
    #[error("snapd not ready after {0:?}")]
    DaemonNotReady(Duration),

    /// Command output did not have the expected shape.
    #[error("Unexpected snapctl output for `{command}`: {reason}")]
    Parse {
        /// Command whose output was parsed.
        command: String,
        /// What was missing or malformed.
        reason: String,
    },

    /// No task with the given id is listed.
    #[error("Task {0} not found")]
    TaskNotFound(String),

    /// A task manifest could not be read or is incomplete.
    #[error("Invalid task manifest {path}: {reason}")]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// A scenario check failed.
    #[error("{0}")]
    Check(String),
}

impl From<figment::Error> for HarnessError {
    fn from(value: figment::Error) -> Self {
        HarnessError::Config(Box::new(value))
    }
}

impl HarnessError {
    /// Returns `true` for failed checks as opposed to infrastructure errors.
    #[must_use]
    pub fn is_check_failure(&self) -> bool {
        matches!(self, HarnessError::Check(_))
    }
}
