//! Error types shared by livegate crates.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the livegate libraries.
pub type LivegateResult<T> = Result<T, LivegateError>;

/// Top-level error for workflows, configuration and system integrations.
#[derive(Debug, Error)]
pub enum LivegateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialise configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("manager service error: {0}")]
    Manager(String),

    #[error("manager service unreachable after {attempts} attempts")]
    ManagerUnavailable { attempts: u32 },

    #[error("device error: {0}")]
    Device(String),

    #[error("session environment error: {0}")]
    Environment(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("unlock not allowed: {0}")]
    UnlockNotAllowed(String),

    #[error("{0}")]
    InvalidParameter(String),

    #[error("admin operation failed: {0}")]
    Admin(String),
}

/// Structured failure value produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The work unit returned an error.
    #[error("{0}")]
    Failed(String),

    /// The work unit panicked; the panic was contained on its worker thread.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job did not finish before the configured deadline. Its outcome is
    /// unknown: the worker keeps running detached.
    #[error("job `{job}` still running after {after:?}; outcome unknown")]
    TimedOut { job: String, after: Duration },

    /// The worker vanished without reporting an outcome.
    #[error("job worker exited without reporting an outcome")]
    Disconnected,

    /// The worker thread could not be started.
    #[error("failed to start job worker: {0}")]
    Spawn(String),
}

impl From<LivegateError> for JobError {
    fn from(err: LivegateError) -> Self {
        match err {
            LivegateError::Job(inner) => inner,
            other => JobError::Failed(other.to_string()),
        }
    }
}
