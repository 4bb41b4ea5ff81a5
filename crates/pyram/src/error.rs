//! Launcher error types.
//!
//! Every failure collapses to exit code 1; the variants only exist so the
//! message printed to the user names the step that failed.

use std::path::PathBuf;

use thiserror::Error;

use crate::exec::ChildProcessResult;

/// Result type for launcher operations.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Errors that abort a launcher invocation.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Malformed or insufficient arguments.
    #[error("usage error: {0}")]
    Usage(String),

    /// Not running with effective super-user identity.
    #[error("pyram must be run as root (try sudo)")]
    Privilege,

    /// A runtime mount step (mkdir, clear, mount, extract, chmod) failed.
    #[error("error while allocating memory in ram for pypy: {step} failed ({status})")]
    Provisioning { step: String, status: String },

    /// The script could not be copied into the staging mount.
    #[error("error staging script {path}: {reason}")]
    Staging { path: PathBuf, reason: String },

    /// The interpreter failed to start or exited unsuccessfully.
    #[error("error running `{command}` ({status})")]
    Execution { command: String, status: String },

    /// Unmounting or removing a mount failed.
    #[error("error tearing down {path}: {reason}")]
    Teardown { path: PathBuf, reason: String },

    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LaunchError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Whether usage text should accompany the message.
    pub fn wants_usage(&self) -> bool {
        matches!(self, LaunchError::Usage(_))
    }

    pub(crate) fn provisioning(step: impl Into<String>, status: impl ToString) -> Self {
        LaunchError::Provisioning {
            step: step.into(),
            status: status.to_string(),
        }
    }

    pub(crate) fn execution(command: impl ToString, result: &ChildProcessResult) -> Self {
        LaunchError::Execution {
            command: command.to_string(),
            status: result.to_string(),
        }
    }
}

impl From<config::ConfigError> for LaunchError {
    fn from(err: config::ConfigError) -> Self {
        LaunchError::Config(err.to_string())
    }
}
