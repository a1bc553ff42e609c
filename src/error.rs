use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("\"{path}\" does not appear to be a {kind} working copy")]
    InvalidWorkingCopy { path: String, kind: &'static str },

    #[error("\"{path}\" does not appear to be a Git working copy (expected {expected} but got {actual})")]
    UriMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Repository type {0} not registered")]
    UnknownRepository(String),

    #[error("Unknown repository type for path {0}")]
    UnrecognizedPath(String),

    #[error("Command execution failed: {command} (exit code: {exit_code})")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command timed out after {after:?}: {command}")]
    Timeout { command: String, after: Duration },

    #[error("Failed to spawn command: {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected output from {command}: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// True for both a failed root discovery and a URI mismatch.
    pub fn is_invalid_working_copy(&self) -> bool {
        matches!(
            self,
            RepoError::InvalidWorkingCopy { .. } | RepoError::UriMismatch { .. }
        )
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
