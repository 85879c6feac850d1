//! Error types for relay-sync.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures of a single external `git` / `ssh` invocation.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The program could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited nonzero.
    #[error("{program} {} failed with {status}: {stderr}", args.join(" "))]
    CommandFailed {
        program: String,
        args: Vec<String>,
        status: ExitStatus,
        stderr: String,
    },

    /// Output did not have the expected shape.
    #[error("unexpected output from {program}: {line}")]
    Parse { program: String, line: String },
}

/// All errors that can arise from planning or applying a unit.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required planning input is missing or unusable; no work was done.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Listing refs on the remote failed; the unit was not planned.
    #[error("cannot query remote {remote}: {source}")]
    RemoteQuery {
        remote: String,
        #[source]
        source: VcsError,
    },

    /// Push, stage or commit reported failure.
    #[error("apply failed for {project}: {source}")]
    Apply {
        project: String,
        #[source]
        source: VcsError,
    },

    /// Any other local git failure.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Whether the error ends only the unit that raised it. A `git` that
    /// cannot be started at all fails every unit alike.
    pub fn is_unit_failure(&self) -> bool {
        !matches!(
            self,
            SyncError::Vcs(VcsError::Spawn { .. })
                | SyncError::RemoteQuery {
                    source: VcsError::Spawn { .. },
                    ..
                }
                | SyncError::Apply {
                    source: VcsError::Spawn { .. },
                    ..
                }
        )
    }
}

/// Errors from the review server's project registry.
#[derive(Debug, Error)]
pub enum RegistryClientError {
    /// The ssh command backend failed.
    #[error(transparent)]
    Command(#[from] VcsError),

    /// The HTTP backend failed (connection or non-2xx status).
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    /// The server answered with a body that is not the expected JSON.
    #[error("malformed registry response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_error() -> VcsError {
        VcsError::Spawn {
            program: "git".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
    }

    #[test]
    fn project_errors_are_unit_failures() {
        let query = SyncError::RemoteQuery {
            remote: "ssh://review/a".into(),
            source: VcsError::Parse {
                program: "git".into(),
                line: "junk".into(),
            },
        };
        assert!(query.is_unit_failure());
        assert!(SyncError::Validation("no remote".into()).is_unit_failure());
        assert!(io_err("/tmp/x", std::io::Error::from(std::io::ErrorKind::NotFound)).is_unit_failure());
    }

    #[test]
    fn missing_git_is_not_a_unit_failure() {
        assert!(!SyncError::Vcs(spawn_error()).is_unit_failure());
        let apply = SyncError::Apply {
            project: "a".into(),
            source: spawn_error(),
        };
        assert!(!apply.is_unit_failure());
    }
}
