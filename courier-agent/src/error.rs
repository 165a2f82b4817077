// ABOUTME: Terminal error taxonomy for one worker invocation.
// ABOUTME: Partial-output timeouts are not errors; they resolve as soft successes.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to prepare worker directories: {0}")]
    Prepare(#[source] std::io::Error),

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker exited with code {code:?}: {stderr_tail}")]
    Exit {
        code: Option<i32>,
        /// Last characters of the worker's stderr
        stderr_tail: String,
    },

    #[error("worker timed out after {0:?} without producing output")]
    Timeout(Duration),

    #[error("worker cancelled before producing output")]
    Cancelled,

    #[error("worker reported an error: {0}")]
    Reported(String),

    #[error("worker output could not be parsed: {0}")]
    InvalidOutput(String),

    #[error("worker I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Short label used in run records and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prepare(_) | Self::Spawn(_) => "spawn_error",
            Self::Exit { .. } => "exit_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Reported(_) => "reported_error",
            Self::InvalidOutput(_) => "invalid_output",
            Self::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_error_message_includes_tail() {
        let err = WorkerError::Exit {
            code: Some(2),
            stderr_tail: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "worker exited with code Some(2): permission denied"
        );
        assert_eq!(err.kind(), "exit_error");
    }

    #[test]
    fn test_spawn_and_prepare_share_kind() {
        let io = || std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(WorkerError::Spawn(io()).kind(), "spawn_error");
        assert_eq!(WorkerError::Prepare(io()).kind(), "spawn_error");
    }
}
