// ABOUTME: Runtime configuration for spawning worker processes.
// ABOUTME: Holds the binary, timeouts and capture limits with their default values.

use std::path::PathBuf;
use std::time::Duration;

/// Absolute timeout when none is configured (30 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Idle timeout between streamed events (30 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// The absolute timer is never shorter than idle timeout plus this margin
pub const DEFAULT_HARD_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);
/// Time between the graceful termination signal and the forced kill
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(15);
/// Per-stream capture ceiling (10 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for running workers
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker executable
    pub binary: String,
    /// Arguments passed before anything else
    pub args: Vec<String>,
    /// Extra environment variables for the worker
    pub env: Vec<(String, String)>,
    /// Root for session and input directories
    pub data_dir: PathBuf,
    pub timeout: Duration,
    pub idle_timeout: Duration,
    pub hard_timeout_margin: Duration,
    pub kill_grace: Duration,
    /// Maximum bytes captured per stream (stdout and stderr independently)
    pub max_output_bytes: usize,
    /// Log full input/output in run records even for successful runs
    pub verbose: bool,
}

impl WorkerConfig {
    pub fn new(binary: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            env: Vec::new(),
            data_dir: data_dir.into(),
            timeout: DEFAULT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            hard_timeout_margin: DEFAULT_HARD_TIMEOUT_MARGIN,
            kill_grace: DEFAULT_KILL_GRACE,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            verbose: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Effective absolute timeout: configured value clamped to at least
    /// `idle_timeout + hard_timeout_margin`
    pub fn hard_timeout(&self) -> Duration {
        self.timeout
            .max(self.idle_timeout + self.hard_timeout_margin)
    }

    /// Directory holding per-conversation session state
    pub fn session_dir(&self, folder: &str) -> PathBuf {
        self.data_dir.join("sessions").join(folder)
    }

    /// Directory holding input files for one caller of a conversation
    pub fn input_dir(&self, folder: &str, chat_id: &str) -> PathBuf {
        self.data_dir
            .join("ipc")
            .join(folder)
            .join(sanitize_identifier(chat_id))
            .join("input")
    }
}

/// Map an arbitrary identifier onto a safe single path component
pub fn sanitize_identifier(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}
