// ABOUTME: Structured per-invocation run records appended to a conversation-scoped JSONL log.
// ABOUTME: Full input/output is only recorded for failed runs or in verbose mode.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;

/// One line in `<working_dir>/logs/runs.jsonl`
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub conversation: String,
    pub chat_id: String,
    pub exit_code: Option<i32>,
    /// "success", "soft_success", or an error kind
    pub outcome: String,
    pub timed_out: bool,
    pub streamed_events: usize,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl RunRecord {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

pub fn log_path(working_dir: &Path) -> PathBuf {
    working_dir.join("logs").join("runs.jsonl")
}

/// Append a record; failures are logged and swallowed
pub async fn append_run_record(working_dir: &Path, record: &RunRecord) {
    let path = log_path(working_dir);
    if let Some(parent) = path.parent() {
        if let Err(e) = create_dir_all(parent).await {
            tracing::warn!(error = %e, path = %parent.display(), "Failed to create run log directory");
            return;
        }
    }

    let json_line = match serde_json::to_string(record) {
        Ok(j) => j,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize run record");
            return;
        }
    };

    match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(mut file) => {
            if let Err(e) = file.write_all(format!("{}\n", json_line).as_bytes()).await {
                tracing::warn!(error = %e, path = %path.display(), "Failed to write run record");
                return;
            }
            // tokio finishes file writes on a blocking thread; wait for it
            if let Err(e) = file.flush().await {
                tracing::warn!(error = %e, path = %path.display(), "Failed to flush run record");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Failed to open run log");
        }
    }
}
