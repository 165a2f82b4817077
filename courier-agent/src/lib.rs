// ABOUTME: Worker process orchestration for courier.
// ABOUTME: Spawns one isolated worker per prompt and parses its framed JSON output.

pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod framing;
pub mod input;
pub mod run_log;
pub mod runner;

pub use config::{sanitize_identifier, WorkerConfig};
pub use error::WorkerError;
pub use event::{StreamKind, WorkerOutputEvent};
pub use framing::{FrameError, FrameParser, OUTPUT_END_MARKER, OUTPUT_START_MARKER};
pub use input::{no_secrets, SecretsProvider, WorkerContext, WorkerInput};
pub use runner::{event_callback, EventCallback, RunOutcome, WorkerRunner};

// Re-exported so callers can cancel runs without depending on tokio-util directly
pub use tokio_util::sync::CancellationToken;
