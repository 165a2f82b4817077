// ABOUTME: Worker process orchestrator - prepares directories, spawns, streams and resolves.
// ABOUTME: Enforces absolute and idle timeouts with terminate-then-kill escalation.

use crate::capture::BoundedCapture;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::event::WorkerOutputEvent;
use crate::framing::{self, FrameParser};
use crate::input::{WorkerContext, WorkerInput};
use crate::run_log::{append_run_record, RunRecord};
use chrono::Utc;
use futures::future::BoxFuture;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// How much of stderr is carried in an exit error
pub const STDERR_TAIL_CHARS: usize = 200;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Upper bound on waiting for output pipes to close once the worker is gone.
/// A grandchild that inherited the pipes can otherwise keep them open.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives streamed events one at a time, in framing order
pub type EventCallback = Box<dyn FnMut(WorkerOutputEvent) -> BoxFuture<'static, ()> + Send>;

/// Box an async closure into an [`EventCallback`]
pub fn event_callback<F, Fut>(mut f: F) -> EventCallback
where
    F: FnMut(WorkerOutputEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |event| Box::pin(f(event)))
}

/// Terminal result of a successful (or soft-successful) invocation
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Result text; always None in streaming mode since events already carried it
    pub result: Option<String>,
    /// Latest continuation token seen
    pub new_session_id: Option<String>,
    /// Events handed to the callback
    pub streamed_events: usize,
    /// Stopped by timeout or cancellation after output was delivered
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn is_soft_success(&self) -> bool {
        self.timed_out
    }

    pub fn truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

/// Why the wait loop stopped
#[derive(Debug)]
enum Stop {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    HardTimeout,
    IdleTimeout,
    Cancelled,
}

/// Everything observed during one invocation, used for the run record
struct Execution {
    result: Result<RunOutcome, WorkerError>,
    stdout: Option<BoundedCapture>,
    stderr: Option<BoundedCapture>,
    exit_code: Option<i32>,
    streamed: usize,
    timed_out: bool,
}

impl Execution {
    fn failed(error: WorkerError) -> Self {
        Self {
            result: Err(error),
            stdout: None,
            stderr: None,
            exit_code: None,
            streamed: 0,
            timed_out: false,
        }
    }
}

/// Runs one worker process per call; holds no state between calls
#[derive(Debug, Clone)]
pub struct WorkerRunner {
    config: WorkerConfig,
}

impl WorkerRunner {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one worker invocation to completion.
    ///
    /// With `on_event`, every framed event is delivered to the callback as it
    /// arrives and the terminal outcome carries no result text. Without it, the
    /// captured stdout is parsed once after a clean exit. `cancel` stops the
    /// worker the same way a timeout does.
    pub async fn run(
        &self,
        context: &WorkerContext,
        mut input: WorkerInput,
        on_event: Option<EventCallback>,
        cancel: Option<CancellationToken>,
    ) -> Result<RunOutcome, WorkerError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let cancel = cancel.unwrap_or_default();

        let execution = self.execute(context, &mut input, on_event, &cancel).await;
        let duration = started.elapsed();

        let outcome_label = match &execution.result {
            Ok(outcome) if outcome.timed_out => "soft_success",
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::counter!("courier_worker_runs_total", "outcome" => outcome_label).increment(1);
        metrics::histogram!("courier_worker_duration_seconds").record(duration.as_secs_f64());

        match &execution.result {
            Ok(outcome) => tracing::info!(
                conversation = %context.name,
                duration_ms = duration.as_millis() as u64,
                streamed = outcome.streamed_events,
                soft_success = outcome.timed_out,
                "Worker completed"
            ),
            Err(e) => tracing::error!(
                conversation = %context.name,
                duration_ms = duration.as_millis() as u64,
                error = %e,
                "Worker failed"
            ),
        }

        let record = self.build_record(context, &input, &execution, started_at, duration);
        append_run_record(&context.working_dir, &record).await;

        execution.result.map(|mut outcome| {
            outcome.duration = duration;
            outcome
        })
    }

    async fn execute(
        &self,
        context: &WorkerContext,
        input: &mut WorkerInput,
        on_event: Option<EventCallback>,
        cancel: &CancellationToken,
    ) -> Execution {
        let session_dir = self.config.session_dir(&context.folder);
        let input_dir = self.config.input_dir(&context.folder, &context.chat_id);
        for dir in [&context.working_dir, &session_dir, &input_dir] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::error!(error = %e, path = %dir.display(), "Failed to create worker directory");
                return Execution::failed(WorkerError::Prepare(e));
            }
        }

        let mut command = Command::new(&self.config.binary);
        command
            .args(&self.config.args)
            .current_dir(&context.working_dir)
            .env("COURIER_WORKING_DIR", &context.working_dir)
            .env("COURIER_SESSION_DIR", &session_dir)
            .env("COURIER_INPUT_DIR", &input_dir)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so termination reaches anything the worker started
        #[cfg(unix)]
        command.process_group(0);

        tracing::debug!(binary = %self.config.binary, args = ?self.config.args, "Spawning worker");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, binary = %self.config.binary, "Failed to spawn worker");
                return Execution::failed(WorkerError::Spawn(e));
            }
        };
        tracing::info!(
            pid = child.id(),
            conversation = %context.name,
            chat_id = %context.chat_id,
            "Worker spawned"
        );

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Execution::failed(WorkerError::Io(std::io::Error::other(
                "worker stdio was not captured",
            )));
        };

        // Secrets are fetched now, at spawn time, and never earlier
        match (context.secrets)() {
            Ok(secrets) if !secrets.is_empty() => input.secrets = Some(secrets),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Secrets provider failed; running without secrets"),
        }
        let payload = serde_json::to_vec(&*input);
        input.scrub_secrets();
        let payload = match payload {
            Ok(p) => p,
            Err(e) => {
                let _ = child.start_kill();
                return Execution::failed(WorkerError::Io(std::io::Error::other(e)));
            }
        };
        let stdin_task = tokio::spawn(write_input(stdin, payload));

        let limit = self.config.max_output_bytes;
        let (activity_tx, mut activity_rx) = mpsc::unbounded_channel::<Option<String>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkerOutputEvent>();
        let streaming = on_event.is_some();
        let delivery_task = on_event.map(|callback| tokio::spawn(deliver_in_order(event_rx, callback)));
        let stdout_task = tokio::spawn(read_stdout(
            stdout,
            limit,
            streaming.then_some(event_tx),
            activity_tx,
        ));
        let stderr_task = tokio::spawn(read_stderr(stderr, limit));

        let hard_timeout = self.config.hard_timeout();
        let idle_timeout = self.config.idle_timeout;
        let hard_deadline = Instant::now() + hard_timeout;
        let mut idle_deadline: Option<Instant> = None;
        let mut streamed = 0usize;
        let mut last_session: Option<String> = None;

        let stop = loop {
            let idle = async move {
                match idle_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                status = child.wait() => break match status {
                    Ok(status) => Stop::Exited(status),
                    Err(e) => Stop::WaitFailed(e),
                },
                Some(session) = activity_rx.recv() => {
                    streamed += 1;
                    if session.is_some() {
                        last_session = session;
                    }
                    idle_deadline = Some(Instant::now() + idle_timeout);
                }
                _ = sleep_until(hard_deadline) => break Stop::HardTimeout,
                _ = idle => break Stop::IdleTimeout,
                _ = cancel.cancelled() => break Stop::Cancelled,
            }
        };

        let exit_status = match &stop {
            Stop::Exited(status) => Some(*status),
            other => {
                tracing::warn!(reason = ?other, streamed, "Stopping worker");
                self.terminate(&mut child).await
            }
        };
        let exit_code = exit_status.and_then(|s| s.code());

        stdin_task.abort();
        let stdout_capture = join_stream(stdout_task, limit, "stdout").await;
        let stderr_capture = join_stream(stderr_task, limit, "stderr").await;
        while let Ok(session) = activity_rx.try_recv() {
            streamed += 1;
            if session.is_some() {
                last_session = session;
            }
        }
        let delivered = match delivery_task {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Event delivery task failed");
                0
            }),
            None => 0,
        };

        let base = RunOutcome {
            result: None,
            new_session_id: last_session,
            streamed_events: delivered,
            timed_out: false,
            exit_code,
            stdout_truncated: stdout_capture.is_truncated(),
            stderr_truncated: stderr_capture.is_truncated(),
            duration: Duration::ZERO,
        };

        let mut timed_out = false;
        let result = match stop {
            Stop::HardTimeout | Stop::IdleTimeout | Stop::Cancelled if delivered > 0 => {
                // Output already reached the caller; any half-framed tail is dropped
                timed_out = true;
                Ok(RunOutcome {
                    timed_out: true,
                    ..base
                })
            }
            Stop::HardTimeout => Err(WorkerError::Timeout(hard_timeout)),
            Stop::IdleTimeout => Err(WorkerError::Timeout(idle_timeout)),
            Stop::Cancelled => Err(WorkerError::Cancelled),
            Stop::WaitFailed(e) => Err(WorkerError::Io(e)),
            Stop::Exited(status) if status.success() => {
                if streaming {
                    Ok(base)
                } else {
                    resolve_batch(&stdout_capture, base)
                }
            }
            Stop::Exited(_) if delivered > 0 => {
                tracing::warn!(
                    exit_code = ?exit_code,
                    delivered,
                    "Worker exited non-zero after streaming output; keeping delivered output"
                );
                Ok(base)
            }
            Stop::Exited(_) => Err(WorkerError::Exit {
                code: exit_code,
                stderr_tail: stderr_capture.tail(STDERR_TAIL_CHARS),
            }),
        };

        Execution {
            result,
            stdout: Some(stdout_capture),
            stderr: Some(stderr_capture),
            exit_code,
            streamed,
            timed_out,
        }
    }

    /// Graceful termination, escalating to a forced kill after the grace window
    async fn terminate(&self, child: &mut Child) -> Option<ExitStatus> {
        send_terminate(child);
        match tokio::time::timeout(self.config.kill_grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed waiting for terminated worker");
                None
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.config.kill_grace.as_secs(),
                    "Worker ignored termination; killing"
                );
                send_kill(child);
                match child.wait().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed waiting for killed worker");
                        None
                    }
                }
            }
        }
    }

    fn build_record(
        &self,
        context: &WorkerContext,
        input: &WorkerInput,
        execution: &Execution,
        started_at: chrono::DateTime<Utc>,
        duration: Duration,
    ) -> RunRecord {
        let (outcome, error) = match &execution.result {
            Ok(o) if o.timed_out => ("soft_success".to_string(), None),
            Ok(_) => ("success".to_string(), None),
            Err(e) => (e.kind().to_string(), Some(e.to_string())),
        };
        let detailed = error.is_some() || self.config.verbose;
        // `input` has already been scrubbed of secrets here
        let input_json = detailed
            .then(|| serde_json::to_value(input).ok())
            .flatten();

        RunRecord {
            started_at,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            conversation: context.folder.clone(),
            chat_id: context.chat_id.clone(),
            exit_code: execution.exit_code,
            outcome,
            timed_out: execution.timed_out,
            streamed_events: execution.streamed,
            stdout_truncated: execution.stdout.as_ref().is_some_and(|c| c.is_truncated()),
            stderr_truncated: execution.stderr.as_ref().is_some_and(|c| c.is_truncated()),
            error,
            input: input_json,
            stdout: detailed
                .then(|| execution.stdout.as_ref().map(|c| c.to_string_lossy()))
                .flatten(),
            stderr: detailed
                .then(|| execution.stderr.as_ref().map(|c| c.to_string_lossy()))
                .flatten(),
        }
    }
}

fn resolve_batch(stdout: &BoundedCapture, base: RunOutcome) -> Result<RunOutcome, WorkerError> {
    match framing::parse_batch(stdout.as_bytes()) {
        Ok(WorkerOutputEvent::Success {
            result,
            new_session_id,
            ..
        }) => Ok(RunOutcome {
            result,
            new_session_id: new_session_id.or(base.new_session_id.clone()),
            ..base
        }),
        Ok(event) => Err(WorkerError::Reported(
            event.error_message().unwrap_or_default(),
        )),
        Err(e) => {
            tracing::error!(
                error = %e,
                stdout_len = stdout.len(),
                truncated = stdout.is_truncated(),
                "Failed to parse worker output"
            );
            Err(WorkerError::InvalidOutput(e.to_string()))
        }
    }
}

async fn write_input(mut stdin: tokio::process::ChildStdin, payload: Vec<u8>) {
    if let Err(e) = stdin.write_all(&payload).await {
        tracing::warn!(error = %e, "Failed to write worker input");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(error = %e, "Failed to close worker stdin");
    }
    // payload and stdin drop here, closing the pipe
}

async fn read_stdout<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
    events: Option<mpsc::UnboundedSender<WorkerOutputEvent>>,
    activity: mpsc::UnboundedSender<Option<String>>,
) -> BoundedCapture {
    let mut capture = BoundedCapture::new(limit);
    let mut parser = FrameParser::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading worker stdout");
                break;
            }
        };
        let was_truncated = capture.is_truncated();
        let accepted = capture.push(&buf[..n]);
        if capture.is_truncated() && !was_truncated {
            tracing::warn!(limit, "Worker stdout exceeded capture limit; dropping the rest");
        }
        // Keep draining the pipe past the limit so the worker never blocks on a full pipe
        if accepted.is_empty() {
            continue;
        }
        for event in parser.push(accepted) {
            tracing::debug!(is_error = event.is_error(), kind = ?event.stream_kind(), "Worker event");
            let _ = activity.send(event.new_session_id().map(String::from));
            if let Some(tx) = &events {
                let _ = tx.send(event);
            }
        }
    }

    if parser.has_pending_frame() {
        tracing::debug!("Worker stdout ended inside an unterminated frame");
    }
    capture
}

async fn read_stderr<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> BoundedCapture {
    let mut capture = BoundedCapture::new(limit);
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading worker stderr");
                break;
            }
        };
        let accepted = capture.push(&buf[..n]);
        if !accepted.is_empty() {
            tracing::debug!(stderr = %String::from_utf8_lossy(accepted).trim_end(), "Worker stderr");
        }
    }
    capture
}

async fn deliver_in_order(
    mut events: mpsc::UnboundedReceiver<WorkerOutputEvent>,
    mut callback: EventCallback,
) -> usize {
    let mut delivered = 0;
    while let Some(event) = events.recv().await {
        callback(event).await;
        delivered += 1;
    }
    delivered
}

async fn join_stream(
    mut task: JoinHandle<BoundedCapture>,
    limit: usize,
    stream: &'static str,
) -> BoundedCapture {
    match tokio::time::timeout(STREAM_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(capture)) => capture,
        Ok(Err(e)) => {
            tracing::error!(error = %e, stream, "Worker stream reader failed");
            BoundedCapture::new(limit)
        }
        Err(_) => {
            tracing::warn!(stream, "Worker stream still open after exit; abandoning it");
            task.abort();
            BoundedCapture::new(limit)
        }
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    if let Some(pid) = child.id() {
        // Negative pid targets the worker's process group
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if rc != 0 {
            tracing::debug!(pid, signal, error = %std::io::Error::last_os_error(), "kill(2) failed");
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    signal_group(child, libc::SIGTERM);
}

#[cfg(unix)]
fn send_kill(child: &mut Child) {
    signal_group(child, libc::SIGKILL);
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn send_kill(child: &mut Child) {
    let _ = child.start_kill();
}
