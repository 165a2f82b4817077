// ABOUTME: Command-line entry point for courier
// ABOUTME: Sets up logging, loads configuration and dispatches subcommands

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier::app;
use courier::config::Config;
use courier_agent::{event_callback, CancellationToken, WorkerInput, WorkerRunner};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Bridges chat transports to isolated AI worker processes", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the console transport (and Telegram when configured) until ctrl-c
    Run,

    /// Run one worker invocation and print every event it produces
    Invoke {
        /// Chat id to run as (registered conversations supply their folder)
        #[arg(long, default_value = "console")]
        chat: String,

        /// Wait for the final result instead of streaming events
        #[arg(long)]
        no_stream: bool,

        /// Continuation token from a previous run
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        prompt: String,
    },

    /// Load and validate configuration, then print it with secrets redacted
    CheckConfig,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr so console replies on stdout stay readable
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nPANIC! courier crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Run => {
            let config = Config::load().context("Failed to load configuration")?;
            tracing::info!(assistant = %config.assistant.name, "Starting courier");
            app::run_service(config).await?;
            // The blocking stdin reader would otherwise hold runtime shutdown until the next line
            std::process::exit(0);
        }
        Commands::Invoke {
            chat,
            no_stream,
            session,
            prompt,
        } => {
            let config = Config::load().context("Failed to load configuration")?;
            invoke(&config, &chat, &prompt, session, !no_stream).await
        }
        Commands::CheckConfig => {
            let config = Config::load().context("Failed to load configuration")?;
            println!("{:#?}", config);
            println!("\nConfiguration OK");
            Ok(())
        }
    }
}

async fn invoke(
    config: &Config,
    chat_id: &str,
    prompt: &str,
    session: Option<String>,
    stream: bool,
) -> Result<()> {
    let runner = WorkerRunner::new(config.to_worker_config());
    let context = app::worker_context(config, chat_id);
    let input = WorkerInput::new(prompt, &context).with_session(session);

    let callback = stream.then(|| {
        event_callback(|event| async move {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Failed to render event"),
            }
        })
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let outcome = runner
        .run(&context, input, callback, Some(cancel))
        .await
        .context("Worker invocation failed")?;

    if let Some(result) = &outcome.result {
        println!("{}", result);
    }
    tracing::info!(
        streamed_events = outcome.streamed_events,
        session_id = ?outcome.new_session_id,
        timed_out = outcome.timed_out,
        truncated = outcome.truncated(),
        duration_ms = outcome.duration.as_millis() as u64,
        "Invocation finished"
    );
    Ok(())
}
