// ABOUTME: Wiring from configuration to a running router and its transports
// ABOUTME: Shared by the `run` and `invoke` subcommands

use crate::platform::{ConsoleTransport, CONSOLE_CHAT_ID};
use anyhow::Result;
use courier_agent::{
    no_secrets, sanitize_identifier, CancellationToken, SecretsProvider, WorkerContext,
};
use courier_core::secrets::env_file_provider;
use courier_core::{
    Config, Conversation, ConversationRegistry, InboundMessage, OutboundQueue, RouteOutcome,
    Router, RouterOptions, TransportBinding, WorkerRunner,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Inbound messages buffered between transports and the router
const INBOUND_BUFFER: usize = 256;

/// Extra time past the worker kill grace for replies and run records to land
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(5);

/// Secrets piped to workers, read from the configured env file on each spawn
pub fn secrets_provider(config: &Config) -> SecretsProvider {
    match &config.secrets.env_file {
        Some(path) if !config.secrets.keys.is_empty() => {
            env_file_provider(PathBuf::from(path), config.secrets.keys.clone())
        }
        _ => no_secrets(),
    }
}

/// Registered conversations plus a primary console conversation when none is configured
pub fn conversation_registry(config: &Config) -> ConversationRegistry {
    let registry = ConversationRegistry::from_conversations(config.conversations.iter().cloned());
    if registry.get(CONSOLE_CHAT_ID).is_none() {
        let console = Conversation::new(CONSOLE_CHAT_ID, "Console", "console");
        // Only one primary is allowed; the console falls back to trigger-free when one exists
        let console = if config.conversations.iter().any(|c| c.is_primary) {
            console.without_trigger()
        } else {
            console.primary()
        };
        registry.register(console);
    }
    registry
}

pub fn build_router(config: &Config, bindings: Vec<TransportBinding>) -> Router {
    let runner = WorkerRunner::new(config.to_worker_config());
    let options = RouterOptions {
        assistant_name: config.assistant.name.clone(),
        groups_dir: config.workspace.groups_dir(),
        secrets: secrets_provider(config),
    };
    let registry = Arc::new(conversation_registry(config));
    bindings
        .into_iter()
        .fold(Router::new(runner, registry, options), Router::with_transport)
}

/// Context for a one-off invocation against `chat_id`
pub fn worker_context(config: &Config, chat_id: &str) -> WorkerContext {
    let conversation = conversation_registry(config)
        .get(chat_id)
        .unwrap_or_else(|| Conversation::new(chat_id, chat_id, sanitize_identifier(chat_id)));
    WorkerContext {
        working_dir: config
            .workspace
            .groups_dir()
            .join(sanitize_identifier(&conversation.folder)),
        name: conversation.name,
        folder: conversation.folder,
        chat_id: chat_id.to_string(),
        is_primary: conversation.is_primary,
        secrets: secrets_provider(config),
    }
}

/// Wait up to `bound` for every in-flight invocation. Returns false if some were still
/// running when the bound passed; those are aborted.
pub async fn wait_for_invocations(tasks: &mut JoinSet<()>, bound: Duration) -> bool {
    let remaining = tasks.len();
    if remaining == 0 {
        return true;
    }
    tracing::info!(remaining, bound_secs = bound.as_secs(), "Waiting for invocations to finish");
    let drained = tokio::time::timeout(bound, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Invocation task ended abnormally");
            }
        }
    })
    .await;
    match drained {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(remaining = tasks.len(), "Invocations still running at shutdown, aborting");
            tasks.abort_all();
            false
        }
    }
}

/// Run the console transport (and Telegram when configured) until ctrl-c or EOF
pub async fn run_service(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let shutdown_bound = config.to_worker_config().kill_grace + SHUTDOWN_MARGIN;
    let mut invocations = JoinSet::new();
    let (tx, mut rx) = mpsc::channel::<InboundMessage>(INBOUND_BUFFER);

    let console = Arc::new(ConsoleTransport::stdout(config.assistant.name.clone()));
    let mut bindings = vec![TransportBinding::new(Arc::new(OutboundQueue::new(console)))];

    #[cfg(feature = "telegram")]
    if let Some(telegram_config) = config.telegram.clone() {
        use crate::platform::TelegramTransport;
        let telegram = Arc::new(TelegramTransport::new(telegram_config).await?);
        let queue = Arc::new(OutboundQueue::new(telegram.clone()));
        telegram.spawn_polling(queue.clone(), tx.clone(), shutdown.clone());
        bindings.push(TransportBinding::new(queue));
    }
    #[cfg(not(feature = "telegram"))]
    if config.telegram.is_some() {
        tracing::warn!("[telegram] is configured but this build lacks the `telegram` feature");
    }

    let router = Arc::new(build_router(&config, bindings));
    tracing::info!(router = ?router, "Router ready");

    let console_tx = tx.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = crate::platform::console::read_lines(stdin, "user", console_tx).await {
            tracing::error!(error = %e, "Console input failed");
        }
    });
    drop(tx);

    loop {
        tokio::select! {
            Some(joined) = invocations.join_next(), if !invocations.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Invocation task ended abnormally");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, shutting down");
                break;
            }
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    tracing::info!("All inbound sources closed, shutting down");
                    break;
                };
                let router = router.clone();
                invocations.spawn(async move {
                    match router.handle_inbound(msg).await {
                        RouteOutcome::Replied { delivered } => {
                            tracing::debug!(delivered, "Invocation finished");
                        }
                        RouteOutcome::Failed(reason) => {
                            tracing::warn!(reason = %reason, "Invocation failed");
                        }
                        RouteOutcome::Ignored(reason) => {
                            tracing::debug!(reason = ?reason, "Message ignored");
                        }
                    }
                });
            }
        }
    }

    shutdown.cancel();
    router.shutdown();
    wait_for_invocations(&mut invocations, shutdown_bound).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_becomes_primary_when_nothing_else_is() {
        let config = Config::default();
        let console = conversation_registry(&config).get(CONSOLE_CHAT_ID).unwrap();
        assert!(console.is_primary);
        assert!(!console.requires_trigger);
    }

    #[test]
    fn test_console_yields_primary_to_configured_conversation() {
        let mut config = Config::default();
        config
            .conversations
            .push(Conversation::new("tg:1", "Main", "main").primary());
        let registry = conversation_registry(&config);
        let console = registry.get(CONSOLE_CHAT_ID).unwrap();
        assert!(!console.is_primary);
        assert!(!console.requires_trigger);
        assert!(registry.get("tg:1").unwrap().is_primary);
    }

    #[test]
    fn test_ad_hoc_context_for_unknown_chat() {
        let mut config = Config::default();
        config.workspace.path = "/srv/courier".to_string();
        let context = worker_context(&config, "tg:-100");
        assert_eq!(context.chat_id, "tg:-100");
        assert!(!context.is_primary);
        assert!(context.working_dir.starts_with("/srv/courier/groups"));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_invocations() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let flag = finished.clone();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        assert!(wait_for_invocations(&mut tasks, Duration::from_secs(5)).await);
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_bound() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let started = std::time::Instant::now();
        assert!(!wait_for_invocations(&mut tasks, Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_no_secrets_without_keys() {
        let mut config = Config::default();
        config.secrets.env_file = Some("/nonexistent/.env".to_string());
        assert!(secrets_provider(&config)().unwrap().is_empty());
    }
}
