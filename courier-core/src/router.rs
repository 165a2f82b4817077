// ABOUTME: Routes inbound chat messages to worker invocations and replies back out.
// ABOUTME: Serializes work per conversation and streams worker output into delivery queues.

use crate::conversation::{Conversation, ConversationResolver};
use crate::delivery::OutboundQueue;
use crate::format::{format_messages, strip_internal, TriggerPattern};
use crate::identity::IdentityCache;
use crate::traits::InboundMessage;
use anyhow::Result;
use courier_agent::config::sanitize_identifier;
use courier_agent::{
    event_callback, CancellationToken, SecretsProvider, StreamKind, WorkerContext, WorkerInput,
    WorkerRunner,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Why a message did not start a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by us or by another bot
    Automated,
    /// No transport is responsible for the chat
    NoTransport,
    /// The chat is not a registered conversation
    Unregistered,
    /// Trigger word required but missing
    NoTrigger,
}

/// Result of handling one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The worker ran; `delivered` replies were handed to the delivery queue
    Replied { delivered: usize },
    /// The worker failed
    Failed(String),
    Ignored(IgnoreReason),
}

/// A transport's delivery queue plus its identity cache, if it has opaque ids
#[derive(Clone)]
pub struct TransportBinding {
    pub queue: Arc<OutboundQueue>,
    pub identity: Option<Arc<IdentityCache>>,
}

impl TransportBinding {
    pub fn new(queue: Arc<OutboundQueue>) -> Self {
        Self {
            queue,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Arc<IdentityCache>) -> Self {
        self.identity = Some(identity);
        self
    }

    fn owns(&self, destination: &str) -> bool {
        self.queue.transport().owns_destination(destination)
    }
}

/// Settings shared by every invocation
#[derive(Clone)]
pub struct RouterOptions {
    /// Assistant display name; the default trigger is `@<name>`
    pub assistant_name: String,
    /// Parent of every conversation's working directory
    pub groups_dir: PathBuf,
    pub secrets: SecretsProvider,
}

impl std::fmt::Debug for RouterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterOptions")
            .field("assistant_name", &self.assistant_name)
            .field("groups_dir", &self.groups_dir)
            .finish_non_exhaustive()
    }
}

pub struct Router {
    runner: WorkerRunner,
    conversations: Arc<dyn ConversationResolver>,
    transports: Vec<TransportBinding>,
    options: RouterOptions,
    default_trigger: TriggerPattern,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Continuation tokens keyed by conversation folder
    sessions: Mutex<HashMap<String, String>>,
    shutdown: CancellationToken,
}

impl Router {
    pub fn new(
        runner: WorkerRunner,
        conversations: Arc<dyn ConversationResolver>,
        options: RouterOptions,
    ) -> Self {
        Self {
            runner,
            conversations,
            transports: Vec::new(),
            default_trigger: TriggerPattern::for_assistant(&options.assistant_name),
            options,
            locks: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_transport(mut self, binding: TransportBinding) -> Self {
        tracing::debug!(transport = %binding.queue.transport().name(), "Attached transport");
        self.transports.push(binding);
        self
    }

    fn binding_for(&self, destination: &str) -> Option<&TransportBinding> {
        self.transports.iter().find(|b| b.owns(destination))
    }

    /// Continuation token stored for a conversation folder
    pub fn session_for(&self, folder: &str) -> Option<String> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(folder).cloned()
    }

    /// Forget a conversation's continuation token so the next run starts fresh
    pub fn clear_session(&self, folder: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(folder);
    }

    /// Cancel every running and future invocation
    pub fn shutdown(&self) {
        tracing::info!("Router shutting down, cancelling workers");
        self.shutdown.cancel();
    }

    fn conversation_lock(&self, chat_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn missing_trigger(&self, conversation: &Conversation, content: &str) -> bool {
        if conversation.is_primary || !conversation.requires_trigger {
            return false;
        }
        let matched = match &conversation.trigger {
            Some(trigger) => TriggerPattern::new(trigger).matches(content),
            None => self.default_trigger.matches(content),
        };
        !matched
    }

    /// Handle one inbound message end to end
    pub async fn handle_inbound(&self, msg: InboundMessage) -> RouteOutcome {
        if msg.is_automated() {
            tracing::trace!(chat_id = %msg.chat_id, "Ignoring automated message");
            return RouteOutcome::Ignored(IgnoreReason::Automated);
        }

        let Some(binding) = self.binding_for(&msg.chat_id) else {
            tracing::warn!(chat_id = %msg.chat_id, "No transport owns this chat");
            return RouteOutcome::Ignored(IgnoreReason::NoTransport);
        };

        let chat_id = match &binding.identity {
            Some(identity) => identity.resolve(&msg.chat_id).await,
            None => msg.chat_id.clone(),
        };

        let Some(conversation) = self.conversations.resolve(&chat_id).await else {
            tracing::debug!(chat_id = %chat_id, "Message for unregistered chat");
            return RouteOutcome::Ignored(IgnoreReason::Unregistered);
        };

        if self.missing_trigger(&conversation, &msg.content) {
            tracing::debug!(chat_id = %chat_id, conversation = %conversation.name, "No trigger, ignoring");
            return RouteOutcome::Ignored(IgnoreReason::NoTrigger);
        }

        let lock = self.conversation_lock(&chat_id);
        let _guard = lock.lock().await;

        tracing::info!(
            chat_id = %chat_id,
            conversation = %conversation.name,
            sender = %msg.sender,
            "Dispatching message to worker"
        );
        self.invoke(binding, &conversation, &chat_id, &[msg]).await
    }

    async fn invoke(
        &self,
        binding: &TransportBinding,
        conversation: &Conversation,
        chat_id: &str,
        messages: &[InboundMessage],
    ) -> RouteOutcome {
        let context = WorkerContext {
            name: conversation.name.clone(),
            folder: conversation.folder.clone(),
            chat_id: chat_id.to_string(),
            working_dir: self
                .options
                .groups_dir
                .join(sanitize_identifier(&conversation.folder)),
            is_primary: conversation.is_primary,
            secrets: self.options.secrets.clone(),
        };
        let input = WorkerInput::new(format_messages(messages), &context)
            .with_session(self.session_for(&conversation.folder));

        let delivered = Arc::new(AtomicUsize::new(0));
        let callback = {
            let queue = binding.queue.clone();
            let chat_id = chat_id.to_string();
            let delivered = delivered.clone();
            event_callback(move |event| {
                let queue = queue.clone();
                let chat_id = chat_id.clone();
                let delivered = delivered.clone();
                async move {
                    if event.is_error() {
                        tracing::warn!(
                            chat_id = %chat_id,
                            error = %event.error_message().unwrap_or_default(),
                            "Worker reported an error"
                        );
                    }
                    if event.stream_kind() == Some(StreamKind::Thinking) {
                        return;
                    }
                    let Some(raw) = event.result() else {
                        return;
                    };
                    let text = strip_internal(raw);
                    if text.is_empty() {
                        return;
                    }
                    queue.send(&chat_id, &text).await;
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let transport = binding.queue.transport();
        if let Err(e) = transport.set_typing(chat_id, true).await {
            tracing::debug!(chat_id = %chat_id, error = %e, "Failed to set typing");
        }

        let result = self
            .runner
            .run(&context, input, Some(callback), Some(self.shutdown.child_token()))
            .await;

        if let Err(e) = transport.set_typing(chat_id, false).await {
            tracing::debug!(chat_id = %chat_id, error = %e, "Failed to clear typing");
        }

        match result {
            Ok(outcome) => {
                if let Some(session_id) = outcome.new_session_id {
                    let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                    sessions.insert(conversation.folder.clone(), session_id);
                }
                RouteOutcome::Replied {
                    delivered: delivered.load(Ordering::Relaxed),
                }
            }
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "Worker invocation failed");
                RouteOutcome::Failed(e.to_string())
            }
        }
    }

    /// Deliver text to a chat through whichever transport owns it
    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let Some(binding) = self.binding_for(chat_id) else {
            anyhow::bail!("no transport owns chat {}", chat_id);
        };
        binding.queue.send(chat_id, text).await;
        Ok(())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("options", &self.options)
            .field("transports", &self.transports.len())
            .finish_non_exhaustive()
    }
}
