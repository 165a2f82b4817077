// ABOUTME: Telegram transport using teloxide long polling
// ABOUTME: Feeds inbound text messages to the router and flushes the delivery queue on reconnect

pub mod channel;
pub mod connection;

pub use channel::{chunk_text, format_chat_id, parse_chat_id, MAX_MESSAGE_LENGTH};
pub use connection::Connection;

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_agent::CancellationToken;
use courier_core::config::TelegramConfig;
use courier_core::{InboundMessage, OutboundQueue, Transport};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageId, UpdateKind};
use teloxide::RequestError;
use tokio::sync::mpsc;

/// Long-poll wait per getUpdates call; kept under the HTTP client timeout
const POLL_TIMEOUT_SECS: u32 = 10;

pub struct TelegramTransport {
    bot: Bot,
    /// Bot's numeric user ID
    bot_user_id: u64,
    config: TelegramConfig,
    connection: Connection,
}

impl TelegramTransport {
    /// Create a transport from config.
    ///
    /// Resolves the bot's user ID via the `getMe` API call.
    pub async fn new(config: TelegramConfig) -> Result<Self> {
        let bot = Bot::new(&config.bot_token);

        let me = bot.get_me().await.context("Failed to call Telegram getMe")?;
        tracing::info!(
            bot_username = %me.username(),
            bot_id = me.id.0,
            "Telegram bot authenticated"
        );

        Ok(Self {
            bot,
            bot_user_id: me.id.0,
            config,
            connection: Connection::default(),
        })
    }

    /// Attach context to a failed API call, noting whether Telegram was unreachable
    fn checked<T>(&self, result: Result<T, RequestError>, what: &'static str) -> Result<T> {
        result.map_err(|e| {
            self.connection.request_failed(&e);
            anyhow::Error::new(e).context(what)
        })
    }

    fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.config.allowed_chats.is_empty() || self.config.allowed_chats.contains(&chat_id)
    }

    /// Convert an update into an inbound message, or None if it should be skipped
    fn to_inbound(&self, message: &Message) -> Option<InboundMessage> {
        let text = message.text()?;
        let from = message.from.as_ref()?;

        if from.id.0 == self.bot_user_id {
            return None;
        }
        if !self.is_chat_allowed(message.chat.id.0) {
            tracing::debug!(
                platform = "telegram",
                chat_id = message.chat.id.0,
                "Skipping message from non-allowed chat"
            );
            return None;
        }

        let mut inbound = InboundMessage::new(format_chat_id(message.chat.id), from.id.0.to_string(), text)
            .with_id(message.id.0.to_string())
            .with_sender_name(from.full_name());
        inbound.timestamp = message.date;
        inbound.is_bot_message = Some(from.is_bot);
        Some(inbound)
    }

    /// Poll for updates until `shutdown` fires.
    ///
    /// Connection state is mirrored onto `queue` so replies produced while
    /// Telegram is unreachable are held and flushed in order afterwards.
    pub fn spawn_polling(
        self: Arc<Self>,
        queue: Arc<OutboundQueue>,
        tx: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut offset: i32 = 0;

            loop {
                let poll = self
                    .bot
                    .get_updates()
                    .offset(offset)
                    .timeout(POLL_TIMEOUT_SECS);
                let result = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = poll.send() => result,
                };

                let updates = match result {
                    Ok(updates) => {
                        self.connection.poll_succeeded(&queue).await;
                        updates
                    }
                    Err(e) => {
                        let delay = self.connection.poll_failed(&queue);
                        tracing::warn!(
                            platform = "telegram",
                            error = %e,
                            failures = self.connection.failed_polls(),
                            retry_in_secs = delay.as_secs(),
                            "Long polling error"
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                };

                for update in &updates {
                    offset = update.id.as_offset();

                    let UpdateKind::Message(message) = &update.kind else {
                        continue;
                    };
                    let Some(inbound) = self.to_inbound(message) else {
                        continue;
                    };
                    if tx.send(inbound).await.is_err() {
                        tracing::warn!(platform = "telegram", "Inbound receiver dropped");
                        return;
                    }
                }
            }
            tracing::info!(platform = "telegram", "Polling stopped");
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<()> {
        self.send_with_id(destination, text).await.map(|_| ())
    }

    async fn send_with_id(&self, destination: &str, text: &str) -> Result<String> {
        let chat_id = parse_chat_id(destination)?;
        let mut last_id = String::new();
        for chunk in chunk_text(text, MAX_MESSAGE_LENGTH) {
            let sent = self.checked(
                self.bot.send_message(chat_id, chunk).await,
                "Failed to send message",
            )?;
            last_id = sent.id.0.to_string();
        }
        Ok(last_id)
    }

    async fn edit(&self, destination: &str, message_id: &str, text: &str) -> Result<()> {
        let chat_id = parse_chat_id(destination)?;
        let id: i32 = message_id.parse().context("Invalid Telegram message ID")?;
        self.checked(
            self.bot.edit_message_text(chat_id, MessageId(id), text).await,
            "Failed to edit message",
        )?;
        Ok(())
    }

    async fn delete(&self, destination: &str, message_id: &str) -> Result<()> {
        let chat_id = parse_chat_id(destination)?;
        let id: i32 = message_id.parse().context("Invalid Telegram message ID")?;
        self.checked(
            self.bot.delete_message(chat_id, MessageId(id)).await,
            "Failed to delete message",
        )?;
        Ok(())
    }

    async fn set_typing(&self, destination: &str, typing: bool) -> Result<()> {
        // Telegram typing indicators auto-expire; there is no "stop typing" call
        if typing {
            let chat_id = parse_chat_id(destination)?;
            self.checked(
                self.bot.send_chat_action(chat_id, ChatAction::Typing).await,
                "Failed to send typing action",
            )?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn owns_destination(&self, destination: &str) -> bool {
        destination.starts_with(channel::CHAT_PREFIX)
    }
}
