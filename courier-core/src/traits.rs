// ABOUTME: Core transport abstraction and the inbound message model.
// ABOUTME: Transports deliver text to chats; the router never touches a wire protocol.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// =============================================================================
// Inbound Message
// =============================================================================

/// Message received from a chat transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Transport-specific message ID
    pub id: String,
    /// Chat this message was sent in. May be an opaque per-connection id
    /// until the router canonicalizes it.
    pub chat_id: String,
    /// Sender identifier
    pub sender: String,
    /// Sender display name
    pub sender_name: String,
    /// Message body
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Sent by the account this process runs as
    pub is_from_me: bool,
    /// Sent by another bot, when the transport can tell
    pub is_bot_message: Option<bool>,
}

impl InboundMessage {
    pub fn new(
        chat_id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let sender = sender.into();
        Self {
            id: String::new(),
            chat_id: chat_id.into(),
            sender_name: sender.clone(),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
            is_from_me: false,
            is_bot_message: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    /// Messages from ourselves or other bots never trigger a worker
    pub fn is_automated(&self) -> bool {
        self.is_from_me || self.is_bot_message.unwrap_or(false)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Outbound capability of a chat transport.
///
/// Implementations must be safe to call concurrently; the delivery queue and
/// the router share one instance across every conversation it owns.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier (e.g., "telegram", "console")
    fn name(&self) -> &str;

    /// Send a text message to a destination
    async fn send(&self, destination: &str, text: &str) -> Result<()>;

    /// Send and return the transport's ID for the new message
    async fn send_with_id(&self, destination: &str, text: &str) -> Result<String> {
        self.send(destination, text).await?;
        Ok(String::new())
    }

    /// Replace the text of a previously sent message
    async fn edit(&self, _destination: &str, _message_id: &str, _text: &str) -> Result<()> {
        anyhow::bail!("{} does not support editing messages", self.name())
    }

    /// Remove a previously sent message
    async fn delete(&self, _destination: &str, _message_id: &str) -> Result<()> {
        anyhow::bail!("{} does not support deleting messages", self.name())
    }

    /// Typing indicator on/off
    async fn set_typing(&self, _destination: &str, _typing: bool) -> Result<()> {
        Ok(())
    }

    /// Whether the transport currently has a working connection
    fn is_connected(&self) -> bool;

    /// Whether this transport is responsible for a destination id
    fn owns_destination(&self, destination: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automated_messages() {
        let mut msg = InboundMessage::new("tg:1", "alice", "hi");
        assert!(!msg.is_automated());

        msg.is_bot_message = Some(true);
        assert!(msg.is_automated());

        msg.is_bot_message = Some(false);
        msg.is_from_me = true;
        assert!(msg.is_automated());
    }

    #[test]
    fn test_sender_name_defaults_to_sender() {
        let msg = InboundMessage::new("tg:1", "alice", "hi").with_sender_name("Alice A.");
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.sender_name, "Alice A.");
    }
}
