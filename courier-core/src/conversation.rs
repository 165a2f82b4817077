// ABOUTME: Registered conversations and the lookup the router uses to find them.
// ABOUTME: Each conversation maps a canonical chat id to a worker folder and trigger rules.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// A chat the assistant has been registered to answer in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Canonical chat id
    pub chat_id: String,
    /// Human-readable name
    pub name: String,
    /// Folder key for the conversation's working directory and sessions
    pub folder: String,
    /// Trigger word override; defaults to `@<assistant name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Whether messages must start with the trigger to be answered
    #[serde(default = "default_requires_trigger")]
    pub requires_trigger: bool,
    /// The owner's own chat: answered without a trigger and given wider access
    #[serde(default)]
    pub is_primary: bool,
}

fn default_requires_trigger() -> bool {
    true
}

impl Conversation {
    pub fn new(chat_id: impl Into<String>, name: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            name: name.into(),
            folder: folder.into(),
            trigger: None,
            requires_trigger: default_requires_trigger(),
            is_primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.requires_trigger = false;
        self
    }

    pub fn without_trigger(mut self) -> Self {
        self.requires_trigger = false;
        self
    }
}

/// Looks up the conversation registered for a canonical chat id
#[async_trait]
pub trait ConversationResolver: Send + Sync {
    async fn resolve(&self, chat_id: &str) -> Option<Conversation>;
}

/// In-memory registry seeded from configuration, extendable at runtime
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_conversations(conversations: impl IntoIterator<Item = Conversation>) -> Self {
        let registry = Self::new();
        for conversation in conversations {
            registry.register(conversation);
        }
        registry
    }

    /// Add or replace a conversation
    pub fn register(&self, conversation: Conversation) {
        tracing::info!(
            chat_id = %conversation.chat_id,
            name = %conversation.name,
            folder = %conversation.folder,
            "Registered conversation"
        );
        let mut map = self.conversations.write().unwrap_or_else(|e| e.into_inner());
        map.insert(conversation.chat_id.clone(), conversation);
    }

    pub fn unregister(&self, chat_id: &str) -> Option<Conversation> {
        let mut map = self.conversations.write().unwrap_or_else(|e| e.into_inner());
        map.remove(chat_id)
    }

    pub fn get(&self, chat_id: &str) -> Option<Conversation> {
        let map = self.conversations.read().unwrap_or_else(|e| e.into_inner());
        map.get(chat_id).cloned()
    }

    pub fn all(&self) -> Vec<Conversation> {
        let map = self.conversations.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = map.values().cloned().collect();
        list.sort_by(|a, b| a.chat_id.cmp(&b.chat_id));
        list
    }

    pub fn len(&self) -> usize {
        self.conversations.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ConversationResolver for ConversationRegistry {
    async fn resolve(&self, chat_id: &str) -> Option<Conversation> {
        self.get(chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_needs_no_trigger() {
        let convo = Conversation::new("tg:1", "Me", "main").primary();
        assert!(convo.is_primary);
        assert!(!convo.requires_trigger);
    }

    #[test]
    fn test_registry_replaces_by_chat_id() {
        let registry = ConversationRegistry::new();
        registry.register(Conversation::new("tg:1", "Old", "old"));
        registry.register(Conversation::new("tg:1", "New", "new"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("tg:1").map(|c| c.folder), Some("new".to_string()));
    }

    #[test]
    fn test_deserialize_defaults() {
        let convo: Conversation = toml::from_str(
            r#"
            chat_id = "tg:-100"
            name = "Family"
            folder = "family"
            "#,
        )
        .unwrap();
        assert!(convo.requires_trigger);
        assert!(!convo.is_primary);
        assert!(convo.trigger.is_none());
    }
}
