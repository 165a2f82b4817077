// ABOUTME: Per-invocation worker input and the conversation context it runs in.
// ABOUTME: Secrets are fetched lazily at spawn and scrubbed right after the stdin write.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Called once per spawn to fetch the secrets piped to the worker
pub type SecretsProvider = Arc<dyn Fn() -> Result<HashMap<String, String>> + Send + Sync>;

/// A provider that never hands out secrets
pub fn no_secrets() -> SecretsProvider {
    Arc::new(|| Ok(HashMap::new()))
}

/// JSON document written to the worker's stdin
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInput {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub working_dir: PathBuf,
    pub chat_id: String,
    pub is_primary_conversation: bool,
    pub is_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<HashMap<String, String>>,
}

impl WorkerInput {
    pub fn new(prompt: impl Into<String>, context: &WorkerContext) -> Self {
        Self {
            prompt: prompt.into(),
            session_id: None,
            working_dir: context.working_dir.clone(),
            chat_id: context.chat_id.clone(),
            is_primary_conversation: context.is_primary,
            is_scheduled: false,
            secrets: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn scheduled(mut self) -> Self {
        self.is_scheduled = true;
        self
    }

    /// Drop any secrets held by this input
    pub fn scrub_secrets(&mut self) {
        self.secrets = None;
    }
}

// Secrets must never show up in logs
impl std::fmt::Debug for WorkerInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerInput")
            .field("prompt_len", &self.prompt.len())
            .field("session_id", &self.session_id)
            .field("working_dir", &self.working_dir)
            .field("chat_id", &self.chat_id)
            .field("is_primary_conversation", &self.is_primary_conversation)
            .field("is_scheduled", &self.is_scheduled)
            .field(
                "secrets",
                &self.secrets.as_ref().map(|s| format!("[{} REDACTED]", s.len())),
            )
            .finish()
    }
}

/// Where and as whom a worker runs
#[derive(Clone)]
pub struct WorkerContext {
    /// Human-readable conversation name
    pub name: String,
    /// Folder key for session and input directories
    pub folder: String,
    /// Chat this invocation answers
    pub chat_id: String,
    pub working_dir: PathBuf,
    pub is_primary: bool,
    pub secrets: SecretsProvider,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("name", &self.name)
            .field("folder", &self.folder)
            .field("chat_id", &self.chat_id)
            .field("working_dir", &self.working_dir)
            .field("is_primary", &self.is_primary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> WorkerContext {
        WorkerContext {
            name: "Family".to_string(),
            folder: "family".to_string(),
            chat_id: "tg:42".to_string(),
            working_dir: PathBuf::from("/data/groups/family"),
            is_primary: false,
            secrets: no_secrets(),
        }
    }

    #[test]
    fn test_serializes_camel_case() {
        let input = WorkerInput::new("hi", &context()).with_session(Some("s1".to_string()));
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["prompt"], "hi");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["chatId"], "tg:42");
        assert_eq!(value["isPrimaryConversation"], false);
        assert_eq!(value["isScheduled"], false);
        assert!(value.get("secrets").is_none());
    }

    #[test]
    fn test_scrub_and_debug_hide_secrets() {
        let mut input = WorkerInput::new("hi", &context());
        input.secrets = Some(HashMap::from([(
            "API_KEY".to_string(),
            "sk-very-secret".to_string(),
        )]));
        let debug = format!("{:?}", input);
        assert!(!debug.contains("sk-very-secret"));

        input.scrub_secrets();
        let value = serde_json::to_value(&input).unwrap();
        assert!(value.get("secrets").is_none());
    }
}
