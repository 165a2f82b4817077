// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use crate::conversation::Conversation;
use crate::paths;
use anyhow::{Context, Result};
use courier_agent::config::{
    DEFAULT_HARD_TIMEOUT_MARGIN, DEFAULT_IDLE_TIMEOUT, DEFAULT_KILL_GRACE,
    DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT,
};
use courier_agent::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Name used for the default `@<name>` trigger
    #[serde(default = "default_assistant_name")]
    pub name: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Path to the worker executable
    #[serde(default = "default_worker_binary")]
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for every worker
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_hard_timeout_margin_secs")]
    pub hard_timeout_margin_secs: u64,
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Record full input/output for successful runs too
    #[serde(default)]
    pub verbose: bool,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            binary: default_worker_binary(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            hard_timeout_margin_secs: default_hard_timeout_margin_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            max_output_bytes: default_max_output_bytes(),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_path")]
    pub path: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: default_workspace_path(),
        }
    }
}

impl WorkspaceConfig {
    /// Parent of each conversation's working directory
    pub fn groups_dir(&self) -> PathBuf {
        PathBuf::from(&self.path).join("groups")
    }

    /// Root for session and input directories
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.path).join("data")
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Env file read at each worker spawn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    /// Keys passed through to workers; everything else in the file is ignored
    #[serde(default)]
    pub keys: Vec<String>,
}

// Only key names are shown, never where the values live
impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("env_file", &self.env_file.as_ref().map(|_| "[SET]"))
            .field("keys", &self.keys)
            .finish()
    }
}

// ─── TelegramConfig ─────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Empty means every chat may talk to the bot
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
}

// Custom Debug impl to redact bot_token
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("allowed_chats", &self.allowed_chats)
            .finish()
    }
}

fn default_assistant_name() -> String {
    "Courier".to_string()
}

fn default_worker_binary() -> String {
    "courier-worker".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_hard_timeout_margin_secs() -> u64 {
    DEFAULT_HARD_TIMEOUT_MARGIN.as_secs()
}

fn default_kill_grace_secs() -> u64 {
    DEFAULT_KILL_GRACE.as_secs()
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_workspace_path() -> String {
    "./workspace".to_string()
}

/// Expand tilde (~) to home directory in paths
/// Logs a warning if expansion fails and falls back to the original path
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs
                .home_dir()
                .join(stripped)
                .to_string_lossy()
                .to_string();
        }
        tracing::warn!(
            path = %path,
            "Failed to expand tilde in path: could not determine home directory"
        );
    } else if path == "~" {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs.home_dir().to_string_lossy().to_string();
        }
        tracing::warn!("Failed to expand tilde: could not determine home directory");
    }
    path.to_string()
}

fn parse_bool(name: &str, val: &str) -> Result<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{} must be true or false, got: {}", name, other),
    }
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. COURIER_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/courier/config.toml (XDG config dir)
    pub fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("COURIER_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "COURIER_CONFIG_PATH does not exist, ignoring");
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Parse TOML without applying overrides or validation
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.finalize()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the environment in production)
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = lookup("ASSISTANT_NAME") {
            self.assistant.name = val;
        }
        if let Some(val) = lookup("WORKER_BINARY") {
            self.worker.binary = val;
        }
        if let Some(val) = lookup("WORKER_TIMEOUT_SECS") {
            self.worker.timeout_secs = val.parse().with_context(|| {
                format!("WORKER_TIMEOUT_SECS must be a valid number, got: {}", val)
            })?;
        }
        if let Some(val) = lookup("WORKER_IDLE_TIMEOUT_SECS") {
            self.worker.idle_timeout_secs = val.parse().with_context(|| {
                format!("WORKER_IDLE_TIMEOUT_SECS must be a valid number, got: {}", val)
            })?;
        }
        if let Some(val) = lookup("WORKER_MAX_OUTPUT_BYTES") {
            self.worker.max_output_bytes = val.parse().with_context(|| {
                format!("WORKER_MAX_OUTPUT_BYTES must be a valid number, got: {}", val)
            })?;
        }
        if let Some(val) = lookup("WORKER_VERBOSE") {
            self.worker.verbose = parse_bool("WORKER_VERBOSE", &val)?;
        }
        if let Some(val) = lookup("WORKSPACE_PATH") {
            self.workspace.path = val;
        }
        if let Some(val) = lookup("TELEGRAM_BOT_TOKEN") {
            match self.telegram {
                Some(ref mut telegram) => telegram.bot_token = val,
                None => {
                    self.telegram = Some(TelegramConfig {
                        bot_token: val,
                        allowed_chats: Vec::new(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Expand paths and validate
    pub fn finalize(&mut self) -> Result<()> {
        self.workspace.path = expand_tilde(&self.workspace.path);
        if let Some(env_file) = self.secrets.env_file.as_mut() {
            *env_file = expand_tilde(env_file);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.assistant.name.trim().is_empty() {
            anyhow::bail!("assistant.name must not be empty (set in config.toml or ASSISTANT_NAME env var)");
        }
        if self.worker.binary.trim().is_empty() {
            anyhow::bail!("worker.binary is required (set in config.toml or WORKER_BINARY env var)");
        }
        if self.worker.timeout_secs == 0 || self.worker.idle_timeout_secs == 0 {
            anyhow::bail!("worker.timeout_secs and worker.idle_timeout_secs must be greater than zero");
        }
        if self.worker.max_output_bytes == 0 {
            anyhow::bail!("worker.max_output_bytes must be greater than zero");
        }
        if let Some(ref telegram) = self.telegram {
            if telegram.bot_token.trim().is_empty() {
                anyhow::bail!("telegram.bot_token is required when [telegram] is present");
            }
        }

        let mut chat_ids = HashSet::new();
        let mut primaries = 0;
        for convo in &self.conversations {
            if convo.chat_id.trim().is_empty() {
                anyhow::bail!("conversation '{}' has an empty chat_id", convo.name);
            }
            if convo.folder.trim().is_empty() {
                anyhow::bail!("conversation '{}' has an empty folder", convo.name);
            }
            if !chat_ids.insert(convo.chat_id.as_str()) {
                anyhow::bail!("chat_id '{}' is registered more than once", convo.chat_id);
            }
            if convo.is_primary {
                primaries += 1;
            }
        }
        if primaries > 1 {
            anyhow::bail!("at most one conversation may be marked is_primary");
        }
        Ok(())
    }

    /// Worker runtime settings derived from this configuration
    pub fn to_worker_config(&self) -> WorkerConfig {
        let mut worker = WorkerConfig::new(&self.worker.binary, self.workspace.data_dir())
            .with_args(self.worker.args.iter().cloned());
        worker.env = self
            .worker
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        worker.timeout = Duration::from_secs(self.worker.timeout_secs);
        worker.idle_timeout = Duration::from_secs(self.worker.idle_timeout_secs);
        worker.hard_timeout_margin = Duration::from_secs(self.worker.hard_timeout_margin_secs);
        worker.kill_grace = Duration::from_secs(self.worker.kill_grace_secs);
        worker.max_output_bytes = self.worker.max_output_bytes;
        worker.verbose = self.worker.verbose;
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[assistant]
name = "Andy"

[worker]
binary = "/usr/local/bin/agent-worker"
args = ["--stream"]
timeout_secs = 600
idle_timeout_secs = 120

[worker.env]
NODE_ENV = "production"

[workspace]
path = "/srv/courier"

[secrets]
env_file = "/srv/courier/.env"
keys = ["ANTHROPIC_API_KEY"]

[telegram]
bot_token = "123:abc"

[[conversations]]
chat_id = "tg:1"
name = "Me"
folder = "main"
is_primary = true
requires_trigger = false

[[conversations]]
chat_id = "tg:-100"
name = "Family"
folder = "family"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.assistant.name, "Andy");
        assert_eq!(config.worker.args, vec!["--stream"]);
        assert_eq!(config.conversations.len(), 2);
        assert!(config.conversations[0].is_primary);
        assert!(config.conversations[1].requires_trigger);
        assert_eq!(config.workspace.groups_dir(), PathBuf::from("/srv/courier/groups"));
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::parse("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.worker.timeout_secs, 1800);
        assert_eq!(config.worker.kill_grace_secs, 15);
        assert!(config.telegram.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WORKER_TIMEOUT_SECS", "42"),
            ("WORKER_VERBOSE", "yes"),
            ("TELEGRAM_BOT_TOKEN", "999:zzz"),
            ("ASSISTANT_NAME", "Bee"),
        ]);
        let mut config = Config::parse("").unwrap();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.worker.timeout_secs, 42);
        assert!(config.worker.verbose);
        assert_eq!(config.assistant.name, "Bee");
        assert_eq!(config.telegram.unwrap().bot_token, "999:zzz");
    }

    #[test]
    fn test_invalid_number_override_fails() {
        let mut config = Config::parse("").unwrap();
        let err = config
            .apply_env_overrides(|k| (k == "WORKER_IDLE_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WORKER_IDLE_TIMEOUT_SECS"));
    }

    #[test]
    fn test_duplicate_chat_ids_rejected() {
        let toml = r#"
[[conversations]]
chat_id = "tg:1"
name = "A"
folder = "a"

[[conversations]]
chat_id = "tg:1"
name = "B"
folder = "b"
"#;
        let config = Config::parse(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_config_conversion() {
        let config = Config::parse(SAMPLE).unwrap();
        let worker = config.to_worker_config();
        assert_eq!(worker.binary, "/usr/local/bin/agent-worker");
        assert_eq!(worker.timeout, Duration::from_secs(600));
        assert_eq!(worker.idle_timeout, Duration::from_secs(120));
        assert_eq!(worker.data_dir, PathBuf::from("/srv/courier/data"));
        assert_eq!(worker.env, vec![("NODE_ENV".to_string(), "production".to_string())]);
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = Config::parse(SAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("123:abc"));
        assert!(debug.contains("[REDACTED]"));
    }
}
