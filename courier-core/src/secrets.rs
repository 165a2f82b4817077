// ABOUTME: Secrets provider reading an env file at worker spawn time.
// ABOUTME: Only allowlisted keys are handed to workers; nothing is cached in memory.

use anyhow::{Context, Result};
use courier_agent::SecretsProvider;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read allowlisted `KEY=value` pairs from an env file
pub fn read_env_secrets(path: &Path, allowed: &HashSet<String>) -> Result<HashMap<String, String>> {
    if allowed.is_empty() {
        return Ok(HashMap::new());
    }
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Secrets file not found");
        return Ok(HashMap::new());
    }

    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open secrets file {}", path.display()))?;
    let mut secrets = HashMap::new();
    for item in iter {
        let (key, value) =
            item.with_context(|| format!("Failed to parse secrets file {}", path.display()))?;
        if allowed.contains(&key) {
            secrets.insert(key, value);
        }
    }
    Ok(secrets)
}

/// Provider that re-reads `path` on every spawn
pub fn env_file_provider(path: PathBuf, allowed: Vec<String>) -> SecretsProvider {
    let allowed: HashSet<String> = allowed.into_iter().collect();
    Arc::new(move || read_env_secrets(&path, &allowed))
}
