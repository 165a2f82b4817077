// ABOUTME: Cache mapping opaque per-connection chat ids to canonical ids.
// ABOUTME: Concurrent misses for the same id share a single authoritative lookup.

use crate::metrics;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Authoritative source for canonical identifiers (usually the transport)
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Canonical id for `opaque`, or None when the transport does not know it
    async fn resolve_canonical(&self, opaque: &str) -> Result<Option<String>>;
}

/// Per-transport identity cache.
///
/// Successful lookups are kept for the lifetime of the cache. Failures and
/// unknown ids are returned unchanged and looked up again next time.
pub struct IdentityCache {
    resolver: Arc<dyn IdentityResolver>,
    entries: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl IdentityCache {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            resolver,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Canonical id for `opaque`, falling back to `opaque` itself
    pub async fn resolve(&self, opaque: &str) -> String {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .entry(opaque.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        if let Some(canonical) = cell.get() {
            metrics::record_identity_lookup("hit");
            return canonical.clone();
        }

        // Only one caller runs the init future per key; the rest wait on it
        let resolved = cell
            .get_or_try_init(|| async {
                match self.resolver.resolve_canonical(opaque).await {
                    Ok(Some(canonical)) => {
                        tracing::debug!(opaque = %opaque, canonical = %canonical, "Resolved identity");
                        metrics::record_identity_lookup("resolved");
                        Ok(canonical)
                    }
                    Ok(None) => {
                        metrics::record_identity_lookup("unknown");
                        Err(None)
                    }
                    Err(e) => {
                        metrics::record_identity_lookup("error");
                        Err(Some(e))
                    }
                }
            })
            .await;

        match resolved {
            Ok(canonical) => canonical.clone(),
            Err(None) => {
                self.forget_unresolved(opaque, &cell);
                opaque.to_string()
            }
            Err(Some(e)) => {
                tracing::warn!(opaque = %opaque, error = %e, "Identity lookup failed, using opaque id");
                self.forget_unresolved(opaque, &cell);
                opaque.to_string()
            }
        }
    }

    /// Drop the placeholder for a failed lookup so unresolvable ids do not accumulate
    fn forget_unresolved(&self, opaque: &str, cell: &Arc<OnceCell<String>>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let stale = entries
            .get(opaque)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if stale {
            entries.remove(opaque);
        }
    }

    /// Record a mapping learned out-of-band, e.g. from message metadata
    pub fn remember(&self, opaque: impl Into<String>, canonical: impl Into<String>) {
        let opaque = opaque.into();
        let canonical = canonical.into();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let cell = entries
            .entry(opaque.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()));
        // Mappings never change once known
        if cell.set(canonical).is_err() {
            tracing::trace!(opaque = %opaque, "Identity already known");
        }
    }

    /// Cached canonical id without consulting the resolver
    pub fn cached(&self, opaque: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(opaque).and_then(|cell| cell.get().cloned())
    }

    /// Number of resolved mappings
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("resolved", &self.len())
            .finish_non_exhaustive()
    }
}
