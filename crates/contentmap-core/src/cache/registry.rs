//! One provider per scope (typically per website).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use super::lock::LockContext;
use super::provider::{ContentMapError, ContentMapProvider};

/// Process-wide registry of content map providers, keyed by scope.
#[derive(Debug, Default)]
pub struct ContentMapRegistry {
    providers: DashMap<String, Arc<ContentMapProvider>>,
    /// Per-scope locks so a factory runs once without holding a map shard
    creating: DashMap<String, Arc<Mutex<()>>>,
}

impl ContentMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the provider of a scope, creating it with `factory` on first use.
    ///
    /// The factory runs at most once per scope, even under concurrent calls,
    /// and no registry lock is held while it runs: it may build the map or
    /// use the registry for other scopes. Calling `get_or_create` for its own
    /// scope from inside the factory deadlocks. A failing factory registers
    /// nothing.
    pub fn get_or_create<F>(
        &self,
        scope: &str,
        factory: F,
    ) -> Result<Arc<ContentMapProvider>, ContentMapError>
    where
        F: FnOnce() -> Result<ContentMapProvider, ContentMapError>,
    {
        if let Some(provider) = self.get(scope) {
            return Ok(provider);
        }

        let creating = Arc::clone(self.creating.entry(scope.to_string()).or_default().value());
        let _guard = creating.lock();
        if let Some(provider) = self.get(scope) {
            return Ok(provider);
        }

        debug!("Creating content map provider for scope {}", scope);
        let provider = Arc::new(factory()?);
        self.providers.insert(scope.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    pub fn get(&self, scope: &str) -> Option<Arc<ContentMapProvider>> {
        self.providers
            .get(scope)
            .map(|provider| Arc::clone(provider.value()))
    }

    pub fn remove(&self, scope: &str) -> Option<Arc<ContentMapProvider>> {
        self.creating.remove(scope);
        self.providers.remove(scope).map(|(_, provider)| provider)
    }

    /// Registered scopes, sorted.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self
            .providers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        scopes.sort();
        scopes
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Clear the map of every provider; each is rebuilt on its next access.
    pub fn clear_all(&self, ctx: &LockContext) -> Result<(), ContentMapError> {
        let providers: Vec<Arc<ContentMapProvider>> = self
            .providers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for provider in &providers {
            provider.clear(ctx)?;
        }
        info!("Cleared {} content maps", providers.len());
        Ok(())
    }
}
