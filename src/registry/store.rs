//! Route registry implementation

use std::collections::HashMap;

use crate::broadcast::BroadcasterHandle;
use crate::error::ConfigError;

/// Outcome of resolving a route key
#[derive(Debug)]
pub enum Route<'a> {
    /// Registered and accepting viewers
    Streaming(&'a BroadcasterHandle),
    /// Registered, but the broadcaster has stopped
    Stopped,
    /// Nothing registered under this key
    Unknown,
}

/// Route key to broadcaster table
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: HashMap<String, BroadcasterHandle>,
}

impl RouteRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a broadcaster under its route key
    ///
    /// Fails if the key is taken.
    pub fn register(&mut self, handle: BroadcasterHandle) -> Result<(), ConfigError> {
        let key = handle.key().to_string();

        if self.routes.contains_key(&key) {
            return Err(ConfigError::DuplicateRoute(key));
        }

        tracing::info!(stream = %key, "Route registered");
        self.routes.insert(key, handle);
        Ok(())
    }

    /// Get the broadcaster registered under `key`
    pub fn get(&self, key: &str) -> Option<&BroadcasterHandle> {
        self.routes.get(key)
    }

    /// Resolve `key` for a new viewer
    pub fn resolve(&self, key: &str) -> Route<'_> {
        match self.routes.get(key) {
            Some(handle) if handle.is_broadcasting() => Route::Streaming(handle),
            Some(_) => Route::Stopped,
            None => Route::Unknown,
        }
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no routes are registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Stop every registered broadcaster
    pub fn stop_all(&self) {
        for handle in self.routes.values() {
            handle.stop();
        }
    }
}
