//! Registry mapping handler ids to implementations

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::traits::{Handler, HandlerInfo};

/// Handlers available to the orchestrator, keyed by id
///
/// Populated once at startup. Iteration order is the lexicographic id order,
/// which is also the router's tie-break order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same id
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        let id = handler.id().to_string();
        if self.handlers.insert(id.clone(), handler).is_some() {
            warn!(handler = %id, "Replaced previously registered handler");
        }
        self
    }

    /// Builder-style registration
    pub fn with(mut self, handler: Arc<dyn Handler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Registered ids in lexicographic order
    pub fn ids(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn infos(&self) -> Vec<HandlerInfo> {
        self.handlers.values().map(|h| h.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
