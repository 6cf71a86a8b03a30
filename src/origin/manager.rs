//! Registry of origins by name.

use std::sync::Arc;

use dashmap::DashMap;

use crate::origin::Origin;

/// Name → origin lookup shared by the routing filter and the proxy endpoint.
#[derive(Default)]
pub struct OriginManager {
    origins: DashMap<String, Arc<dyn Origin>>,
}

impl OriginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an origin, replacing any with the same name.
    pub fn register(&self, origin: Arc<dyn Origin>) {
        let name = origin.name().to_string();
        if self.origins.insert(name.clone(), origin).is_some() {
            tracing::info!(origin = %name, "Replaced origin");
        } else {
            tracing::debug!(origin = %name, "Registered origin");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Origin>> {
        self.origins.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.origins.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.origins.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

impl std::fmt::Debug for OriginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginManager")
            .field("origins", &self.names())
            .finish()
    }
}
