//! In-process naming directory for container-provisioned pools.
//!
//! The hosting container binds the pools it owns under their environment
//! lookup keys; the engine only ever looks them up. Nothing looked up here is
//! closed by the engine.

use crate::db::provider::{PhysicalPool, ResourceProvider};
use crate::error::{PoolError, PoolResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Clone, Default)]
pub struct ContainerDirectory {
    bindings: Arc<RwLock<HashMap<String, Arc<dyn PhysicalPool>>>>,
}

impl ContainerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a pool under `lookup_key`, replacing any previous binding.
    pub async fn bind(&self, lookup_key: impl Into<String>, pool: Arc<dyn PhysicalPool>) {
        let lookup_key = lookup_key.into();
        info!(lookup_key = %lookup_key, "Binding container resource");
        let mut bindings = self.bindings.write().await;
        bindings.insert(lookup_key, pool);
    }

    /// Remove a binding. Returns the pool that was bound, if any.
    pub async fn unbind(&self, lookup_key: &str) -> Option<Arc<dyn PhysicalPool>> {
        let mut bindings = self.bindings.write().await;
        let removed = bindings.remove(lookup_key);
        if removed.is_some() {
            info!(lookup_key = %lookup_key, "Unbound container resource");
        }
        removed
    }

    /// Check if a key is bound.
    pub async fn is_bound(&self, lookup_key: &str) -> bool {
        let bindings = self.bindings.read().await;
        bindings.contains_key(lookup_key)
    }

    /// List all bound keys.
    pub async fn keys(&self) -> Vec<String> {
        let bindings = self.bindings.read().await;
        bindings.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ContainerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerDirectory").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResourceProvider for ContainerDirectory {
    async fn lookup(
        &self,
        logical_name: &str,
        lookup_key: &str,
    ) -> PoolResult<Arc<dyn PhysicalPool>> {
        let bindings = self.bindings.read().await;
        match bindings.get(lookup_key) {
            Some(pool) => Ok(Arc::clone(pool)),
            None => {
                debug!(
                    pool = %logical_name,
                    lookup_key = %lookup_key,
                    "Container resource not bound yet"
                );
                Err(PoolError::pool_not_found(logical_name, lookup_key))
            }
        }
    }
}
