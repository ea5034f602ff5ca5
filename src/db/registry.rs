//! Registry of physical pools keyed by logical pool name.
//!
//! # Concurrency
//!
//! - One `OnceCell` per name gives single-flight creation: concurrent first
//!   borrows of the same pool wait for one creation instead of each opening
//!   their own pool.
//! - A failed creation leaves the cell empty, so the next borrow retries. In
//!   managed environments "not bound yet" is a normal transient state.
//! - The lent count is an `AtomicUsize` that saturates at 0. Borrowers take
//!   their count with [`PoolRegistry::lease`] under the read lock; `destroy`
//!   refuses pools with connections out and re-checks under the write lock.
//! - Locks are never held across the close of a physical pool.

use crate::error::{PoolError, PoolResult};
use crate::db::provider::PhysicalPool;
use crate::models::PoolOwnership;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// A registered physical pool.
pub struct PoolEntry {
    pub name: String,
    /// Key the pool was resolved under.
    pub lookup_key: String,
    pub ownership: PoolOwnership,
    pool: Arc<dyn PhysicalPool>,
    /// Uses std::sync::RwLock so it can be touched without awaiting.
    last_accessed: std::sync::RwLock<Instant>,
    pub created_at: Instant,
    lent: AtomicUsize,
}

impl PoolEntry {
    pub fn new(
        name: impl Into<String>,
        lookup_key: impl Into<String>,
        ownership: PoolOwnership,
        pool: Arc<dyn PhysicalPool>,
    ) -> Self {
        let now = Instant::now();
        Self {
            name: name.into(),
            lookup_key: lookup_key.into(),
            ownership,
            pool,
            last_accessed: std::sync::RwLock::new(now),
            created_at: now,
            lent: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<dyn PhysicalPool> {
        &self.pool
    }

    pub fn increment_lent(&self) {
        self.lent.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at 0; an extra release is logged, not wrapped.
    pub fn decrement_lent(&self) {
        let result = self
            .lent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });

        if let Ok(0) = result {
            warn!(pool = %self.name, "Lent count underflow detected - extra release call");
        }
    }

    pub fn lent(&self) -> usize {
        self.lent.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        if let Ok(mut last_accessed) = self.last_accessed.write() {
            *last_accessed = Instant::now();
        }
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
            .read()
            .map(|guard| *guard)
            .unwrap_or(self.created_at)
    }

    fn stats(&self) -> PoolStats {
        let now = Instant::now();
        PoolStats {
            name: self.name.clone(),
            lookup_key: self.lookup_key.clone(),
            ownership: self.ownership,
            lent: self.lent(),
            age_secs: now.saturating_duration_since(self.created_at).as_secs(),
            idle_secs: now.saturating_duration_since(self.last_accessed()).as_secs(),
        }
    }
}

impl std::fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("name", &self.name)
            .field("lookup_key", &self.lookup_key)
            .field("ownership", &self.ownership)
            .field("lent", &self.lent.load(Ordering::Relaxed))
            .finish()
    }
}

/// Point-in-time view of one registered pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub lookup_key: String,
    pub ownership: PoolOwnership,
    pub lent: usize,
    pub age_secs: u64,
    pub idle_secs: u64,
}

#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<OnceCell<Arc<PoolEntry>>>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for `name`, creating it with `init` on first use.
    ///
    /// `init` runs at most once at a time per name and is not run again
    /// after it has succeeded.
    pub async fn get_or_init<F, Fut>(&self, name: &str, init: F) -> PoolResult<Arc<PoolEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PoolResult<PoolEntry>>,
    {
        let cell = {
            let pools = self.pools.read().await;
            if let Some(cell) = pools.get(name) {
                Arc::clone(cell)
            } else {
                drop(pools);
                let mut pools = self.pools.write().await;
                // Double-check after acquiring write lock
                Arc::clone(
                    pools
                        .entry(name.to_string())
                        .or_insert_with(|| Arc::new(OnceCell::new())),
                )
            }
        };

        let entry = cell
            .get_or_try_init(|| async {
                debug!(pool = %name, "Creating pool entry");
                init().await.map(Arc::new)
            })
            .await?;

        entry.touch();
        Ok(Arc::clone(entry))
    }

    /// Count one connection out against `entry`, provided it is still the
    /// registered pool for `name`.
    ///
    /// The check and the increment happen under the read lock, so a
    /// concurrent `destroy` either sees the connection as lent or has already
    /// removed the entry, in which case `false` is returned and nothing is
    /// counted.
    pub async fn lease(&self, name: &str, entry: &Arc<PoolEntry>) -> bool {
        let pools = self.pools.read().await;
        match pools.get(name).and_then(|cell| cell.get()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entry.increment_lent();
                true
            }
            _ => false,
        }
    }

    /// Get an initialized entry without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<PoolEntry>> {
        let pools = self.pools.read().await;
        pools.get(name).and_then(|cell| cell.get()).cloned()
    }

    /// Remove and close a self-managed pool that has no connections out.
    ///
    /// Container pools are left alone and the call succeeds.
    pub async fn destroy(&self, name: &str) -> PoolResult<()> {
        let Some(entry) = self.get(name).await else {
            return Err(PoolError::pool_not_found(name, name));
        };

        if entry.ownership == PoolOwnership::ContainerManaged {
            debug!(pool = %name, "Container-owned pool, destroy is a no-op");
            return Ok(());
        }

        let lent = entry.lent();
        if lent > 0 {
            return Err(PoolError::pool_busy(name, lent));
        }

        {
            let mut pools = self.pools.write().await;
            // Re-check under the write lock; a borrow may have started.
            match pools.get(name).and_then(|cell| cell.get()) {
                Some(current) if Arc::ptr_eq(current, &entry) => {
                    let lent = current.lent();
                    if lent > 0 {
                        return Err(PoolError::pool_busy(name, lent));
                    }
                    pools.remove(name);
                }
                _ => {
                    debug!(pool = %name, "Pool already destroyed or replaced");
                    return Ok(());
                }
            }
        }

        info!(pool = %name, lookup_key = %entry.lookup_key, "Destroying pool");
        entry.pool.close().await;
        Ok(())
    }

    /// Number of initialized pools.
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.values().filter(|cell| cell.get().is_some()).count()
    }

    pub async fn stats(&self) -> Vec<PoolStats> {
        let pools = self.pools.read().await;
        let mut stats: Vec<PoolStats> = pools
            .values()
            .filter_map(|cell| cell.get())
            .map(|entry| entry.stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Forget every pool, closing the self-managed ones.
    pub async fn close_all(&self) {
        // Drain pools under lock, close outside lock
        let drained: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };

        for (name, cell) in drained {
            let Some(entry) = cell.get() else {
                continue;
            };
            let lent = entry.lent();
            if lent > 0 {
                warn!(pool = %name, lent = lent, "Closing registry with connections still lent");
            }
            match entry.ownership {
                PoolOwnership::SelfManaged => {
                    info!(pool = %name, "Closing pool");
                    entry.pool.close().await;
                }
                PoolOwnership::ContainerManaged => {
                    debug!(pool = %name, "Releasing container pool reference");
                }
            }
        }
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry").finish_non_exhaustive()
    }
}
