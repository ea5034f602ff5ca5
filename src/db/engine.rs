//! Pool engine: the single entry point callers borrow connections through.
//!
//! One engine serves every hosting environment. The detected environment
//! selects a [`HostStrategy`] which decides the lookup key, who owns the
//! physical pools and whether connection settings may be touched. Pools are
//! created lazily on first borrow and reused afterwards.

use crate::db::accounting::{UsageAccountant, UsageMark};
use crate::db::directory::ContainerDirectory;
use crate::db::environment::EnvironmentDetector;
use crate::db::naming::resolve_lookup_name;
use crate::db::provider::{PhysicalConnection, PoolConnector, ResourceProvider};
use crate::db::registry::{PoolEntry, PoolRegistry, PoolStats};
use crate::db::sqlx_pool::SqlxConnector;
use crate::db::transaction::{TransactionFactory, TransactionHandle, TransactionManager};
use crate::error::{PoolError, PoolResult};
use crate::models::{
    Credentials, EnvironmentKind, HostStrategy, PoolDefinition, PoolOwnership,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What a caller asks for when borrowing a connection.
#[derive(Debug, Clone, Default)]
pub struct BorrowRequest {
    /// Per-call credentials. Only honored by pools that support them.
    pub credentials: Option<Credentials>,
    /// Autocommit override; falls back to the pool definition's default.
    pub autocommit: Option<bool>,
    /// Transaction of the calling unit of work, if any.
    pub transaction: Option<TransactionHandle>,
}

impl BorrowRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = Some(autocommit);
        self
    }

    pub fn in_transaction(mut self, transaction: TransactionHandle) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

/// A borrowed connection.
///
/// Call [`release`](Self::release) when done. Dropping an unreleased handle
/// still returns the connection from a spawned task, with a warning.
pub struct ConnectionHandle {
    conn: Option<Box<dyn PhysicalConnection>>,
    entry: Arc<PoolEntry>,
    usage: Arc<UsageAccountant>,
    /// Autocommit value found on borrow, when the engine changed it.
    restore_autocommit: Option<bool>,
}

impl ConnectionHandle {
    fn new(
        conn: Box<dyn PhysicalConnection>,
        entry: Arc<PoolEntry>,
        usage: Arc<UsageAccountant>,
    ) -> Self {
        Self {
            conn: Some(conn),
            entry,
            usage,
            restore_autocommit: None,
        }
    }

    /// Logical name of the pool this connection came from.
    pub fn pool_name(&self) -> &str {
        &self.entry.name
    }

    pub fn lookup_key(&self) -> &str {
        &self.entry.lookup_key
    }

    /// Whether the engine changed autocommit on this connection.
    pub fn autocommit_changed(&self) -> bool {
        self.restore_autocommit.is_some()
    }

    pub fn connection(&mut self) -> PoolResult<&mut dyn PhysicalConnection> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(PoolError::internal("connection already released")),
        }
    }

    /// Access the concrete connection, e.g. [`SqlxConnection`](crate::db::SqlxConnection).
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.conn
            .as_deref_mut()
            .and_then(|conn| conn.as_any_mut().downcast_mut::<T>())
    }

    /// Commit the work done on this connection since autocommit was turned
    /// off.
    pub async fn commit(&mut self) -> PoolResult<()> {
        self.connection()?.commit().await
    }

    pub async fn rollback(&mut self) -> PoolResult<()> {
        self.connection()?.rollback().await
    }

    /// Roll back uncommitted work, restore autocommit, return the connection
    /// to its pool and update the accounting.
    ///
    /// The connection is returned even when restoring autocommit fails; the
    /// first failure is reported.
    pub async fn release(mut self) -> PoolResult<()> {
        match self.conn.take() {
            Some(conn) => {
                return_connection(
                    conn,
                    self.restore_autocommit.take(),
                    Arc::clone(&self.entry),
                    Arc::clone(&self.usage),
                )
                .await
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("pool", &self.entry.name)
            .field("lookup_key", &self.entry.lookup_key)
            .field("restore_autocommit", &self.restore_autocommit)
            .field("released", &self.conn.is_none())
            .finish()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let restore = self.restore_autocommit.take();
        let entry = Arc::clone(&self.entry);
        let usage = Arc::clone(&self.usage);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let pool = entry.name.clone();
                    let _ = return_connection(conn, restore, entry, usage).await;
                    warn!(
                        pool = %pool,
                        "Connection released via Drop - consider using explicit release()"
                    );
                });
            }
            Err(_) => {
                warn!(
                    pool = %entry.name,
                    "Connection dropped outside a runtime, returned without cleanup"
                );
                drop(conn);
                usage.record_return();
                entry.decrement_lent();
            }
        }
    }
}

async fn return_connection(
    mut conn: Box<dyn PhysicalConnection>,
    restore_autocommit: Option<bool>,
    entry: Arc<PoolEntry>,
    usage: Arc<UsageAccountant>,
) -> PoolResult<()> {
    let mut result = Ok(());

    if let Some(previous) = restore_autocommit {
        // Uncommitted work never survives the return.
        let discarded = if conn.autocommit() {
            Ok(())
        } else {
            conn.rollback().await
        };
        let restored = match discarded {
            Ok(()) => conn.set_autocommit(previous).await,
            Err(e) => Err(e),
        };
        if let Err(e) = restored {
            warn!(pool = %entry.name, error = %e, "Failed to reset connection state");
            result = Err(e);
        }
    }
    if let Err(e) = conn.close().await {
        warn!(pool = %entry.name, error = %e, "Failed to close connection");
        if result.is_ok() {
            result = Err(e);
        }
    }

    usage.record_return();
    entry.decrement_lent();
    entry.touch();
    result
}

pub struct PoolEngine {
    detector: EnvironmentDetector,
    connector: Arc<dyn PoolConnector>,
    directory: Arc<dyn ResourceProvider>,
    definitions: RwLock<HashMap<String, PoolDefinition>>,
    registry: PoolRegistry,
    usage: Arc<UsageAccountant>,
    transactions: Arc<TransactionFactory>,
}

impl PoolEngine {
    pub fn builder() -> PoolEngineBuilder {
        PoolEngineBuilder::default()
    }

    /// Detected hosting environment. Detection runs once.
    pub fn environment(&self) -> EnvironmentKind {
        self.detector.detect()
    }

    pub fn strategy(&self) -> HostStrategy {
        HostStrategy::for_environment(self.environment())
    }

    /// Lookup key `logical_name` resolves to in the detected environment.
    pub fn lookup_name(&self, logical_name: &str) -> String {
        resolve_lookup_name(self.environment(), logical_name)
    }

    pub fn usage(&self) -> &Arc<UsageAccountant> {
        &self.usage
    }

    pub fn transactions(&self) -> &Arc<TransactionFactory> {
        &self.transactions
    }

    /// Register or replace a pool definition.
    ///
    /// A replacement takes effect once the current pool is destroyed.
    pub async fn define_pool(&self, definition: PoolDefinition) {
        let name = definition.name.clone();
        let replaced = {
            let mut definitions = self.definitions.write().await;
            definitions.insert(name.clone(), definition).is_some()
        };
        if replaced && self.registry.get(&name).await.is_some() {
            warn!(pool = %name, "Definition replaced while pool is open; destroy it to apply");
        }
        debug!(pool = %name, replaced = replaced, "Pool defined");
    }

    pub async fn definition(&self, name: &str) -> Option<PoolDefinition> {
        let definitions = self.definitions.read().await;
        definitions.get(name).cloned()
    }

    /// Names of all defined pools, sorted.
    pub async fn defined_pools(&self) -> Vec<String> {
        let definitions = self.definitions.read().await;
        let mut names: Vec<String> = definitions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create (or look up) the pool now instead of on first borrow.
    pub async fn ensure_pool(&self, name: &str) -> PoolResult<()> {
        self.entry(name, &self.strategy()).await.map(|_| ())
    }

    async fn entry(&self, name: &str, strategy: &HostStrategy) -> PoolResult<Arc<PoolEntry>> {
        let lookup_key = resolve_lookup_name(strategy.environment, name);
        self.registry
            .get_or_init(name, || async {
                let pool = match strategy.ownership {
                    PoolOwnership::SelfManaged => {
                        let definition = self
                            .definition(name)
                            .await
                            .ok_or_else(|| PoolError::pool_not_found(name, &lookup_key))?;
                        self.connector.open(&definition).await?
                    }
                    PoolOwnership::ContainerManaged => {
                        self.directory.lookup(name, &lookup_key).await?
                    }
                };
                info!(
                    pool = %name,
                    lookup_key = %lookup_key,
                    environment = %strategy.environment,
                    ownership = ?strategy.ownership,
                    "Pool registered"
                );
                Ok(PoolEntry::new(
                    name,
                    lookup_key.clone(),
                    strategy.ownership,
                    pool,
                ))
            })
            .await
    }

    /// Registered entry for `name` with one connection already counted
    /// against it. Looks the pool up again if it was destroyed in between.
    async fn leased_entry(&self, name: &str, strategy: &HostStrategy) -> PoolResult<Arc<PoolEntry>> {
        loop {
            let entry = self.entry(name, strategy).await?;
            if self.registry.lease(name, &entry).await {
                return Ok(entry);
            }
            debug!(pool = %name, "Pool destroyed during borrow, looking it up again");
        }
    }

    /// Borrow a connection from the named pool.
    pub async fn borrow(&self, pool: &str, request: BorrowRequest) -> PoolResult<ConnectionHandle> {
        let strategy = self.strategy();
        let entry = self.leased_entry(pool, &strategy).await?;

        if request.credentials.is_some() && !entry.pool().supports_credentials() {
            entry.decrement_lent();
            return Err(PoolError::credentials_unsupported(pool));
        }

        let conn = match entry.pool().borrow(request.credentials.as_ref()).await {
            Ok(conn) => conn,
            Err(e) => {
                entry.decrement_lent();
                return Err(e);
            }
        };
        self.usage.record_borrow();

        let mut handle = ConnectionHandle::new(conn, entry, Arc::clone(&self.usage));
        if let Err(e) = self.prepare(&mut handle, &strategy, &request).await {
            if let Err(release_err) = handle.release().await {
                debug!(pool = %pool, error = %release_err, "Release after failed borrow also failed");
            }
            return Err(e);
        }

        debug!(pool = %pool, lent = handle.entry.lent(), "Connection borrowed");
        Ok(handle)
    }

    /// Apply isolation and autocommit unless a transaction owns the
    /// connection state.
    async fn prepare(
        &self,
        handle: &mut ConnectionHandle,
        strategy: &HostStrategy,
        request: &BorrowRequest,
    ) -> PoolResult<()> {
        let in_progress = self
            .transactions
            .is_transaction_in_progress(request.transaction.as_ref())
            .await?;
        if in_progress {
            debug!(
                pool = %handle.pool_name(),
                transaction_id = ?request.transaction.as_ref().map(|t| t.id().to_string()),
                "Transaction in progress, leaving autocommit and isolation untouched"
            );
            return Ok(());
        }

        let definition = self.definition(handle.pool_name()).await;

        if strategy.apply_isolation {
            if let Some(level) = definition.as_ref().and_then(|d| d.isolation) {
                handle.connection()?.set_isolation(level).await?;
            }
        }

        let desired = request
            .autocommit
            .or_else(|| definition.as_ref().and_then(|d| d.autocommit));
        if let Some(desired) = desired {
            let conn = handle.connection()?;
            let current = conn.autocommit();
            if current != desired {
                conn.set_autocommit(desired).await?;
                handle.restore_autocommit = Some(current);
            }
        }
        Ok(())
    }

    /// Destroy an idle self-managed pool. No-op for container pools.
    pub async fn destroy_pool(&self, name: &str) -> PoolResult<()> {
        self.registry.destroy(name).await.map_err(|e| match e {
            PoolError::PoolNotFound { pool, .. } => {
                PoolError::pool_not_found(pool, self.lookup_name(name))
            }
            other => other,
        })
    }

    /// Borrow one connection, ping it and give it back.
    pub async fn validate_pool(&self, name: &str) -> PoolResult<()> {
        let mut handle = self.borrow(name, BorrowRequest::new()).await?;
        let ping = match handle.connection() {
            Ok(conn) => conn.ping().await,
            Err(e) => Err(e),
        };
        let released = handle.release().await;
        ping?;
        released?;
        info!(pool = %name, "Pool validated");
        Ok(())
    }

    pub async fn pool_stats(&self) -> Vec<PoolStats> {
        self.registry.stats().await
    }

    /// Connections ever requested through this engine. Never decreases.
    pub fn total_requested_connection_count(&self) -> u64 {
        self.usage.total_requested_count()
    }

    /// Snapshot for a later [`UsageAccountant::verify_balanced`].
    pub fn usage_mark(&self) -> UsageMark {
        self.usage.mark()
    }

    /// Stop the transaction factory and close every self-managed pool.
    pub async fn shutdown(&self) {
        self.transactions.stop().await;
        let outstanding = self.usage.outstanding_count();
        if outstanding > 0 {
            warn!(outstanding = outstanding, "Shutting down with connections still borrowed");
        }
        self.registry.close_all().await;
        info!("Pool engine shut down");
    }
}

impl std::fmt::Debug for PoolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEngine")
            .field("environment", &self.detector.peek())
            .field("transactions", &self.transactions)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PoolEngine`]. Every collaborator has a default.
#[derive(Default)]
pub struct PoolEngineBuilder {
    detector: Option<EnvironmentDetector>,
    connector: Option<Arc<dyn PoolConnector>>,
    directory: Option<Arc<dyn ResourceProvider>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    usage: Option<Arc<UsageAccountant>>,
    definitions: Vec<PoolDefinition>,
}

impl PoolEngineBuilder {
    /// Defaults to [`EnvironmentDetector::from_env`].
    pub fn detector(mut self, detector: EnvironmentDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Defaults to [`SqlxConnector`].
    pub fn connector(mut self, connector: Arc<dyn PoolConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Defaults to an empty [`ContainerDirectory`].
    pub fn directory(mut self, directory: Arc<dyn ResourceProvider>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Without one, transaction requests answer `Unsupported`.
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    pub fn usage(mut self, usage: Arc<UsageAccountant>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn pool(mut self, definition: PoolDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn build(self) -> PoolEngine {
        let definitions = self
            .definitions
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        PoolEngine {
            detector: self.detector.unwrap_or_else(EnvironmentDetector::from_env),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(SqlxConnector::new())),
            directory: self
                .directory
                .unwrap_or_else(|| Arc::new(ContainerDirectory::new())),
            definitions: RwLock::new(definitions),
            registry: PoolRegistry::new(),
            usage: self.usage.unwrap_or_default(),
            transactions: Arc::new(TransactionFactory::with_manager(self.transaction_manager)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrow_request_builder() {
        let request = BorrowRequest::new()
            .with_autocommit(false)
            .with_credentials(Credentials::new("app", "secret"));
        assert_eq!(request.autocommit, Some(false));
        assert!(request.transaction.is_none());
        assert_eq!(request.credentials.unwrap().user, "app");
    }

    #[tokio::test]
    async fn test_fixed_environment_drives_strategy() {
        let engine = PoolEngine::builder()
            .detector(EnvironmentDetector::fixed(EnvironmentKind::Tomcat))
            .build();
        assert_eq!(engine.environment(), EnvironmentKind::Tomcat);
        assert!(!engine.strategy().is_self_managed());
        assert_eq!(engine.lookup_name("jdbc/APPDB"), "java:comp/env/jdbc/APPDB");
    }

    #[tokio::test]
    async fn test_undefined_self_managed_pool_is_not_found() {
        let engine = PoolEngine::builder()
            .detector(EnvironmentDetector::fixed(EnvironmentKind::None))
            .build();
        let err = engine.borrow("APPDB", BorrowRequest::new()).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolNotFound { .. }));
        assert!(err.is_retryable());
        assert_eq!(engine.total_requested_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_define_pool_lists_names() {
        let engine = PoolEngine::builder()
            .detector(EnvironmentDetector::fixed(EnvironmentKind::None))
            .pool(
                PoolDefinition::new("B", "sqlite::memory:", Default::default()).unwrap(),
            )
            .build();
        engine
            .define_pool(PoolDefinition::new("A", "sqlite::memory:", Default::default()).unwrap())
            .await;
        assert_eq!(engine.defined_pools().await, vec!["A", "B"]);
        assert!(engine.definition("A").await.is_some());
    }
}
