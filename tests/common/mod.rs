//! Recording test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hosted_pool::db::{
    HostIntrospector, PhysicalConnection, PhysicalPool, PoolConnector, TransactionManager,
};
use hosted_pool::error::{PoolError, PoolResult};
use hosted_pool::models::{Credentials, IsolationLevel, PoolDefinition, TransactionStatus};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Calls made against fake connections.
#[derive(Debug, Default)]
pub struct CallLog {
    pub autocommit_calls: Mutex<Vec<bool>>,
    pub isolation_calls: Mutex<Vec<IsolationLevel>>,
    pub borrows: AtomicUsize,
    pub closes: AtomicUsize,
    pub pings: AtomicUsize,
    /// Commits and rollbacks made while autocommit was off.
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub credentials_seen: Mutex<Vec<Credentials>>,
}

impl CallLog {
    pub fn autocommit_calls(&self) -> Vec<bool> {
        self.autocommit_calls.lock().unwrap().clone()
    }

    pub fn isolation_calls(&self) -> Vec<IsolationLevel> {
        self.isolation_calls.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn borrows(&self) -> usize {
        self.borrows.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

pub struct FakePool {
    pub log: Arc<CallLog>,
    pub supports_credentials: bool,
    pub closed: AtomicBool,
}

impl FakePool {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            supports_credentials: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_credentials(log: Arc<CallLog>) -> Self {
        Self {
            supports_credentials: true,
            ..Self::new(log)
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhysicalPool for FakePool {
    async fn borrow(
        &self,
        credentials: Option<&Credentials>,
    ) -> PoolResult<Box<dyn PhysicalConnection>> {
        if self.is_closed() {
            return Err(PoolError::acquisition("fake", "pool closed", "recreate it"));
        }
        if let Some(credentials) = credentials {
            self.log
                .credentials_seen
                .lock()
                .unwrap()
                .push(credentials.clone());
        }
        self.log.borrows.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            log: Arc::clone(&self.log),
            autocommit: true,
        }))
    }

    fn supports_credentials(&self) -> bool {
        self.supports_credentials
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeConnection {
    log: Arc<CallLog>,
    autocommit: bool,
}

#[async_trait]
impl PhysicalConnection for FakeConnection {
    fn autocommit(&self) -> bool {
        self.autocommit
    }

    async fn set_autocommit(&mut self, autocommit: bool) -> PoolResult<()> {
        self.log.autocommit_calls.lock().unwrap().push(autocommit);
        self.autocommit = autocommit;
        Ok(())
    }

    async fn commit(&mut self) -> PoolResult<()> {
        if !self.autocommit {
            self.log.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> PoolResult<()> {
        if !self.autocommit {
            self.log.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn set_isolation(&mut self, level: IsolationLevel) -> PoolResult<()> {
        self.log.isolation_calls.lock().unwrap().push(level);
        Ok(())
    }

    async fn ping(&mut self) -> PoolResult<()> {
        self.log.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> PoolResult<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Opens [`FakePool`]s and counts how often it was asked to.
pub struct CountingConnector {
    pub log: Arc<CallLog>,
    pub opens: AtomicUsize,
    pub pools: Mutex<Vec<Arc<FakePool>>>,
    /// Widens the window in which concurrent first borrows overlap.
    pub delay: Duration,
}

impl CountingConnector {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            opens: AtomicUsize::new(0),
            pools: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(log: Arc<CallLog>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(log)
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_pool(&self) -> Option<Arc<FakePool>> {
        self.pools.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PoolConnector for CountingConnector {
    async fn open(&self, _definition: &PoolDefinition) -> PoolResult<Arc<dyn PhysicalPool>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let pool = Arc::new(FakePool::new(Arc::clone(&self.log)));
        self.pools.lock().unwrap().push(Arc::clone(&pool));
        Ok(pool)
    }
}

/// Transaction manager whose answers are set by the test.
pub struct ScriptedTransactionManager {
    pub status: Mutex<TransactionStatus>,
    pub fail_status: AtomicBool,
    pub status_queries: AtomicUsize,
    pub rollbacks: AtomicUsize,
    next_id: AtomicUsize,
}

impl ScriptedTransactionManager {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            fail_status: AtomicBool::new(false),
            status_queries: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn failing() -> Self {
        let manager = Self::new(TransactionStatus::Active);
        manager.fail_status.store(true, Ordering::SeqCst);
        manager
    }

    pub fn set_status(&self, status: TransactionStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl TransactionManager for ScriptedTransactionManager {
    async fn begin(&self) -> PoolResult<String> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("tx_scripted_{n}"))
    }

    async fn status(&self, transaction_id: &str) -> PoolResult<TransactionStatus> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(PoolError::internal(format!(
                "status unavailable for {transaction_id}"
            )));
        }
        Ok(*self.status.lock().unwrap())
    }

    async fn commit(&self, _transaction_id: &str) -> PoolResult<()> {
        self.set_status(TransactionStatus::Committed);
        Ok(())
    }

    async fn rollback(&self, transaction_id: &str) -> PoolResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        let status = *self.status.lock().unwrap();
        if status == TransactionStatus::NoTransaction {
            return Err(PoolError::transaction("no transaction to roll back", transaction_id));
        }
        self.set_status(TransactionStatus::RolledBack);
        Ok(())
    }

    async fn set_rollback_only(&self, _transaction_id: &str) -> PoolResult<()> {
        self.set_status(TransactionStatus::MarkedRollback);
        Ok(())
    }
}

/// Introspector returning fixed loader identifiers.
pub struct FixedIntrospector {
    pub loader: Option<String>,
    pub parent: Option<String>,
}

impl FixedIntrospector {
    pub fn new(loader: Option<&str>, parent: Option<&str>) -> Self {
        Self {
            loader: loader.map(String::from),
            parent: parent.map(String::from),
        }
    }
}

impl HostIntrospector for FixedIntrospector {
    fn loader_name(&self) -> Option<String> {
        self.loader.clone()
    }

    fn parent_loader_name(&self) -> Option<String> {
        self.parent.clone()
    }
}

/// Definition for a self-managed pool; the fake connector ignores the URL.
pub fn definition(name: &str) -> PoolDefinition {
    PoolDefinition::new(name, "sqlite::memory:", Default::default()).unwrap()
}
