//! Transaction factory.
//!
//! Issues [`TransactionHandle`]s through an external [`TransactionManager`]
//! and keeps track of them until they reach a terminal state. Deployments
//! without a transaction manager get [`TransactionRequest::Unsupported`]
//! rather than an empty value, so "no explicit transaction support" is never
//! confused with a failed lookup.
//!
//! Only [`TransactionFactory::rollback`] swallows errors. It is usually
//! called while unwinding from another failure and must not mask it.

use crate::error::{PoolError, PoolResult};
use crate::models::{TransactionMetadata, TransactionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// External transaction manager capability.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begin a transaction and return its identifier.
    async fn begin(&self) -> PoolResult<String>;

    /// Current status of a transaction.
    async fn status(&self, transaction_id: &str) -> PoolResult<TransactionStatus>;

    async fn commit(&self, transaction_id: &str) -> PoolResult<()>;

    async fn rollback(&self, transaction_id: &str) -> PoolResult<()>;

    /// Mark a transaction so that its only possible outcome is rollback.
    async fn set_rollback_only(&self, transaction_id: &str) -> PoolResult<()>;
}

struct HandleInner {
    transaction_id: String,
    started_at: DateTime<Utc>,
    created_at: Instant,
    /// Last status observed through the factory.
    status: StdRwLock<TransactionStatus>,
}

/// Handle to one unit of work's transaction.
///
/// Cloning is cheap and meant for passing the handle into borrow requests of
/// the same unit of work, not for sharing it between units of work.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<HandleInner>,
}

impl TransactionHandle {
    fn new(transaction_id: String) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                transaction_id,
                started_at: Utc::now(),
                created_at: Instant::now(),
                status: StdRwLock::new(TransactionStatus::Active),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.transaction_id
    }

    /// Last status observed through the factory, without querying the manager.
    pub fn last_status(&self) -> TransactionStatus {
        self.inner
            .status
            .read()
            .map(|guard| *guard)
            .unwrap_or(TransactionStatus::Unknown)
    }

    fn set_status(&self, status: TransactionStatus) {
        if let Ok(mut guard) = self.inner.status.write() {
            *guard = status;
        }
    }

    fn metadata(&self) -> TransactionMetadata {
        TransactionMetadata {
            transaction_id: self.id().to_string(),
            status: self.last_status(),
            started_at: self.inner.started_at,
            duration_secs: self.inner.created_at.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("transaction_id", &self.inner.transaction_id)
            .field("status", &self.last_status())
            .finish()
    }
}

/// Outcome of [`TransactionFactory::request_transaction`].
#[derive(Debug, Clone)]
pub enum TransactionRequest {
    Started(TransactionHandle),
    /// The deployment has no explicit cross-connection transactions; callers
    /// proceed with per-connection commit semantics.
    Unsupported,
}

impl TransactionRequest {
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    pub fn handle(&self) -> Option<&TransactionHandle> {
        match self {
            Self::Started(handle) => Some(handle),
            Self::Unsupported => None,
        }
    }

    pub fn into_handle(self) -> Option<TransactionHandle> {
        match self {
            Self::Started(handle) => Some(handle),
            Self::Unsupported => None,
        }
    }
}

pub struct TransactionFactory {
    manager: Option<Arc<dyn TransactionManager>>,
    /// Handles issued and not yet seen in a terminal state.
    issued: RwLock<HashMap<String, TransactionHandle>>,
    stopped: AtomicBool,
}

impl TransactionFactory {
    /// Create a factory backed by a transaction manager.
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self::with_manager(Some(manager))
    }

    /// Create a factory for a deployment without transaction support.
    pub fn unsupported() -> Self {
        Self::with_manager(None)
    }

    pub fn with_manager(manager: Option<Arc<dyn TransactionManager>>) -> Self {
        Self {
            manager,
            issued: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn supports_transactions(&self) -> bool {
        self.manager.is_some()
    }

    /// Begin a transaction for a unit of work.
    pub async fn request_transaction(&self) -> PoolResult<TransactionRequest> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PoolError::transaction("Transaction factory is stopped", "-"));
        }
        let Some(manager) = &self.manager else {
            warn!("Explicit transaction requested but no transaction manager is configured");
            return Ok(TransactionRequest::Unsupported);
        };

        let transaction_id = manager.begin().await?;
        let handle = TransactionHandle::new(transaction_id.clone());
        {
            let mut issued = self.issued.write().await;
            issued.insert(transaction_id, handle.clone());
        }
        Ok(TransactionRequest::Started(handle))
    }

    /// Query the manager for the handle's status and remember it.
    ///
    /// Terminal states are final and are answered from the handle.
    pub async fn status(&self, handle: &TransactionHandle) -> PoolResult<TransactionStatus> {
        let cached = handle.last_status();
        if cached.is_terminal() {
            return Ok(cached);
        }
        let Some(manager) = &self.manager else {
            return Err(PoolError::transaction_status(
                "No transaction manager configured",
                handle.id(),
            ));
        };

        let status = manager.status(handle.id()).await.map_err(|e| match e {
            PoolError::TransactionStatus { .. } => e,
            other => PoolError::transaction_status(other.to_string(), handle.id()),
        })?;

        handle.set_status(status);
        if status.is_terminal() {
            self.forget(handle).await;
        }
        Ok(status)
    }

    /// True for every status other than no-transaction, committed and
    /// rolled-back. `None` is never in progress.
    pub async fn is_transaction_in_progress(
        &self,
        handle: Option<&TransactionHandle>,
    ) -> PoolResult<bool> {
        match handle {
            None => Ok(false),
            Some(handle) => Ok(self.status(handle).await?.is_in_progress()),
        }
    }

    /// Commit the handle's transaction.
    pub async fn commit(&self, handle: &TransactionHandle) -> PoolResult<()> {
        let manager = self.manager_for(handle)?;
        match manager.commit(handle.id()).await {
            Ok(()) => {
                handle.set_status(TransactionStatus::Committed);
                self.forget(handle).await;
                Ok(())
            }
            Err(e) => {
                // Refresh so the handle reflects what the manager did.
                let refreshed = manager
                    .status(handle.id())
                    .await
                    .unwrap_or(TransactionStatus::Unknown);
                let status = if refreshed == TransactionStatus::NoTransaction {
                    TransactionStatus::RolledBack
                } else {
                    refreshed
                };
                handle.set_status(status);
                if status.is_terminal() {
                    self.forget(handle).await;
                }
                Err(match e {
                    PoolError::Transaction { .. } => e,
                    other => PoolError::transaction(other.to_string(), handle.id()),
                })
            }
        }
    }

    /// Mark the handle's transaction rollback-only.
    pub async fn set_rollback_only(&self, handle: &TransactionHandle) -> PoolResult<()> {
        let manager = self.manager_for(handle)?;
        manager.set_rollback_only(handle.id()).await?;
        handle.set_status(TransactionStatus::MarkedRollback);
        Ok(())
    }

    /// Roll back without ever failing.
    ///
    /// Accepts `None` and handles that already ended; any manager failure is
    /// logged and control returns to the caller.
    pub async fn rollback(&self, handle: Option<&TransactionHandle>) {
        let Some(handle) = handle else {
            debug!("Rollback requested without a transaction");
            return;
        };
        let status = handle.last_status();
        if status.is_terminal() {
            debug!(
                transaction_id = %handle.id(),
                status = %status,
                "Rollback skipped, transaction already ended"
            );
            return;
        }
        let Some(manager) = &self.manager else {
            warn!(transaction_id = %handle.id(), "Rollback requested but no transaction manager is configured");
            return;
        };

        match manager.rollback(handle.id()).await {
            Ok(()) => handle.set_status(TransactionStatus::RolledBack),
            Err(e) => {
                warn!(
                    transaction_id = %handle.id(),
                    error = %e,
                    "Rollback failed"
                );
                let refreshed = manager
                    .status(handle.id())
                    .await
                    .unwrap_or(TransactionStatus::Unknown);
                handle.set_status(refreshed);
            }
        }
        if handle.last_status().is_terminal() {
            self.forget(handle).await;
        }
    }

    /// Fail if the handle's transaction has not reached a terminal state.
    ///
    /// Call at the end of a unit of work; an open transaction there is a
    /// defect.
    pub async fn verify_completed(&self, handle: &TransactionHandle) -> PoolResult<()> {
        let status = self.status(handle).await?;
        if status.is_in_progress() {
            warn!(
                transaction_id = %handle.id(),
                status = %status,
                "Unit of work ended with an open transaction"
            );
            return Err(PoolError::transaction_status(
                format!("Transaction still {} at end of unit of work", status),
                handle.id(),
            ));
        }
        Ok(())
    }

    /// List transactions issued and not yet seen in a terminal state.
    pub async fn open_transactions(&self) -> Vec<TransactionMetadata> {
        let issued = self.issued.read().await;
        issued.values().map(TransactionHandle::metadata).collect()
    }

    /// Restore the initial state: forget every issued handle and accept new
    /// requests again.
    pub async fn reset(&self) {
        let mut issued = self.issued.write().await;
        if !issued.is_empty() {
            debug!(count = issued.len(), "Forgetting issued transactions on reset");
        }
        issued.clear();
        self.stopped.store(false, Ordering::Release);
    }

    /// Stop the factory. Idempotent.
    ///
    /// Transactions still open are defects; each is logged and rolled back.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let open: Vec<TransactionHandle> = {
            let mut issued = self.issued.write().await;
            issued.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &open {
            warn!(
                transaction_id = %handle.id(),
                status = %handle.last_status(),
                "Transaction still open at stop, rolling back"
            );
            self.rollback(Some(handle)).await;
        }
        info!(rolled_back = open.len(), "Transaction factory stopped");
    }

    fn manager_for(&self, handle: &TransactionHandle) -> PoolResult<&Arc<dyn TransactionManager>> {
        self.manager.as_ref().ok_or_else(|| {
            PoolError::transaction("No transaction manager configured", handle.id())
        })
    }

    async fn forget(&self, handle: &TransactionHandle) {
        let mut issued = self.issued.write().await;
        issued.remove(handle.id());
    }
}

impl std::fmt::Debug for TransactionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFactory")
            .field("supports_transactions", &self.supports_transactions())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
