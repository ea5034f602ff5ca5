//! In-process transaction manager.
//!
//! Tracks the status of transactions begun through it. It coordinates
//! nothing by itself: connections taking part in a unit of work are told
//! about the transaction through the engine's autocommit guard. Transactions
//! older than the configured timeout are reported as rollback-only until the
//! cleanup pass rolls them back and drops them. A rolled-back id is
//! remembered for one more timeout period so its owner can still learn what
//! happened to it.

use crate::db::transaction::TransactionManager;
use crate::error::{PoolError, PoolResult};
use crate::models::TransactionStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default transaction timeout in seconds.
pub const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 60;

/// Maximum transaction timeout in seconds.
pub const MAX_TRANSACTION_TIMEOUT_SECS: u64 = 3600;

/// Interval for the background cleanup of expired transactions.
pub const CLEANUP_INTERVAL_SECS: u64 = 30;

struct LocalTransaction {
    status: TransactionStatus,
    created_at: Instant,
}

#[derive(Clone)]
pub struct LocalTransactionManager {
    transactions: Arc<RwLock<HashMap<String, LocalTransaction>>>,
    /// Ids rolled back by the cleanup pass, with the time they were dropped.
    expired: Arc<RwLock<HashMap<String, Instant>>>,
    timeout: Duration,
}

impl LocalTransactionManager {
    /// Create a manager with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TRANSACTION_TIMEOUT_SECS))
    }

    /// Create a manager with a custom timeout, capped at
    /// [`MAX_TRANSACTION_TIMEOUT_SECS`].
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            transactions: Arc::new(RwLock::new(HashMap::new())),
            expired: Arc::new(RwLock::new(HashMap::new())),
            timeout: timeout.min(Duration::from_secs(MAX_TRANSACTION_TIMEOUT_SECS)),
        }
    }

    /// Get the number of open transactions.
    pub async fn count(&self) -> usize {
        let txs = self.transactions.read().await;
        txs.len()
    }

    fn is_expired(&self, tx: &LocalTransaction) -> bool {
        tx.created_at.elapsed() > self.timeout
    }

    /// Roll back and drop every transaction past its timeout. Returns how
    /// many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut txs = self.transactions.write().await;
        // Taken before the entries go, so no status query sees a gap.
        let mut expired = self.expired.write().await;

        let now = Instant::now();
        expired.retain(|_, dropped_at| now.saturating_duration_since(*dropped_at) <= self.timeout);

        let expired_ids: Vec<String> = txs
            .iter()
            .filter(|(_, tx)| self.is_expired(tx))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired_ids {
            txs.remove(id);
            warn!(transaction_id = %id, "Rolling back expired transaction");
            expired.insert(id.clone(), now);
        }
        expired_ids.len()
    }

    /// Start a background task that runs [`cleanup_expired`](Self::cleanup_expired)
    /// every `interval`.
    pub fn start_cleanup_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.cleanup_expired().await;
            }
        })
    }

    /// Forget a tombstone, reporting whether there was one.
    async fn take_expired(&self, transaction_id: &str) -> bool {
        let mut expired = self.expired.write().await;
        expired.remove(transaction_id).is_some()
    }

    fn effective_status(&self, tx: &LocalTransaction) -> TransactionStatus {
        if tx.status == TransactionStatus::Active && self.is_expired(tx) {
            TransactionStatus::MarkedRollback
        } else {
            tx.status
        }
    }
}

impl Default for LocalTransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalTransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransactionManager")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionManager for LocalTransactionManager {
    async fn begin(&self) -> PoolResult<String> {
        let transaction_id = generate_transaction_id();
        {
            let mut txs = self.transactions.write().await;
            txs.insert(
                transaction_id.clone(),
                LocalTransaction {
                    status: TransactionStatus::Active,
                    created_at: Instant::now(),
                },
            );
        }
        info!(
            transaction_id = %transaction_id,
            timeout_secs = self.timeout.as_secs(),
            "Transaction started"
        );
        Ok(transaction_id)
    }

    async fn status(&self, transaction_id: &str) -> PoolResult<TransactionStatus> {
        {
            let txs = self.transactions.read().await;
            if let Some(tx) = txs.get(transaction_id) {
                return Ok(self.effective_status(tx));
            }
        }
        let expired = self.expired.read().await;
        if expired.contains_key(transaction_id) {
            Ok(TransactionStatus::RolledBack)
        } else {
            Ok(TransactionStatus::NoTransaction)
        }
    }

    async fn commit(&self, transaction_id: &str) -> PoolResult<()> {
        let removed = {
            let mut txs = self.transactions.write().await;
            txs.remove(transaction_id)
        };
        let Some(tx) = removed else {
            if self.take_expired(transaction_id).await {
                return Err(PoolError::transaction(
                    "Transaction timed out and has been rolled back",
                    transaction_id,
                ));
            }
            return Err(PoolError::transaction("Transaction not found", transaction_id));
        };

        match self.effective_status(&tx) {
            TransactionStatus::Active => {
                info!(transaction_id = %transaction_id, "Transaction committed");
                Ok(())
            }
            status => {
                warn!(
                    transaction_id = %transaction_id,
                    status = %status,
                    "Commit refused, transaction rolled back"
                );
                Err(PoolError::transaction(
                    format!("Transaction was {} and has been rolled back", status),
                    transaction_id,
                ))
            }
        }
    }

    async fn rollback(&self, transaction_id: &str) -> PoolResult<()> {
        let removed = {
            let mut txs = self.transactions.write().await;
            txs.remove(transaction_id).is_some()
        };
        if removed {
            info!(transaction_id = %transaction_id, "Transaction rolled back");
            return Ok(());
        }
        if self.take_expired(transaction_id).await {
            debug!(transaction_id = %transaction_id, "Transaction already rolled back after timeout");
            return Ok(());
        }
        Err(PoolError::transaction("Transaction not found", transaction_id))
    }

    async fn set_rollback_only(&self, transaction_id: &str) -> PoolResult<()> {
        let mut txs = self.transactions.write().await;
        let tx = txs
            .get_mut(transaction_id)
            .ok_or_else(|| PoolError::transaction("Transaction not found", transaction_id))?;
        tx.status = TransactionStatus::MarkedRollback;
        debug!(transaction_id = %transaction_id, "Transaction marked rollback-only");
        Ok(())
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
