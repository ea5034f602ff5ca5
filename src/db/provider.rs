//! Seams to the physical resources the engine drives.
//!
//! - [`PoolConnector`] opens self-managed pools from a [`PoolDefinition`].
//! - [`ResourceProvider`] looks up pools provisioned by the hosting container.
//! - [`PhysicalPool`] / [`PhysicalConnection`] are what both of them hand back.

use crate::error::PoolResult;
use crate::models::{Credentials, IsolationLevel, PoolDefinition};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

/// A physical pool the engine can borrow connections from.
#[async_trait]
pub trait PhysicalPool: Send + Sync {
    /// Borrow a connection, optionally with per-call credentials.
    ///
    /// Implementations that cannot honor `credentials` must fail with
    /// `PoolError::CredentialsUnsupported` instead of falling back to the
    /// default account.
    async fn borrow(
        &self,
        credentials: Option<&Credentials>,
    ) -> PoolResult<Box<dyn PhysicalConnection>>;

    /// Whether `borrow` accepts per-call credentials.
    fn supports_credentials(&self) -> bool {
        false
    }

    /// Close the pool and all idle connections.
    async fn close(&self);
}

/// A borrowed physical connection.
#[async_trait]
pub trait PhysicalConnection: Send {
    /// Current autocommit flag as last set on this connection.
    fn autocommit(&self) -> bool;

    /// Change the autocommit flag.
    async fn set_autocommit(&mut self, autocommit: bool) -> PoolResult<()>;

    /// Commit work done since autocommit was turned off. The connection
    /// stays in manual-commit mode. No-op while autocommit is on.
    async fn commit(&mut self) -> PoolResult<()>;

    /// Discard work done since autocommit was turned off. No-op while
    /// autocommit is on.
    async fn rollback(&mut self) -> PoolResult<()>;

    /// Change the session isolation level.
    async fn set_isolation(&mut self, level: IsolationLevel) -> PoolResult<()>;

    /// Check that the connection is still usable.
    async fn ping(&mut self) -> PoolResult<()>;

    /// Hand the connection back to its pool. Called exactly once.
    async fn close(&mut self) -> PoolResult<()>;

    /// Access the concrete connection type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Opens self-managed pools.
#[async_trait]
pub trait PoolConnector: Send + Sync {
    async fn open(&self, definition: &PoolDefinition) -> PoolResult<Arc<dyn PhysicalPool>>;
}

/// Looks up pools owned by the hosting container.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Look up the resource bound under `lookup_key`.
    ///
    /// An unbound key must yield `PoolError::PoolNotFound`; in managed
    /// environments that is a normal transient state, not a configuration
    /// error.
    async fn lookup(&self, logical_name: &str, lookup_key: &str)
    -> PoolResult<Arc<dyn PhysicalPool>>;
}
