//! Pool engine internals.
//!
//! - Environment detection and lookup-key naming
//! - Self-managed (sqlx) and container-provided pools behind one registry
//! - Borrow/release with the autocommit guard
//! - Transaction factory and the in-process transaction manager
//! - Connection usage accounting

pub mod accounting;
pub mod directory;
pub mod engine;
pub mod environment;
pub mod local_tm;
pub mod naming;
pub mod provider;
pub mod registry;
pub mod sqlx_pool;
pub mod transaction;

pub use accounting::{UsageAccountant, UsageMark};
pub use directory::ContainerDirectory;
pub use engine::{BorrowRequest, ConnectionHandle, PoolEngine, PoolEngineBuilder};
pub use environment::{EnvIntrospector, EnvironmentDetector, HostIntrospector};
pub use local_tm::{CLEANUP_INTERVAL_SECS, LocalTransactionManager};
pub use naming::resolve_lookup_name;
pub use provider::{PhysicalConnection, PhysicalPool, PoolConnector, ResourceProvider};
pub use registry::{PoolEntry, PoolRegistry, PoolStats};
pub use sqlx_pool::{DbConnection, DbPool, SqlxConnection, SqlxConnector, SqlxPool};
pub use transaction::{
    TransactionFactory, TransactionHandle, TransactionManager, TransactionRequest,
};
