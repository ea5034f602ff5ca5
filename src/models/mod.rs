//! Data models for the pool engine.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod environment;
pub mod transaction;

// Re-export commonly used types
pub use connection::{
    Credentials, DatabaseType, IsolationLevel, PoolDefinition, PoolDefinitionError,
};
pub use environment::{EnvironmentKind, HOST_PROFILES, HostProfile, HostStrategy, PoolOwnership};
pub use transaction::{TransactionMetadata, TransactionStatus};
