//! Hosted Pool Library
//!
//! Connection pooling that adapts to its hosting environment: it detects the
//! container it runs in, resolves logical pool names to lookup keys, and either
//! owns its pools (standalone) or borrows from pools the container provides.
//! Autocommit is only touched when no transaction owns the connection.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod probe;

pub use config::Config;
pub use db::{BorrowRequest, ConnectionHandle, PoolEngine};
pub use error::{PoolError, PoolResult};
