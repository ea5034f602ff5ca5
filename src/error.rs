//! Error types for the pool engine.
//!
//! All failures surface as a small closed set of [`PoolError`] kinds so callers
//! can tell "resource not provisioned yet, try again later" apart from "hard
//! failure" and from "transactional integrity at risk".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool not found: {pool} (lookup key: {lookup_key})")]
    PoolNotFound { pool: String, lookup_key: String },

    #[error("Failed to acquire connection from pool '{pool}': {message}")]
    ConnectionAcquisition {
        pool: String,
        message: String,
        suggestion: String,
    },

    #[error("Pool '{pool}' does not support per-call credentials")]
    CredentialsUnsupported { pool: String },

    #[error("Transaction status unavailable: {message} (transaction: {transaction_id})")]
    TransactionStatus {
        message: String,
        transaction_id: String,
    },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Connection leak detected: {borrowed} borrowed, {returned} returned")]
    LeakDetected { borrowed: u64, returned: u64 },

    #[error("Pool '{pool}' still has {lent} connection(s) lent out")]
    PoolBusy { pool: String, lent: usize },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PoolError {
    /// Create a pool-not-found error.
    pub fn pool_not_found(pool: impl Into<String>, lookup_key: impl Into<String>) -> Self {
        Self::PoolNotFound {
            pool: pool.into(),
            lookup_key: lookup_key.into(),
        }
    }

    /// Create a connection acquisition error with a helpful suggestion.
    pub fn acquisition(
        pool: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ConnectionAcquisition {
            pool: pool.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a credentials-unsupported error.
    pub fn credentials_unsupported(pool: impl Into<String>) -> Self {
        Self::CredentialsUnsupported { pool: pool.into() }
    }

    /// Create a transaction status error.
    pub fn transaction_status(
        message: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self::TransactionStatus {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a leak-detected error.
    pub fn leak_detected(borrowed: u64, returned: u64) -> Self {
        Self::LeakDetected { borrowed, returned }
    }

    /// Create a pool-busy error.
    pub fn pool_busy(pool: impl Into<String>, lent: usize) -> Self {
        Self::PoolBusy {
            pool: pool.into(),
            lent,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Convert a driver failure for `pool` into an acquisition error.
    ///
    /// This is the single place where sqlx errors cross into the engine's
    /// error set.
    pub fn from_driver(pool: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => PoolError::acquisition(
                pool,
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::PoolTimedOut => PoolError::acquisition(
                pool,
                "Timed out waiting for a pooled connection",
                "Increase acquire_timeout or max_connections, or release connections sooner",
            ),
            sqlx::Error::PoolClosed => PoolError::acquisition(
                pool,
                "Connection pool is closed",
                "The pool was destroyed; register it again before borrowing",
            ),
            sqlx::Error::Io(io_err) => PoolError::acquisition(
                pool,
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => PoolError::acquisition(
                pool,
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => PoolError::acquisition(
                pool,
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::Database(db_err) => {
                let message = match db_err.code() {
                    Some(code) => format!("{} (SQLSTATE: {})", db_err.message(), code),
                    None => db_err.message().to_string(),
                };
                PoolError::acquisition(
                    pool,
                    message,
                    "The driver rejected a connection setting; check isolation and autocommit support",
                )
            }
            other => PoolError::acquisition(
                pool,
                format!("Driver error: {}", other),
                "Check database driver configuration",
            ),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionAcquisition { suggestion, .. } => Some(suggestion),
            Self::PoolNotFound { .. } => {
                Some("The resource may not be provisioned yet; retry later")
            }
            Self::CredentialsUnsupported { .. } => {
                Some("Put the credentials in the pool definition instead of the borrow request")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only the "not yet provisioned" case is; acquisition failures are not
    /// retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolNotFound { .. })
    }

    /// Check if this error signals transactional integrity is at risk.
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            Self::TransactionStatus { .. } | Self::Transaction { .. }
        )
    }
}

/// Result type alias for pool engine operations.
pub type PoolResult<T> = Result<T, PoolError>;
