//! Transaction-related data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status reported by the transaction manager for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    NoTransaction,
    Active,
    /// Still open, but can only end in a rollback.
    MarkedRollback,
    Committed,
    RolledBack,
    /// The manager could not tell; treated as in progress.
    Unknown,
}

impl TransactionStatus {
    /// Check if the transaction has reached a state where its unit of work may
    /// complete.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoTransaction | Self::Committed | Self::RolledBack
        )
    }

    /// Anything that is not terminal counts as in progress, including
    /// `Unknown`.
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoTransaction => "no_transaction",
            Self::Active => "active",
            Self::MarkedRollback => "marked_rollback",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Metadata about a transaction issued by the factory (for listing without
/// consuming).
#[derive(Debug, Clone, Serialize)]
pub struct TransactionMetadata {
    /// Unique transaction identifier
    pub transaction_id: String,
    /// Last status observed by the factory
    pub status: TransactionStatus,
    /// When the transaction was issued
    pub started_at: DateTime<Utc>,
    /// Seconds since the transaction was issued
    pub duration_secs: u64,
}
