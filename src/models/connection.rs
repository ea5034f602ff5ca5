//! Connection-related data models.
//!
//! This module defines the pool definition supplied by configuration and the
//! small value types attached to it (driver kind, isolation level, credentials).

use crate::config::PoolOptions;
use serde::{Deserialize, Serialize};
use url::Url;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Transaction isolation level requested for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Parse an isolation level name, accepting `read_committed`,
    /// `READ-COMMITTED` and `read committed` spellings.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "read_uncommitted" => Some(Self::ReadUncommitted),
            "read_committed" => Some(Self::ReadCommitted),
            "repeatable_read" => Some(Self::RepeatableRead),
            "serializable" => Some(Self::Serializable),
            _ => None,
        }
    }

    /// SQL spelling used in `SET ... ISOLATION LEVEL` statements.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// User/password pair. The password is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// Definition of a logical pool, supplied by configuration at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDefinition {
    /// Logical pool name used by callers.
    pub name: String,
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// User taken from the URL userinfo, if any.
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Isolation level applied to self-managed connections on borrow.
    pub isolation: Option<IsolationLevel>,
    /// Autocommit value applied on borrow when the request does not override it.
    pub autocommit: Option<bool>,
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl PoolDefinition {
    /// Create a new pool definition.
    ///
    /// The driver is detected from the URL scheme and credentials are taken
    /// from the URL userinfo.
    pub fn new(
        name: impl Into<String>,
        connection_string: impl Into<String>,
        pool_options: PoolOptions,
    ) -> Result<Self, PoolDefinitionError> {
        let name = name.into();
        let connection_string = connection_string.into();

        if name.is_empty() {
            return Err(PoolDefinitionError::EmptyName);
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        {
            return Err(PoolDefinitionError::InvalidName(name));
        }

        let db_type = DatabaseType::from_connection_string(&connection_string)
            .ok_or_else(|| PoolDefinitionError::UnknownDatabaseType(connection_string.clone()))?;

        let (user, password) = match Url::parse(&connection_string) {
            Ok(url) if !url.username().is_empty() => (
                Some(percent_decode(url.username())),
                url.password().map(percent_decode),
            ),
            _ => (None, None),
        };

        Ok(Self {
            name,
            db_type,
            connection_string,
            user,
            password,
            isolation: None,
            autocommit: None,
            pool_options,
        })
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = Some(autocommit);
        self
    }

    /// Credentials from the definition, if a user was configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.user.as_ref().map(|user| {
            Credentials::new(user.clone(), self.password.clone().unwrap_or_default())
        })
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        if let Some(at_pos) = self.connection_string.find('@') {
            if let Some(colon_pos) = self.connection_string[..at_pos].rfind(':') {
                let prefix = &self.connection_string[..colon_pos + 1];
                let suffix = &self.connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.connection_string.clone()
    }
}

/// Decode URL userinfo. `+` is literal in userinfo, unlike form encoding.
fn percent_decode(s: &str) -> String {
    let encoded = format!("v={}", s.replace('+', "%2B"));
    url::form_urlencoded::parse(encoded.as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| s.to_string())
}

/// Errors that can occur when creating a pool definition.
#[derive(Debug, thiserror::Error)]
pub enum PoolDefinitionError {
    /// Pool name is empty
    #[error("Pool name cannot be empty")]
    EmptyName,

    /// Pool name contains invalid characters
    #[error("Pool name contains invalid characters: {0}")]
    InvalidName(String),

    /// Could not determine database type from connection string
    #[error("Unknown database type in connection string: {0}")]
    UnknownDatabaseType(String),
}

impl From<PoolDefinitionError> for crate::error::PoolError {
    fn from(err: PoolDefinitionError) -> Self {
        crate::error::PoolError::invalid_config(err.to_string())
    }
}
