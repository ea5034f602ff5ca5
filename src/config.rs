//! Configuration handling for the hosted-pool probe.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::db::environment::{
    DEFAULT_LOADER_VAR, DEFAULT_PARENT_LOADER_VAR, EnvIntrospector, EnvironmentDetector,
};
use crate::models::{EnvironmentKind, IsolationLevel, PoolDefinition};
use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ROUNDS: u32 = 10;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 60;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration options parsed from the pool URL.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Pool definition parsed from a `--pool` argument.
pub struct PoolSpec;

impl PoolSpec {
    /// Option keys extracted from URL query parameters before the URL reaches
    /// the driver.
    const OPTION_KEYS: &'static [&'static str] = &[
        "isolation",
        "autocommit",
        "max_connections",
        "min_connections",
        "idle_timeout",
        "acquire_timeout",
        "test_before_acquire",
    ];

    /// Parse a pool definition.
    ///
    /// # Format
    ///
    /// ```text
    /// APPDB=postgres://app:secret@db:5432/app?isolation=read_committed&autocommit=false
    /// sqlite:./data/orders.db?max_connections=1        # named "orders"
    /// ```
    ///
    /// The name defaults to the database name from the URL path.
    pub fn parse(s: &str) -> Result<PoolDefinition, String> {
        // Split name=url format (only if '=' before the scheme separator)
        let scheme_pos = s.find(':').unwrap_or(s.len());
        let (explicit_name, url_str) = match s[..scheme_pos].find('=') {
            Some(idx) => (Some(s[..idx].trim()), &s[idx + 1..]),
            None => (None, s),
        };

        let mut url = Url::parse(url_str).map_err(|e| format!("Invalid URL: {e}"))?;
        let mut opts = Self::extract_options(&mut url, Self::OPTION_KEYS);

        let isolation = match opts.remove("isolation") {
            Some(v) => Some(
                IsolationLevel::parse(&v)
                    .ok_or_else(|| format!("Unknown isolation level: {v}"))?,
            ),
            None => None,
        };
        let autocommit = match opts.remove("autocommit") {
            Some(v) => Some(
                parse_bool(&v).ok_or_else(|| format!("autocommit must be true or false, got: {v}"))?,
            ),
            None => None,
        };

        let pool_options = Self::parse_pool_options(&mut opts);
        pool_options.validate()?;

        let name = explicit_name
            .map(String::from)
            .or_else(|| Self::db_name(&url))
            .ok_or_else(|| {
                format!("Pool name missing; use NAME=URL for {}", url.scheme())
            })?;

        let mut definition =
            PoolDefinition::new(name, url.to_string(), pool_options).map_err(|e| e.to_string())?;
        if let Some(isolation) = isolation {
            definition = definition.with_isolation(isolation);
        }
        if let Some(autocommit) = autocommit {
            definition = definition.with_autocommit(autocommit);
        }
        Ok(definition)
    }

    fn parse_pool_options(opts: &mut HashMap<String, String>) -> PoolOptions {
        PoolOptions {
            max_connections: opts.remove("max_connections").and_then(|v| v.parse().ok()),
            min_connections: opts.remove("min_connections").and_then(|v| v.parse().ok()),
            idle_timeout_secs: opts.remove("idle_timeout").and_then(|v| v.parse().ok()),
            acquire_timeout_secs: opts.remove("acquire_timeout").and_then(|v| v.parse().ok()),
            // Invalid value ignored
            test_before_acquire: opts
                .remove("test_before_acquire")
                .and_then(|v| parse_bool(&v)),
        }
    }

    /// Extract our options from URL query params, keeping others for the driver.
    fn extract_options(url: &mut Url, keys: &[&str]) -> HashMap<String, String> {
        let mut opts = HashMap::new();
        let remaining: Vec<(String, String)> = url
            .query_pairs()
            .filter_map(|(k, v)| {
                let key_lower = k.to_ascii_lowercase();
                if keys.contains(&key_lower.as_str()) {
                    opts.insert(key_lower, v.into_owned());
                    None
                } else {
                    Some((k.into_owned(), v.into_owned()))
                }
            })
            .collect();

        if remaining.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(remaining);
        }
        opts
    }

    fn db_name(url: &Url) -> Option<String> {
        url.path()
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.starts_with(':'))
            .map(|s| s.trim_end_matches(".sqlite").trim_end_matches(".db"))
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    if v.eq_ignore_ascii_case("true") {
        Some(true)
    } else if v.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Hosting environment selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum HostChoice {
    /// Detect from the published loader identifiers
    #[default]
    Auto,
    /// Standalone; pools are self-managed
    None,
    Tomcat,
    Jetty,
    Jboss,
    Weblogic,
    Websphere,
    Glassfish,
}

impl HostChoice {
    /// The fixed environment, or `None` for auto-detection.
    pub fn fixed_kind(&self) -> Option<EnvironmentKind> {
        match self {
            Self::Auto => None,
            Self::None => Some(EnvironmentKind::None),
            Self::Tomcat => Some(EnvironmentKind::Tomcat),
            Self::Jetty => Some(EnvironmentKind::Jetty),
            Self::Jboss => Some(EnvironmentKind::JBoss),
            Self::Weblogic => Some(EnvironmentKind::WebLogic),
            Self::Websphere => Some(EnvironmentKind::WebSphere),
            Self::Glassfish => Some(EnvironmentKind::GlassFish),
        }
    }
}

/// Configuration for the hosted-pool probe.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "hosted-pool",
    about = "Detects the hosting environment and exercises the configured connection pools",
    version,
    author
)]
pub struct Config {
    /// Pool definitions. Format: "NAME=URL" or "URL" (named after the database).
    /// Add ?isolation=read_committed or ?autocommit=false to set connection defaults.
    /// Can be specified multiple times.
    #[arg(
        short = 'p',
        long = "pool",
        value_name = "NAME=URL",
        env = "HOSTED_POOL_POOLS",
        value_delimiter = ','
    )]
    pub pools: Vec<String>,

    /// Hosting environment (auto detects it)
    #[arg(long, value_enum, default_value = "auto", env = "HOSTED_POOL_HOST")]
    pub host: HostChoice,

    /// Environment variable holding the host loader identifier
    #[arg(long, default_value = DEFAULT_LOADER_VAR)]
    pub loader_var: String,

    /// Environment variable holding the parent loader identifier
    #[arg(long, default_value = DEFAULT_PARENT_LOADER_VAR)]
    pub parent_loader_var: String,

    /// Borrow/release rounds per pool
    #[arg(long, default_value_t = DEFAULT_ROUNDS, env = "HOSTED_POOL_ROUNDS")]
    pub rounds: u32,

    /// Concurrent borrowers per round
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "HOSTED_POOL_CONCURRENCY")]
    pub concurrency: usize,

    /// Transaction timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_TRANSACTION_TIMEOUT_SECS,
        env = "HOSTED_POOL_TRANSACTION_TIMEOUT"
    )]
    pub transaction_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "HOSTED_POOL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "HOSTED_POOL_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            pools: Vec::new(),
            host: HostChoice::Auto,
            loader_var: DEFAULT_LOADER_VAR.to_string(),
            parent_loader_var: DEFAULT_PARENT_LOADER_VAR.to_string(),
            rounds: DEFAULT_ROUNDS,
            concurrency: DEFAULT_CONCURRENCY,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Parse all pool definitions. Names must be unique.
    pub fn parse_pools(&self) -> Result<Vec<PoolDefinition>, String> {
        let definitions = self
            .pools
            .iter()
            .map(|s| PoolSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = std::collections::HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.name.as_str()) {
                return Err(format!("Duplicate pool name: {}", definition.name));
            }
        }
        Ok(definitions)
    }

    /// Build the environment detector for the configured host choice.
    pub fn detector(&self) -> EnvironmentDetector {
        match self.host.fixed_kind() {
            Some(kind) => EnvironmentDetector::fixed(kind),
            None => EnvironmentDetector::new(EnvIntrospector::new(
                self.loader_var.clone(),
                self.parent_loader_var.clone(),
            )),
        }
    }

    pub fn transaction_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
