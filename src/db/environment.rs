//! Hosting environment detection.
//!
//! The hosting runtime publishes identifiers for the loader that started this
//! process and for its parent. Detection searches those identifiers for the
//! signatures in [`HOST_PROFILES`] and caches the answer for the lifetime of
//! the detector, since the hosting environment cannot change mid-process.

use crate::models::{EnvironmentKind, HOST_PROFILES};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Environment variable holding the identifier of the loader that started us.
pub const DEFAULT_LOADER_VAR: &str = "HOSTED_POOL_LOADER";

/// Environment variable holding the identifier of the parent loader.
pub const DEFAULT_PARENT_LOADER_VAR: &str = "HOSTED_POOL_PARENT_LOADER";

/// Source of host loader identifiers.
pub trait HostIntrospector: Send + Sync {
    /// Identifier of the loader that started the process, if published.
    fn loader_name(&self) -> Option<String>;

    /// Identifier of the parent loader, if published.
    fn parent_loader_name(&self) -> Option<String>;
}

/// Reads loader identifiers from process environment variables.
#[derive(Debug, Clone)]
pub struct EnvIntrospector {
    loader_var: String,
    parent_loader_var: String,
}

impl EnvIntrospector {
    pub fn new(loader_var: impl Into<String>, parent_loader_var: impl Into<String>) -> Self {
        Self {
            loader_var: loader_var.into(),
            parent_loader_var: parent_loader_var.into(),
        }
    }

    fn read(var: &str) -> Option<String> {
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

impl Default for EnvIntrospector {
    fn default() -> Self {
        Self::new(DEFAULT_LOADER_VAR, DEFAULT_PARENT_LOADER_VAR)
    }
}

impl HostIntrospector for EnvIntrospector {
    fn loader_name(&self) -> Option<String> {
        Self::read(&self.loader_var)
    }

    fn parent_loader_name(&self) -> Option<String> {
        Self::read(&self.parent_loader_var)
    }
}

/// Write-once environment detector.
///
/// Hold one per process (or per engine in tests) and share it by reference;
/// the first `detect()` call pays the probe cost, later calls read the cache.
pub struct EnvironmentDetector {
    introspector: Box<dyn HostIntrospector>,
    resolved: OnceLock<EnvironmentKind>,
}

impl EnvironmentDetector {
    /// Create a detector backed by the given introspector.
    pub fn new(introspector: impl HostIntrospector + 'static) -> Self {
        Self {
            introspector: Box::new(introspector),
            resolved: OnceLock::new(),
        }
    }

    /// Create a detector that reads the default environment variables.
    pub fn from_env() -> Self {
        Self::new(EnvIntrospector::default())
    }

    /// Create a detector whose answer is fixed up front (configuration
    /// override). The introspector is never consulted.
    pub fn fixed(kind: EnvironmentKind) -> Self {
        let detector = Self::new(EnvIntrospector::default());
        if kind != EnvironmentKind::Uninitialized {
            let _ = detector.resolved.set(kind);
        }
        detector
    }

    /// Detect the hosting environment. Idempotent.
    pub fn detect(&self) -> EnvironmentKind {
        *self.resolved.get_or_init(|| {
            let kind = self.probe();
            info!(environment = %kind, "Hosting environment detected");
            kind
        })
    }

    /// Return the cached result, or `Uninitialized` if `detect()` has not run.
    pub fn peek(&self) -> EnvironmentKind {
        self.resolved
            .get()
            .copied()
            .unwrap_or(EnvironmentKind::Uninitialized)
    }

    fn probe(&self) -> EnvironmentKind {
        let Some(loader) = self.introspector.loader_name() else {
            warn!("Host loader identifier unavailable, assuming standalone environment");
            return EnvironmentKind::None;
        };

        if let Some(kind) = match_signature(&loader) {
            return kind;
        }

        if let Some(parent) = self.introspector.parent_loader_name() {
            if let Some(kind) = match_signature(&parent) {
                return kind;
            }
        }

        debug!(loader = %loader, "No known host signature matched");
        EnvironmentKind::None
    }
}

impl std::fmt::Debug for EnvironmentDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentDetector")
            .field("resolved", &self.peek())
            .finish_non_exhaustive()
    }
}

/// First profile (in priority order) whose signature occurs in `loader_name`.
pub fn match_signature(loader_name: &str) -> Option<EnvironmentKind> {
    HOST_PROFILES
        .iter()
        .find(|profile| loader_name.contains(profile.signature))
        .map(|profile| profile.kind)
}
