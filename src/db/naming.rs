//! Pool naming strategy.
//!
//! Maps a logical pool name to the key used to look the resource up in the
//! hosting environment. Prefixes come from the host table; environments
//! without a convention pass the name through unchanged.

use crate::models::{EnvironmentKind, HostProfile};

/// Resolve the lookup key for `logical_name` under `environment`.
///
/// Pure: the result depends only on the two arguments. A name that already
/// carries the prefix is not prefixed twice.
pub fn resolve_lookup_name(environment: EnvironmentKind, logical_name: &str) -> String {
    let prefix = HostProfile::for_kind(environment)
        .map(|profile| profile.lookup_prefix)
        .unwrap_or("");

    if prefix.is_empty() || logical_name.starts_with(prefix) {
        logical_name.to_string()
    } else {
        format!("{prefix}{logical_name}")
    }
}
