//! Hosting environment models.
//!
//! [`EnvironmentKind`] is the closed set of hosting environments the engine
//! knows about. Everything environment-specific (detection signature, lookup
//! prefix, who owns the pools) lives in the [`HOST_PROFILES`] table, so adding
//! an environment is one enum variant plus one table row.

use serde::Serialize;

/// Hosting environment the process runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// Bootstrap value before detection has run. Never returned by `detect()`.
    Uninitialized,
    /// Standalone process; the engine owns its pools.
    None,
    Tomcat,
    Jetty,
    JBoss,
    WebLogic,
    WebSphere,
    GlassFish,
}

impl EnvironmentKind {
    /// Get the display name for this environment.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::None => "none",
            Self::Tomcat => "tomcat",
            Self::Jetty => "jetty",
            Self::JBoss => "jboss",
            Self::WebLogic => "weblogic",
            Self::WebSphere => "websphere",
            Self::GlassFish => "glassfish",
        }
    }

    /// Parse a display name back into a kind (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        [Self::None]
            .into_iter()
            .chain(HOST_PROFILES.iter().map(|p| p.kind))
            .find(|kind| kind.display_name() == lower)
    }

    /// Whether this is a managed container (as opposed to standalone).
    pub fn is_managed(&self) -> bool {
        HostProfile::for_kind(*self).is_some()
    }
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Who owns the physical pools in an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolOwnership {
    /// The engine opens, configures and destroys the pools itself.
    SelfManaged,
    /// Pools are provisioned by the hosting container and only borrowed from.
    ContainerManaged,
}

/// One row of the host table.
#[derive(Debug, Clone, Copy)]
pub struct HostProfile {
    pub kind: EnvironmentKind,
    /// Case-sensitive substring searched for in host loader identifiers.
    pub signature: &'static str,
    /// Prefix prepended to logical pool names before directory lookup.
    pub lookup_prefix: &'static str,
}

/// Known managed environments in detection priority order.
pub const HOST_PROFILES: &[HostProfile] = &[
    HostProfile {
        kind: EnvironmentKind::Tomcat,
        signature: "org.apache.catalina",
        lookup_prefix: "java:comp/env/",
    },
    HostProfile {
        kind: EnvironmentKind::Jetty,
        signature: "org.eclipse.jetty",
        lookup_prefix: "java:comp/env/",
    },
    HostProfile {
        kind: EnvironmentKind::JBoss,
        signature: "org.jboss",
        lookup_prefix: "java:/",
    },
    HostProfile {
        kind: EnvironmentKind::WebLogic,
        signature: "weblogic",
        lookup_prefix: "",
    },
    HostProfile {
        kind: EnvironmentKind::WebSphere,
        signature: "com.ibm.ws",
        lookup_prefix: "java:comp/env/",
    },
    HostProfile {
        kind: EnvironmentKind::GlassFish,
        signature: "com.sun.enterprise",
        lookup_prefix: "",
    },
];

impl HostProfile {
    /// Find the profile for a managed environment.
    pub fn for_kind(kind: EnvironmentKind) -> Option<&'static HostProfile> {
        HOST_PROFILES.iter().find(|p| p.kind == kind)
    }
}

/// Strategy value object selected once from the detected environment.
///
/// The engine is a single implementation parameterized by this value instead
/// of one pool factory per container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostStrategy {
    pub environment: EnvironmentKind,
    pub lookup_prefix: &'static str,
    pub ownership: PoolOwnership,
    /// Whether the engine may set the isolation level on borrowed connections.
    pub apply_isolation: bool,
}

impl HostStrategy {
    /// Build the strategy for an environment.
    pub fn for_environment(environment: EnvironmentKind) -> Self {
        match HostProfile::for_kind(environment) {
            Some(profile) => Self {
                environment,
                lookup_prefix: profile.lookup_prefix,
                ownership: PoolOwnership::ContainerManaged,
                apply_isolation: false,
            },
            None => Self {
                environment,
                lookup_prefix: "",
                ownership: PoolOwnership::SelfManaged,
                apply_isolation: true,
            },
        }
    }

    pub fn is_self_managed(&self) -> bool {
        self.ownership == PoolOwnership::SelfManaged
    }
}
