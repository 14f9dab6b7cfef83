//! Discovery resource kinds and their type URLs.
//!
//! Type URL structure: `type.googleapis.com/{package}.{Message}`

use serde::{Deserialize, Serialize};

/// Prefix shared by every type URL.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// The fixed set of resource kinds served by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Cluster load assignments
    Endpoint,
    /// Upstream clusters
    Cluster,
    /// Route configurations
    Route,
    /// Scoped route configurations
    ScopedRoute,
    /// Virtual hosts
    VirtualHost,
    /// Listeners
    Listener,
    /// TLS secrets
    Secret,
    /// Runtime layers
    Runtime,
    /// Typed extension configs
    ExtensionConfig,
    /// Rate limit configs
    RateLimitConfig,
}

impl ResourceType {
    /// Every kind, in dependency order (referenced kinds first).
    pub const ALL: [ResourceType; 10] = [
        ResourceType::Endpoint,
        ResourceType::Cluster,
        ResourceType::Route,
        ResourceType::ScopedRoute,
        ResourceType::VirtualHost,
        ResourceType::Listener,
        ResourceType::Secret,
        ResourceType::Runtime,
        ResourceType::ExtensionConfig,
        ResourceType::RateLimitConfig,
    ];

    /// Fully qualified type URL.
    #[must_use]
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Endpoint => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
            ResourceType::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            ResourceType::Route => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
            ResourceType::ScopedRoute => {
                "type.googleapis.com/envoy.config.route.v3.ScopedRouteConfiguration"
            }
            ResourceType::VirtualHost => "type.googleapis.com/envoy.config.route.v3.VirtualHost",
            ResourceType::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            ResourceType::Secret => {
                "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret"
            }
            ResourceType::Runtime => "type.googleapis.com/envoy.service.runtime.v3.Runtime",
            ResourceType::ExtensionConfig => "type.googleapis.com/envoy.config.core.v3.TypedExtensionConfig",
            ResourceType::RateLimitConfig => {
                "type.googleapis.com/ratelimit.config.ratelimit.v3.RateLimitConfig"
            }
        }
    }

    /// Resolve a type URL.
    ///
    /// # Errors
    ///
    /// Returns error if the URL names no known kind.
    pub fn from_type_url(url: &str) -> Result<Self, UnknownTypeUrl> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_url() == url)
            .ok_or_else(|| UnknownTypeUrl(url.to_string()))
    }

    /// Short lowercase name, as used in configuration files.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceType::Endpoint => "endpoint",
            ResourceType::Cluster => "cluster",
            ResourceType::Route => "route",
            ResourceType::ScopedRoute => "scoped_route",
            ResourceType::VirtualHost => "virtual_host",
            ResourceType::Listener => "listener",
            ResourceType::Secret => "secret",
            ResourceType::Runtime => "runtime",
            ResourceType::ExtensionConfig => "extension_config",
            ResourceType::RateLimitConfig => "rate_limit_config",
        }
    }

    /// Resolve either a short name or a full type URL.
    ///
    /// # Errors
    ///
    /// Returns error if neither form matches.
    pub fn parse(input: &str) -> Result<Self, UnknownTypeUrl> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.short_name() == input)
            .map_or_else(|| Self::from_type_url(input), Ok)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// A type URL that names no known resource kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type URL: {0}")]
pub struct UnknownTypeUrl(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_urls_share_prefix_and_resolve() {
        for kind in ResourceType::ALL {
            assert!(kind.type_url().starts_with(TYPE_URL_PREFIX));
            assert_eq!(ResourceType::from_type_url(kind.type_url()), Ok(kind));
        }
    }

    #[test]
    fn parse_accepts_short_names() {
        assert_eq!(ResourceType::parse("listener"), Ok(ResourceType::Listener));
        assert_eq!(
            ResourceType::parse("type.googleapis.com/envoy.config.cluster.v3.Cluster"),
            Ok(ResourceType::Cluster)
        );
        assert!(ResourceType::parse("widget").is_err());
    }

    #[test]
    fn serde_uses_short_names() {
        let json = serde_json::to_string(&ResourceType::ScopedRoute).unwrap();
        assert_eq!(json, "\"scoped_route\"");
    }
}
