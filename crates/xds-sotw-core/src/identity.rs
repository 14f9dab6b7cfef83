//! Mapping from node metadata to the identity used as the cache key.

use xds_sotw_proto::Node;

/// Derives the cache key for a connecting node.
pub trait NodeHash: Send + Sync {
    /// Identity for the node, or `None` if it cannot be identified.
    fn id(&self, node: Option<&Node>) -> Option<String>;
}

/// Uses the node's `id` field, falling back to a fixed identity when the
/// node sent none.
#[derive(Debug, Clone, Default)]
pub struct IdHash {
    fallback: Option<String>,
}

impl IdHash {
    /// Identify nodes strictly by their `id`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identify nodes by `id`, using `fallback` for anonymous nodes.
    #[must_use]
    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            fallback: Some(fallback.into()),
        }
    }
}

impl NodeHash for IdHash {
    fn id(&self, node: Option<&Node>) -> Option<String> {
        node.map(|node| node.id.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.fallback.clone())
    }
}
