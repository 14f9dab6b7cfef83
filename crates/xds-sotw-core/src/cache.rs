//! Per-node snapshot store.

use crate::error::CacheError;
use crate::registry::SessionRegistry;
use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Point-in-time view of a node, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Node identity
    pub node_id: String,
    /// Whether a snapshot is set for the node
    pub has_snapshot: bool,
    /// Number of open streams for the node
    pub open_streams: usize,
    /// When the node last sent a request
    pub last_request: Option<DateTime<Utc>>,
}

/// Process-wide map from node identity to its current snapshot.
///
/// Writes validate the snapshot first and then swap it in atomically,
/// so readers see either the previous or the new snapshot, never a mix.
/// A successful write wakes every session open under the same node while
/// the node's entry is still held, which serializes writers of one node.
///
/// Last-request times are kept per node until the node's snapshot is
/// cleared, whether or not it still has open streams.
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: DashMap<String, Arc<Snapshot>>,
    last_requests: DashMap<String, DateTime<Utc>>,
    sessions: Arc<SessionRegistry>,
}

impl SnapshotCache {
    /// Create a cache that notifies the given session registry.
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            snapshots: DashMap::new(),
            last_requests: DashMap::new(),
            sessions,
        }
    }

    /// The session registry this cache notifies.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Validate and store a snapshot for a node.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InconsistentSnapshot`] if the snapshot has a
    /// dangling reference. The previously stored snapshot is kept.
    pub fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<(), CacheError> {
        if let Err(err) = snapshot.consistent() {
            tracing::warn!(node_id, error = %err, "Rejected inconsistent snapshot");
            return Err(err.into());
        }

        let stored = self
            .snapshots
            .entry(node_id.to_string())
            .insert(Arc::new(snapshot));
        let woken = self.sessions.notify(node_id);
        drop(stored);

        tracing::info!(node_id, sessions = woken, "Snapshot updated");
        Ok(())
    }

    /// Current snapshot of a node.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownIdentity`] if no snapshot was ever set
    /// (or it was cleared).
    pub fn get_snapshot(&self, node_id: &str) -> Result<Arc<Snapshot>, CacheError> {
        self.snapshots
            .get(node_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CacheError::UnknownIdentity(node_id.to_string()))
    }

    /// Remove a node's snapshot. Open sessions stay open and wait for the
    /// next snapshot.
    ///
    /// Returns whether a snapshot was present.
    pub fn clear_snapshot(&self, node_id: &str) -> bool {
        self.last_requests.remove(node_id);
        let removed = self.snapshots.remove(node_id).is_some();
        if removed {
            tracing::info!(node_id, "Snapshot cleared");
        }
        removed
    }

    /// Nodes that have a snapshot, sorted.
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .snapshots
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Record that a request arrived from a node.
    pub fn touch(&self, node_id: &str) {
        self.last_requests.insert(node_id.to_string(), Utc::now());
    }

    /// Diagnostic status of a node.
    #[must_use]
    pub fn status(&self, node_id: &str) -> NodeStatus {
        NodeStatus {
            node_id: node_id.to_string(),
            has_snapshot: self.snapshots.contains_key(node_id),
            open_streams: self.sessions.session_count(node_id),
            last_request: self.last_requests.get(node_id).map(|entry| *entry.value()),
        }
    }
}
