//! Registry of open stream sessions per node.
//!
//! The registry is what lets a snapshot update reach every stream open for
//! the same node. Entries are partitioned per node: registering, waking or
//! removing sessions of one node never contends with another node beyond
//! the shard that holds it.
//!
//! The registry only holds weak handles to each session's wake signal.
//! A session that has gone away is skipped (and pruned) the next time its
//! node is notified.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Identifier of one open stream, unique within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open sessions grouped by node identity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    nodes: DashMap<String, HashMap<StreamId, Weak<Notify>>>,
    next_stream_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh stream identifier.
    pub fn next_stream_id(&self) -> StreamId {
        StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a session's wake signal under a node.
    pub fn register(&self, node_id: &str, stream_id: StreamId, wake: &Arc<Notify>) {
        self.nodes
            .entry(node_id.to_string())
            .or_default()
            .insert(stream_id, Arc::downgrade(wake));
        tracing::debug!(node_id, %stream_id, "Session registered");
    }

    /// Remove a session. Removing an unknown session is a no-op.
    ///
    /// Returns whether the session was present.
    pub fn unregister(&self, node_id: &str, stream_id: StreamId) -> bool {
        let (removed, now_empty) = match self.nodes.get_mut(node_id) {
            Some(mut entry) => {
                let removed = entry.remove(&stream_id).is_some();
                (removed, entry.is_empty())
            }
            None => (false, false),
        };

        if now_empty {
            self.nodes.remove_if(node_id, |_, sessions| sessions.is_empty());
        }
        if removed {
            tracing::debug!(node_id, %stream_id, "Session unregistered");
        }
        removed
    }

    /// Wake every live session of a node.
    ///
    /// Never blocks on I/O: each session's own worker picks the update up.
    /// Returns the number of sessions woken.
    pub fn notify(&self, node_id: &str) -> usize {
        let Some(mut entry) = self.nodes.get_mut(node_id) else {
            return 0;
        };

        let mut woken = 0;
        entry.retain(|_, wake| match wake.upgrade() {
            Some(wake) => {
                wake.notify_one();
                woken += 1;
                true
            }
            None => false,
        });
        woken
    }

    /// Number of sessions registered under a node.
    #[must_use]
    pub fn session_count(&self, node_id: &str) -> usize {
        self.nodes
            .get(node_id)
            .map_or(0, |sessions| sessions.len())
    }

    /// Nodes that currently have at least one session.
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}
