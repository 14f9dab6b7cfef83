//! Per-stream session state.
//!
//! A session tracks, for every resource kind the client has asked for, what
//! it asked for, what it says it holds, and what was last sent to it. The
//! decisions about whether a response is due live here; the engine only
//! feeds events in and ships the responses out.
//!
//! # Watch lifecycle (per kind)
//!
//! ```text
//! AwaitingRequest -> RequestReceived -> ResponseSent -----> (next request)
//!                                    \-> WaitingForSnapshot -> ResponseSent
//! any state -> Closed
//! ```

use crate::callbacks::Callbacks;
use crate::registry::{SessionRegistry, StreamId};
use crate::snapshot::Snapshot;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use xds_sotw_proto::{DiscoveryRequest, DiscoveryResponse, ResourceType};

/// What to do after a client rejects a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NackPolicy {
    /// Send nothing more until a snapshot with a different version arrives
    #[default]
    WaitForSnapshot,
    /// As above, and also resend the current snapshot after the delay
    RetryAfter(Duration),
}

/// Protocol state of one kind within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    /// No request processed yet
    AwaitingRequest,
    /// A request is being processed
    RequestReceived,
    /// Nothing to send until the snapshot changes
    WaitingForSnapshot,
    /// A response went out and the client has not answered it yet
    ResponseSent,
    /// The stream is gone
    Closed,
}

#[derive(Debug)]
struct Watch {
    request: DiscoveryRequest,
    names: BTreeSet<String>,
    client_version: String,
    last_sent: Option<String>,
    nonce: Option<String>,
    phase: WatchPhase,
    pending: bool,
    nacked: bool,
    retry_at: Option<Instant>,
}

impl Watch {
    fn new(request: &DiscoveryRequest) -> Self {
        Self {
            request: request.clone(),
            names: BTreeSet::new(),
            client_version: String::new(),
            last_sent: None,
            nonce: None,
            phase: WatchPhase::AwaitingRequest,
            pending: true,
            nacked: false,
            retry_at: None,
        }
    }

    /// A request answering an older response than the latest one sent.
    fn is_stale(&self, request: &DiscoveryRequest) -> bool {
        !request.response_nonce.is_empty()
            && self
                .nonce
                .as_ref()
                .is_some_and(|nonce| *nonce != request.response_nonce)
    }

    /// The version the client is taken to hold.
    ///
    /// Until the client answers a response, the last version sent counts.
    fn reference_version(&self) -> &str {
        match &self.last_sent {
            Some(sent) if self.phase == WatchPhase::ResponseSent => sent,
            _ => &self.client_version,
        }
    }

    /// Whether `version` has to be sent.
    ///
    /// After a rejection neither the rejected version nor the one the client
    /// still holds is worth sending.
    fn wants(&self, version: &str) -> bool {
        if self.pending {
            return true;
        }
        if self.nacked {
            return version != self.client_version && self.last_sent.as_deref() != Some(version);
        }
        version != self.reference_version()
    }
}

/// State of one open stream.
///
/// Registered with the [`SessionRegistry`] for its node while alive;
/// dropping the session unregisters it and reports the close to the hooks,
/// whichever way the stream ended.
pub struct Session {
    stream_id: StreamId,
    node_id: String,
    watches: BTreeMap<ResourceType, Watch>,
    wake: Arc<Notify>,
    next_nonce: u64,
    registry: Arc<SessionRegistry>,
    callbacks: Arc<dyn Callbacks>,
}

impl Session {
    pub(crate) fn open(
        stream_id: StreamId,
        node_id: String,
        registry: Arc<SessionRegistry>,
        callbacks: Arc<dyn Callbacks>,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        registry.register(&node_id, stream_id, &wake);
        Self {
            stream_id,
            node_id,
            watches: BTreeMap::new(),
            wake,
            next_nonce: 0,
            registry,
            callbacks,
        }
    }

    /// Stream identifier.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Node identity the stream was opened for.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Phase of a kind, if the client ever asked for it.
    #[must_use]
    pub fn phase(&self, kind: ResourceType) -> Option<WatchPhase> {
        self.watches.get(&kind).map(|watch| watch.phase)
    }

    /// Kinds the client has asked for at least once.
    pub fn interests(&self) -> impl Iterator<Item = ResourceType> + '_ {
        self.watches.keys().copied()
    }

    /// Latest request recorded for a kind.
    #[must_use]
    pub fn last_request(&self, kind: ResourceType) -> Option<&DiscoveryRequest> {
        self.watches.get(&kind).map(|watch| &watch.request)
    }

    pub(crate) fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Record a request and decide whether it must be answered now.
    ///
    /// Stale requests (answering an older nonce) are ignored. A rejection
    /// does not by itself cause a resend. Without a snapshot the answer is
    /// deferred until one arrives.
    pub fn accept_request(
        &mut self,
        kind: ResourceType,
        request: DiscoveryRequest,
        policy: NackPolicy,
        snapshot: Option<&Snapshot>,
        now: Instant,
    ) -> bool {
        let watch = self
            .watches
            .entry(kind)
            .or_insert_with(|| Watch::new(&request));

        if watch.is_stale(&request) {
            tracing::debug!(
                stream_id = %self.stream_id,
                %kind,
                nonce = %request.response_nonce,
                "Ignoring stale request"
            );
            return false;
        }

        let names: BTreeSet<String> = request.resource_names.iter().cloned().collect();
        if names != watch.names {
            watch.pending = true;
        }
        watch.names = names;
        watch.client_version.clone_from(&request.version_info);
        watch.phase = WatchPhase::RequestReceived;

        if request.is_nack() {
            watch.nacked = true;
            watch.retry_at = match policy {
                NackPolicy::WaitForSnapshot => None,
                NackPolicy::RetryAfter(delay) => Some(now + delay),
            };
        } else {
            watch.nacked = false;
            watch.retry_at = None;
        }
        watch.request = request;

        let due = snapshot.is_some_and(|snapshot| watch.wants(snapshot.version(kind)));
        if !due {
            watch.phase = WatchPhase::WaitingForSnapshot;
        }
        due
    }

    /// Kinds that need a response after the node's snapshot changed.
    #[must_use]
    pub fn due_on_snapshot(&self, snapshot: &Snapshot) -> Vec<ResourceType> {
        self.watches
            .iter()
            .filter(|(kind, watch)| watch.wants(snapshot.version(**kind)))
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Kinds whose rejection retry deadline has passed.
    #[must_use]
    pub fn due_retries(&mut self, now: Instant) -> Vec<ResourceType> {
        self.watches
            .iter_mut()
            .filter(|(_, watch)| watch.retry_at.is_some_and(|at| at <= now))
            .map(|(kind, watch)| {
                watch.retry_at = None;
                *kind
            })
            .collect()
    }

    /// Earliest pending retry deadline.
    #[must_use]
    pub fn next_retry(&self) -> Option<Instant> {
        self.watches.values().filter_map(|watch| watch.retry_at).min()
    }

    /// Build the response for a kind from a snapshot and record it as sent.
    ///
    /// Returns `None` if the client never asked for the kind.
    pub fn respond(&mut self, kind: ResourceType, snapshot: &Snapshot) -> Option<DiscoveryResponse> {
        let watch = self.watches.get_mut(&kind)?;

        self.next_nonce += 1;
        let nonce = self.next_nonce.to_string();
        let response = snapshot.response(kind, &watch.names, nonce.clone());

        watch.last_sent = Some(response.version_info.clone());
        watch.nonce = Some(nonce);
        watch.pending = false;
        watch.nacked = false;
        watch.retry_at = None;
        watch.phase = WatchPhase::ResponseSent;

        Some(response)
    }

    /// Mark every watch closed.
    pub(crate) fn close(&mut self) {
        for watch in self.watches.values_mut() {
            watch.phase = WatchPhase::Closed;
            watch.retry_at = None;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
        self.registry.unregister(&self.node_id, self.stream_id);
        self.callbacks.on_stream_closed(self.stream_id, &self.node_id);
        tracing::debug!(stream_id = %self.stream_id, node_id = %self.node_id, "Session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("stream_id", &self.stream_id)
            .field("node_id", &self.node_id)
            .field("watches", &self.watches)
            .finish_non_exhaustive()
    }
}
