//! Logging hooks with protocol counters.

use std::sync::atomic::{AtomicU64, Ordering};
use xds_sotw_core::{Callbacks, Rejection, StreamError, StreamId};
use xds_sotw_proto::{DiscoveryRequest, DiscoveryResponse};

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Fetch requests received
    pub fetches: u64,
    /// Stream requests received
    pub requests: u64,
    /// Responses delivered, on streams and fetches
    pub responses: u64,
    /// Streams opened
    pub streams_opened: u64,
    /// Streams closed
    pub streams_closed: u64,
}

/// Hooks that log every protocol event and keep running counts.
#[derive(Debug, Default)]
pub struct DebugCallbacks {
    fetches: AtomicU64,
    requests: AtomicU64,
    responses: AtomicU64,
    streams_opened: AtomicU64,
    streams_closed: AtomicU64,
}

impl DebugCallbacks {
    /// Create hooks with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter values.
    #[must_use]
    pub fn counters(&self) -> Counters {
        Counters {
            fetches: self.fetches.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_closed: self.streams_closed.load(Ordering::Relaxed),
        }
    }

    /// Log the counters.
    pub fn report(&self) {
        let counters = self.counters();
        tracing::info!(
            fetches = counters.fetches,
            requests = counters.requests,
            responses = counters.responses,
            open_streams = counters.streams_opened.saturating_sub(counters.streams_closed),
            "Server callbacks"
        );
    }
}

impl Callbacks for DebugCallbacks {
    fn on_stream_open(
        &self,
        stream_id: StreamId,
        node_id: &str,
        type_url: &str,
    ) -> Result<(), Rejection> {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%stream_id, node_id, type_url, "Stream open");
        Ok(())
    }

    fn on_stream_closed(&self, stream_id: StreamId, node_id: &str) {
        self.streams_closed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%stream_id, node_id, "Stream closed");
    }

    fn on_stream_request(&self, stream_id: StreamId, request: &DiscoveryRequest) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(detail) = &request.error_detail {
            tracing::warn!(
                %stream_id,
                type_url = %request.type_url,
                version = %request.version_info,
                error = %detail.message,
                "Client rejected response"
            );
        } else {
            tracing::debug!(
                %stream_id,
                type_url = %request.type_url,
                version = %request.version_info,
                nonce = %request.response_nonce,
                "Stream request"
            );
        }
    }

    fn on_stream_response(
        &self,
        stream_id: StreamId,
        _request: &DiscoveryRequest,
        response: &DiscoveryResponse,
    ) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            %stream_id,
            type_url = %response.type_url,
            version = %response.version_info,
            resources = response.resources.len(),
            "Stream response"
        );
    }

    fn on_fetch_request(&self, request: &DiscoveryRequest) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(type_url = %request.type_url, version = %request.version_info, "Fetch request");
    }

    fn on_fetch_response(&self, _request: &DiscoveryRequest, response: &DiscoveryResponse) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            type_url = %response.type_url,
            version = %response.version_info,
            resources = response.resources.len(),
            "Fetch response"
        );
    }

    fn on_stream_error(&self, stream_id: StreamId, error: &StreamError) {
        tracing::debug!(%stream_id, error = %error, "Stream error");
    }
}
