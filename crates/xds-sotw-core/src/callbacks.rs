//! Observability hooks.
//!
//! Every method has a no-op default, so implementors override only the
//! events they care about. Hooks run synchronously on the stream's worker
//! and must stay cheap. Only [`Callbacks::on_stream_open`] can influence the
//! protocol, by refusing the stream.

use crate::error::StreamError;
use crate::registry::StreamId;
use xds_sotw_proto::{DiscoveryRequest, DiscoveryResponse};

/// Reason a stream-open hook gave for refusing a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Rejection(pub String);

/// Hooks invoked at protocol events.
#[allow(unused_variables)]
pub trait Callbacks: Send + Sync {
    /// A stream is opening. `type_url` is empty for aggregated streams.
    ///
    /// # Errors
    ///
    /// Returning an error refuses the stream.
    fn on_stream_open(
        &self,
        stream_id: StreamId,
        node_id: &str,
        type_url: &str,
    ) -> Result<(), Rejection> {
        Ok(())
    }

    /// A stream closed, for any reason.
    fn on_stream_closed(&self, stream_id: StreamId, node_id: &str) {}

    /// A request arrived on a stream, before it is processed.
    fn on_stream_request(&self, stream_id: StreamId, request: &DiscoveryRequest) {}

    /// A response is about to be delivered on a stream. `request` is the
    /// latest request for the response's type.
    fn on_stream_response(
        &self,
        stream_id: StreamId,
        request: &DiscoveryRequest,
        response: &DiscoveryResponse,
    ) {
    }

    /// A fetch request arrived.
    fn on_fetch_request(&self, request: &DiscoveryRequest) {}

    /// A fetch is being answered.
    fn on_fetch_response(&self, request: &DiscoveryRequest, response: &DiscoveryResponse) {}

    /// A stream-level error the engine swallowed.
    fn on_stream_error(&self, stream_id: StreamId, error: &StreamError) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}
