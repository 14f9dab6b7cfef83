//! Protocol messages for state-of-the-world discovery.
//!
//! Field numbers follow the v3 discovery service so that payloads stay
//! readable by standard protobuf tooling.

use prost::Message;
use prost_types::Any;

/// Identity metadata an agent attaches to its first request.
#[derive(Clone, PartialEq, Message)]
pub struct Node {
    /// Opaque node identifier
    #[prost(string, tag = "1")]
    pub id: String,
    /// Cluster the node belongs to
    #[prost(string, tag = "2")]
    pub cluster: String,
}

impl Node {
    /// Create a node with the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cluster: String::new(),
        }
    }
}

/// Error detail carried by a NACK.
#[derive(Clone, PartialEq, Message)]
pub struct Status {
    /// gRPC-style status code
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// Human readable message
    #[prost(string, tag = "2")]
    pub message: String,
    /// Additional details
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

impl Status {
    /// `INVALID_ARGUMENT`
    pub const INVALID_ARGUMENT: i32 = 3;
    /// `NOT_FOUND`
    pub const NOT_FOUND: i32 = 5;
    /// `FAILED_PRECONDITION`
    pub const FAILED_PRECONDITION: i32 = 9;
    /// `UNAVAILABLE`
    pub const UNAVAILABLE: i32 = 14;

    /// Create a status with a code and message.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }
}

/// A request for resources of one type.
#[derive(Clone, PartialEq, Message)]
pub struct DiscoveryRequest {
    /// Version the client currently holds (empty on first request)
    #[prost(string, tag = "1")]
    pub version_info: String,
    /// Node metadata, required on the first request of a stream
    #[prost(message, optional, tag = "2")]
    pub node: Option<Node>,
    /// Names of interest; empty means every resource of the type
    #[prost(string, repeated, tag = "3")]
    pub resource_names: Vec<String>,
    /// Type URL of the requested resources
    #[prost(string, tag = "4")]
    pub type_url: String,
    /// Nonce of the response this request answers
    #[prost(string, tag = "5")]
    pub response_nonce: String,
    /// Set when the previous response was rejected
    #[prost(message, optional, tag = "6")]
    pub error_detail: Option<Status>,
}

impl DiscoveryRequest {
    /// Create an initial request for a type.
    #[must_use]
    pub fn new(type_url: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            ..Default::default()
        }
    }

    /// Attach node metadata.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.node = Some(node);
        self
    }

    /// Set the client-held version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version_info = version.into();
        self
    }

    /// Set the resource names of interest.
    #[must_use]
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the nonce being acknowledged.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.response_nonce = nonce.into();
        self
    }

    /// Mark this request as a rejection of the last response.
    #[must_use]
    pub fn with_error(mut self, detail: Status) -> Self {
        self.error_detail = Some(detail);
        self
    }

    /// Whether this request rejects the previous response.
    #[must_use]
    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }

    /// Build the ACK for a response received on this stream.
    #[must_use]
    pub fn ack(response: &DiscoveryResponse, names: &[String]) -> Self {
        Self {
            version_info: response.version_info.clone(),
            node: None,
            resource_names: names.to_vec(),
            type_url: response.type_url.clone(),
            response_nonce: response.nonce.clone(),
            error_detail: None,
        }
    }
}

/// The full set of matching resources of one type at one version.
#[derive(Clone, PartialEq, Message)]
pub struct DiscoveryResponse {
    /// Version of the served snapshot for this type
    #[prost(string, tag = "1")]
    pub version_info: String,
    /// Matching resources
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<Any>,
    /// Type URL of the resources
    #[prost(string, tag = "4")]
    pub type_url: String,
    /// Per-stream nonce the client echoes back
    #[prost(string, tag = "5")]
    pub nonce: String,
}

/// Envelope for frames sent by clients.
#[derive(Clone, PartialEq, Message)]
pub struct ClientFrame {
    /// Frame payload
    #[prost(oneof = "client_frame::Kind", tags = "1, 2")]
    pub kind: Option<client_frame::Kind>,
}

/// Nested types for [`ClientFrame`].
pub mod client_frame {
    use super::DiscoveryRequest;

    /// Client frame payload.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        /// A request on a long-lived discovery stream
        #[prost(message, tag = "1")]
        Stream(DiscoveryRequest),
        /// A one-shot fetch
        #[prost(message, tag = "2")]
        Fetch(DiscoveryRequest),
    }
}

impl ClientFrame {
    /// Wrap a stream request.
    #[must_use]
    pub fn stream(request: DiscoveryRequest) -> Self {
        Self {
            kind: Some(client_frame::Kind::Stream(request)),
        }
    }

    /// Wrap a fetch request.
    #[must_use]
    pub fn fetch(request: DiscoveryRequest) -> Self {
        Self {
            kind: Some(client_frame::Kind::Fetch(request)),
        }
    }
}

/// Envelope for frames sent by the server.
#[derive(Clone, PartialEq, Message)]
pub struct ServerFrame {
    /// Frame payload
    #[prost(oneof = "server_frame::Kind", tags = "1, 2")]
    pub kind: Option<server_frame::Kind>,
}

/// Nested types for [`ServerFrame`].
pub mod server_frame {
    use super::{DiscoveryResponse, Status};

    /// Server frame payload.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        /// A discovery response
        #[prost(message, tag = "1")]
        Response(DiscoveryResponse),
        /// A terminal error for the stream or fetch
        #[prost(message, tag = "2")]
        Error(Status),
    }
}

impl ServerFrame {
    /// Wrap a response.
    #[must_use]
    pub fn response(response: DiscoveryResponse) -> Self {
        Self {
            kind: Some(server_frame::Kind::Response(response)),
        }
    }

    /// Wrap an error status.
    #[must_use]
    pub fn error(status: Status) -> Self {
        Self {
            kind: Some(server_frame::Kind::Error(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_echoes_version_and_nonce() {
        let response = DiscoveryResponse {
            version_info: "v3".to_string(),
            resources: vec![],
            type_url: "type.googleapis.com/envoy.config.listener.v3.Listener".to_string(),
            nonce: "7".to_string(),
        };

        let ack = DiscoveryRequest::ack(&response, &["listener-1".to_string()]);

        assert_eq!(ack.version_info, "v3");
        assert_eq!(ack.response_nonce, "7");
        assert_eq!(ack.type_url, response.type_url);
        assert_eq!(ack.resource_names, vec!["listener-1".to_string()]);
        assert!(!ack.is_nack());
    }

    #[test]
    fn request_wire_format_keeps_nack_detail() {
        let request = DiscoveryRequest::new("type.googleapis.com/envoy.config.cluster.v3.Cluster")
            .with_node(Node::new("node-A"))
            .with_version("v1")
            .with_names(["a", "b"])
            .with_error(Status::new(Status::INVALID_ARGUMENT, "bad cluster"));

        let bytes = request.encode_to_vec();
        let decoded = DiscoveryRequest::decode(bytes.as_slice()).unwrap();

        assert_eq!(decoded, request);
        assert!(decoded.is_nack());
        assert_eq!(decoded.node.unwrap().id, "node-A");
    }

    #[test]
    fn client_frame_modes_are_distinct() {
        let frame = ClientFrame::fetch(DiscoveryRequest::new("t"));
        let decoded = ClientFrame::decode(frame.encode_to_vec().as_slice()).unwrap();

        assert!(matches!(decoded.kind, Some(client_frame::Kind::Fetch(_))));
    }
}
