//! # xds-sotw Protocol
//!
//! Wire definitions for the state-of-the-world discovery protocol.
//!
//! ## Messages
//!
//! - `DiscoveryRequest`: what an agent holds and what it wants
//! - `DiscoveryResponse`: the full set of matching resources at one version
//! - `ClientFrame` / `ServerFrame`: transport envelopes
//!
//! ## Framing
//!
//! Each frame is a `u32` big-endian length followed by the protobuf body.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_BYTES};
pub use messages::{
    client_frame, server_frame, ClientFrame, DiscoveryRequest, DiscoveryResponse, Node,
    ServerFrame, Status,
};
pub use types::{ResourceType, UnknownTypeUrl};
