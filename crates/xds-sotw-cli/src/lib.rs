//! # xds-sotw CLI
//!
//! Client side of the framed discovery transport, used by the `xds-sotw`
//! binary to fetch and watch resources.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod render;

pub use client::{parse_addr, Client, Watch, DEFAULT_PORT};
pub use render::render_response;
