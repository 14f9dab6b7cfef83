//! # xds-sotw Server
//!
//! Management server that serves file-backed snapshots to discovery clients
//! over framed TCP.
//!
//! ## Components
//!
//! - `config`: environment-driven configuration
//! - `snapshot_file`: JSON snapshot document loader and poller
//! - `transport`: per-connection stream and fetch handling
//! - `callbacks`: logging hooks with protocol counters
//! - `runtime`: wiring and the main loop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod config;
pub mod runtime;
pub mod snapshot_file;
pub mod transport;

pub use callbacks::{Counters, DebugCallbacks};
pub use config::ServerConfig;
pub use runtime::Server;
pub use snapshot_file::{SnapshotDocument, SnapshotFile, SnapshotFileError};
pub use transport::Transport;
