//! # xds-sotw Core
//!
//! Snapshot-based state-of-the-world discovery engine.
//!
//! This crate provides:
//! - Versioned resource snapshots with cross-type consistency checks
//! - A per-node snapshot store with atomic replace semantics
//! - A session registry that fans snapshot updates out to open streams
//! - The per-stream reconciliation state machine
//! - Observability hooks invoked at protocol events

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod callbacks;
pub mod engine;
pub mod error;
pub mod identity;
pub mod registry;
pub mod resource;
pub mod session;
pub mod snapshot;

pub use cache::{NodeStatus, SnapshotCache};
pub use callbacks::{Callbacks, NoopCallbacks, Rejection};
pub use engine::DiscoveryServer;
pub use error::{CacheError, FetchError, StreamError};
pub use identity::{IdHash, NodeHash};
pub use registry::{SessionRegistry, StreamId};
pub use resource::{Resource, ResourceRef};
pub use session::{NackPolicy, Session, WatchPhase};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotError};
pub use xds_sotw_proto::ResourceType;
