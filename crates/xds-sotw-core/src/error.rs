//! Error types for the store, streams and fetches.

use crate::registry::StreamId;
use crate::snapshot::SnapshotError;
use xds_sotw_proto::{Status, UnknownTypeUrl};

/// Errors returned by the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The snapshot failed validation and was not stored
    #[error("inconsistent snapshot: {0}")]
    InconsistentSnapshot(#[from] SnapshotError),
    /// No snapshot has been set for the node
    #[error("no snapshot for node '{0}'")]
    UnknownIdentity(String),
}

/// Errors on a discovery stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The stream-open hook refused the stream
    #[error("stream {stream_id} rejected: {reason}")]
    Rejected {
        /// Stream that was refused
        stream_id: StreamId,
        /// Reason given by the hook
        reason: String,
    },
    /// The session was torn down before the operation completed
    #[error("session {0} is closed")]
    SessionClosed(StreamId),
}

impl StreamError {
    /// Status sent to the client before the stream ends.
    #[must_use]
    pub fn to_status(&self) -> Status {
        match self {
            StreamError::Rejected { reason, .. } => {
                Status::new(Status::FAILED_PRECONDITION, reason.clone())
            }
            StreamError::SessionClosed(_) => Status::new(Status::UNAVAILABLE, self.to_string()),
        }
    }
}

/// Errors from one-shot fetches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request named an unknown type URL
    #[error(transparent)]
    UnknownType(#[from] UnknownTypeUrl),
    /// No snapshot exists for the node
    #[error("no snapshot available for node '{0}'")]
    NoSnapshot(String),
    /// The client already holds the current version
    #[error("skip fetch: version {version} up to date")]
    UpToDate {
        /// The version both sides hold
        version: String,
    },
}

impl FetchError {
    /// Status sent to the client in place of a response.
    #[must_use]
    pub fn to_status(&self) -> Status {
        let code = match self {
            FetchError::UnknownType(_) => Status::INVALID_ARGUMENT,
            FetchError::NoSnapshot(_) => Status::NOT_FOUND,
            FetchError::UpToDate { .. } => Status::FAILED_PRECONDITION,
        };
        Status::new(code, self.to_string())
    }
}
