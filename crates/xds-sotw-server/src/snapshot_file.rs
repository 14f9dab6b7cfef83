//! File-backed snapshot source.
//!
//! The control plane writes a JSON document describing the desired
//! resources; the server polls it and pushes every change into the cache.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use xds_sotw_core::{CacheError, Resource, ResourceType, Snapshot, SnapshotCache};

/// Errors loading a snapshot document.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotFileError {
    /// The document could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Document path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The document is not valid JSON for the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Document path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// The cache refused the snapshot.
    #[error(transparent)]
    Rejected(#[from] CacheError),
}

/// Snapshot document.
#[derive(Debug, Deserialize)]
pub struct SnapshotDocument {
    /// Version applied to every resource kind
    pub version: String,

    /// Per-kind version overrides
    #[serde(default)]
    pub versions: BTreeMap<ResourceType, String>,

    /// Identities served this snapshot; empty means the default node
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Resources
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

/// One resource in a snapshot document.
#[derive(Debug, Deserialize)]
pub struct ResourceEntry {
    /// Resource kind
    #[serde(rename = "type")]
    pub kind: ResourceType,

    /// Resource name
    pub name: String,

    /// Resources this one depends on
    #[serde(default)]
    pub references: Vec<ReferenceEntry>,

    /// Payload, carried as JSON bytes
    #[serde(default)]
    pub body: serde_json::Value,
}

/// A declared reference.
#[derive(Debug, Deserialize)]
pub struct ReferenceEntry {
    /// Referenced kind
    #[serde(rename = "type")]
    pub kind: ResourceType,

    /// Referenced name
    pub name: String,
}

impl SnapshotDocument {
    /// Parse a document from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Build the snapshot this document describes.
    ///
    /// # Errors
    ///
    /// Returns error if a body cannot be serialized.
    pub fn to_snapshot(&self) -> Result<Snapshot, serde_json::Error> {
        let mut builder = Snapshot::builder(self.version.clone());
        for (kind, version) in &self.versions {
            builder = builder.kind_version(*kind, version.clone());
        }

        for entry in &self.resources {
            let mut resource = Resource::from_json(entry.kind, entry.name.clone(), &entry.body)?;
            for reference in &entry.references {
                resource = resource.with_reference(reference.kind, reference.name.clone());
            }
            builder = builder.resource(resource);
        }

        Ok(builder.build())
    }

    /// Identities this document applies to.
    #[must_use]
    pub fn targets<'a>(&'a self, default_node: &'a str) -> Vec<&'a str> {
        if self.nodes.is_empty() {
            vec![default_node]
        } else {
            self.nodes.iter().map(String::as_str).collect()
        }
    }
}

/// Polls a snapshot document and applies changes to the cache.
pub struct SnapshotFile {
    path: PathBuf,
    default_node: String,
    poll_interval: Duration,
    last_contents: Option<Vec<u8>>,
}

impl SnapshotFile {
    /// Watch `path`, applying documents without a node list to `default_node`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, default_node: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            default_node: default_node.into(),
            poll_interval,
            last_contents: None,
        }
    }

    /// Path being watched.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document and apply it if it changed since the last load.
    ///
    /// Returns `true` if a snapshot was applied.
    ///
    /// # Errors
    ///
    /// Returns error if the document cannot be read, parsed or accepted. The
    /// previously applied snapshot stays in place.
    pub async fn reload(&mut self, cache: &SnapshotCache) -> Result<bool, SnapshotFileError> {
        let contents = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SnapshotFileError::Read {
                path: self.path.clone(),
                source,
            })?;

        if self.last_contents.as_deref() == Some(contents.as_slice()) {
            return Ok(false);
        }
        // A rejected document is retried only once its contents change.
        self.last_contents = Some(contents.clone());

        let parse_error = |source| SnapshotFileError::Parse {
            path: self.path.clone(),
            source,
        };
        let document = SnapshotDocument::from_slice(&contents).map_err(parse_error)?;
        let snapshot = document.to_snapshot().map_err(parse_error)?;

        // Validate once so a bad document touches no identity.
        snapshot.consistent().map_err(CacheError::from)?;

        for node_id in document.targets(&self.default_node) {
            cache.set_snapshot(node_id, snapshot.clone())?;
            tracing::info!(
                node_id,
                version = %document.version,
                resources = snapshot.len(),
                "Applied snapshot"
            );
        }

        Ok(true)
    }

    /// Start polling in the background.
    #[must_use]
    pub fn start(mut self, cache: Arc<SnapshotCache>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(err) = self.reload(&cache).await {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %err,
                        "Snapshot document rejected, keeping previous snapshot"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use xds_sotw_core::SessionRegistry;

    const DOCUMENT: &str = r#"{
        "version": "v1",
        "versions": {"cluster": "c7"},
        "resources": [
            {"type": "listener", "name": "listener-1",
             "references": [{"type": "route", "name": "local"}],
             "body": {"port": 10000}},
            {"type": "route", "name": "local",
             "references": [{"type": "cluster", "name": "backend"}]},
            {"type": "cluster", "name": "backend", "body": {"lb": "round_robin"}}
        ]
    }"#;

    fn cache() -> SnapshotCache {
        SnapshotCache::new(Arc::new(SessionRegistry::new()))
    }

    fn write(file: &mut tempfile::NamedTempFile, contents: &str) {
        let handle = file.as_file_mut();
        handle.set_len(0).unwrap();
        std::io::Seek::rewind(handle).unwrap();
        handle.write_all(contents.as_bytes()).unwrap();
        handle.flush().unwrap();
    }

    #[test]
    fn document_builds_snapshot() {
        let document = SnapshotDocument::from_slice(DOCUMENT.as_bytes()).unwrap();
        let snapshot = document.to_snapshot().unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.version(ResourceType::Listener), "v1");
        assert_eq!(snapshot.version(ResourceType::Cluster), "c7");
        assert!(snapshot.consistent().is_ok());

        let listener = snapshot.get(ResourceType::Listener, "listener-1").unwrap();
        let body: serde_json::Value = serde_json::from_slice(&listener.body().value).unwrap();
        assert_eq!(body["port"], 10000);
        assert_eq!(listener.references().len(), 1);
    }

    #[test]
    fn targets_default_to_configured_node() {
        let document = SnapshotDocument::from_slice(br#"{"version": "v1"}"#).unwrap();
        assert_eq!(document.targets("test-node-id"), vec!["test-node-id"]);

        let document =
            SnapshotDocument::from_slice(br#"{"version": "v1", "nodes": ["a", "b"]}"#).unwrap();
        assert_eq!(document.targets("test-node-id"), vec!["a", "b"]);
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        let result = SnapshotDocument::from_slice(
            br#"{"version": "v1", "resources": [{"type": "gadget", "name": "x"}]}"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reload_applies_only_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write(&mut file, DOCUMENT);

        let cache = cache();
        let mut source = SnapshotFile::new(file.path(), "node-A", Duration::from_secs(1));

        assert!(source.reload(&cache).await.unwrap());
        assert!(!source.reload(&cache).await.unwrap());
        assert_eq!(
            cache.get_snapshot("node-A").unwrap().version(ResourceType::Listener),
            "v1"
        );

        write(&mut file, &DOCUMENT.replace("\"v1\"", "\"v2\""));
        assert!(source.reload(&cache).await.unwrap());
        assert_eq!(
            cache.get_snapshot("node-A").unwrap().version(ResourceType::Listener),
            "v2"
        );
    }

    #[tokio::test]
    async fn inconsistent_document_keeps_previous_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write(&mut file, DOCUMENT);

        let cache = cache();
        let mut source = SnapshotFile::new(file.path(), "node-A", Duration::from_secs(1));
        source.reload(&cache).await.unwrap();

        // Drop the cluster the route depends on.
        let broken = r#"{
            "version": "v2",
            "resources": [
                {"type": "route", "name": "local",
                 "references": [{"type": "cluster", "name": "backend"}]}
            ]
        }"#;
        write(&mut file, broken);

        let err = source.reload(&cache).await.unwrap_err();
        assert!(matches!(err, SnapshotFileError::Rejected(_)));
        assert_eq!(
            cache.get_snapshot("node-A").unwrap().version(ResourceType::Route),
            "v1"
        );
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = SnapshotFile::new(dir.path().join("absent.json"), "node-A", Duration::from_secs(1));
        let err = source.reload(&cache()).await.unwrap_err();
        assert!(matches!(err, SnapshotFileError::Read { .. }));
    }
}
