//! Immutable, versioned resource snapshots.
//!
//! A snapshot holds, for every resource kind, a version token and the set
//! of resources of that kind keyed by name. Versions are opaque: two
//! snapshots are only ever compared for equality of their version strings.
//!
//! # Consistency
//!
//! A snapshot is consistent when every reference declared by one of its
//! resources resolves to a resource present in the same snapshot.

use crate::resource::{Resource, ResourceRef};
use prost_types::Any;
use std::collections::{BTreeMap, BTreeSet};
use xds_sotw_proto::{DiscoveryResponse, ResourceType};

/// Resources of one kind at one version.
#[derive(Debug, Clone, PartialEq, Default)]
struct TypedResources {
    version: String,
    items: BTreeMap<String, Resource>,
}

/// A versioned bundle of resources for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    resources: BTreeMap<ResourceType, TypedResources>,
}

impl Snapshot {
    /// Create a snapshot with a single version shared by every kind.
    ///
    /// Kinds without resources still carry the version, so clients asking
    /// for them get a valid empty response.
    #[must_use]
    pub fn new(version: impl Into<String>, resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut builder = SnapshotBuilder::new(version);
        for resource in resources {
            builder = builder.resource(resource);
        }
        builder.build()
    }

    /// Start a snapshot with per-kind versions.
    #[must_use]
    pub fn builder(version: impl Into<String>) -> SnapshotBuilder {
        SnapshotBuilder::new(version)
    }

    /// Version of the given kind.
    #[must_use]
    pub fn version(&self, kind: ResourceType) -> &str {
        self.resources
            .get(&kind)
            .map_or("", |typed| typed.version.as_str())
    }

    /// Resources of the given kind, ordered by name.
    pub fn resources(&self, kind: ResourceType) -> impl Iterator<Item = &Resource> {
        self.resources
            .get(&kind)
            .into_iter()
            .flat_map(|typed| typed.items.values())
    }

    /// Look up a single resource.
    #[must_use]
    pub fn get(&self, kind: ResourceType, name: &str) -> Option<&Resource> {
        self.resources.get(&kind).and_then(|typed| typed.items.get(name))
    }

    /// Total number of resources across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.values().map(|typed| typed.items.len()).sum()
    }

    /// Whether the snapshot holds no resources at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every declared reference resolves within this snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first dangling reference found, walking kinds in
    /// dependency order and resources by name.
    pub fn consistent(&self) -> Result<(), SnapshotError> {
        for resource in self.resources.values().flat_map(|typed| typed.items.values()) {
            for reference in resource.references() {
                if self.get(reference.kind, &reference.name).is_none() {
                    return Err(SnapshotError::MissingReference {
                        from: ResourceRef::new(resource.kind(), resource.name()),
                        missing: reference.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Bodies of the resources of `kind` whose names are in `names`.
    ///
    /// An empty name set selects every resource of the kind.
    #[must_use]
    pub fn select(&self, kind: ResourceType, names: &BTreeSet<String>) -> Vec<Any> {
        self.resources(kind)
            .filter(|resource| names.is_empty() || names.contains(resource.name()))
            .map(|resource| resource.body().clone())
            .collect()
    }

    /// Build the response serving `kind` to a client interested in `names`.
    #[must_use]
    pub fn response(
        &self,
        kind: ResourceType,
        names: &BTreeSet<String>,
        nonce: String,
    ) -> DiscoveryResponse {
        DiscoveryResponse {
            version_info: self.version(kind).to_string(),
            resources: self.select(kind, names),
            type_url: kind.type_url().to_string(),
            nonce,
        }
    }
}

/// Builder for snapshots whose kinds carry different versions.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    default_version: String,
    resources: BTreeMap<ResourceType, TypedResources>,
}

impl SnapshotBuilder {
    /// Start with a default version applied to every kind not set explicitly.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            default_version: version.into(),
            resources: BTreeMap::new(),
        }
    }

    /// Override the version of one kind.
    #[must_use]
    pub fn kind_version(mut self, kind: ResourceType, version: impl Into<String>) -> Self {
        self.resources.entry(kind).or_default().version = version.into();
        self
    }

    /// Add a resource. A later resource with the same kind and name replaces
    /// the earlier one.
    #[must_use]
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources
            .entry(resource.kind())
            .or_default()
            .items
            .insert(resource.name().to_string(), resource);
        self
    }

    /// Finish the snapshot.
    #[must_use]
    pub fn build(mut self) -> Snapshot {
        for kind in ResourceType::ALL {
            let typed = self.resources.entry(kind).or_default();
            if typed.version.is_empty() {
                typed.version.clone_from(&self.default_version);
            }
        }
        Snapshot {
            resources: self.resources,
        }
    }
}

/// Errors raised by snapshot validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// A resource references something absent from the snapshot
    #[error("{from} references missing {missing}")]
    MissingReference {
        /// The referencing resource
        from: ResourceRef,
        /// The reference that did not resolve
        missing: ResourceRef,
    },
}
