//! Named, typed resources carried inside snapshots.

use prost::Message;
use prost_types::Any;
use xds_sotw_proto::ResourceType;

/// A reference from one resource to another, possibly of a different kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    /// Kind of the referenced resource
    pub kind: ResourceType,
    /// Name of the referenced resource
    pub name: String,
}

impl ResourceRef {
    /// Create a new reference.
    #[must_use]
    pub fn new(kind: ResourceType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// An immutable configuration resource.
///
/// The body is opaque to the engine. References are declared by whoever
/// builds the resource and are what snapshot consistency is checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    kind: ResourceType,
    name: String,
    body: Any,
    references: Vec<ResourceRef>,
}

impl Resource {
    /// Create a resource from an already packed body.
    #[must_use]
    pub fn new(kind: ResourceType, name: impl Into<String>, body: Any) -> Self {
        Self {
            kind,
            name: name.into(),
            body,
            references: Vec::new(),
        }
    }

    /// Create a resource from a protobuf message.
    #[must_use]
    pub fn from_message<M: Message>(kind: ResourceType, name: impl Into<String>, message: &M) -> Self {
        let body = Any {
            type_url: kind.type_url().to_string(),
            value: message.encode_to_vec(),
        };
        Self::new(kind, name, body)
    }

    /// Create a resource whose body is a JSON document.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn from_json(
        kind: ResourceType,
        name: impl Into<String>,
        value: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let body = Any {
            type_url: kind.type_url().to_string(),
            value: serde_json::to_vec(value)?,
        };
        Ok(Self::new(kind, name, body))
    }

    /// Declare a reference to another resource.
    #[must_use]
    pub fn with_reference(mut self, kind: ResourceType, name: impl Into<String>) -> Self {
        self.references.push(ResourceRef::new(kind, name));
        self
    }

    /// Resource kind.
    #[must_use]
    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Packed body.
    #[must_use]
    pub fn body(&self) -> &Any {
        &self.body
    }

    /// Declared references.
    #[must_use]
    pub fn references(&self) -> &[ResourceRef] {
        &self.references
    }
}
