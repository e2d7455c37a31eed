use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier of a document in a vector index. Ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub String);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId(s)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId(s.to_string())
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DocId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An embedded document with optional metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    /// Version number - incremented on each update
    #[serde(default)]
    pub version: u64,
    pub vector: Vector,
    pub metadata: Option<serde_json::Value>,
}

impl Document {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<DocId>, vector: Vector, metadata: Option<serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            vector,
            metadata,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref().and_then(|m| m.get(name))
    }
}

/// One query result: id, distance to the query and the stored metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: DocId,
    pub distance: f32,
    pub metadata: Option<serde_json::Value>,
}
