//! Data models for graph entities.
//!
//! Defines the core data structures used to represent nodes, edges, and their
//! properties. Node and edge identity is an opaque, non-empty, caller-chosen
//! string — the store never mints IDs itself.
//!
//! # Key Types
//!
//! - [`Node`] - a labeled vertex with a property map and optional embedding
//! - [`Edge`] - a typed, directed, properties-carrying relationship
//! - [`Value`] - the dynamically typed property value
//! - [`NodeId`] / [`EdgeId`] - opaque string identifiers

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Opaque, non-empty identifier for a node.
pub type NodeId = String;

/// Opaque, non-empty identifier for an edge.
pub type EdgeId = String;

/// A dynamically typed property value.
///
/// Covers null, bool, integer, float, string, list, and map. Numeric
/// comparisons across `Int`/`Float` coerce
/// through [`Value::numeric_cmp`] so constraint checks survive JSON
/// round-trips that widen an integer to a float or vice versa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absence of a value. Rejected by `Exists` constraints.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered, heterogeneous list of values.
    List(Vec<Value>),
    /// String-keyed map of values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short, stable type tag used for `PropertyType` constraint checks and
    /// for composite-index tuple hashing.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Numeric-coercion-aware equality: `Int(3) == Float(3.0)`.
    pub fn numeric_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    /// Partial order across numeric types, used by the range index.
    pub fn numeric_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Value as `f64`, for the range index; `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// String-keyed property map carried by nodes and edges.
pub type Properties = BTreeMap<String, Value>;

/// A single embedding vector: 32-bit floats of a fixed dimensionality per
/// index.
pub type Embedding = Vec<f32>;

/// A labeled vertex.
///
/// Identity (`id`) is immutable after creation. `labels` is compared
/// case-insensitively in queries but stored with original casing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Opaque, non-empty, caller-chosen identifier.
    pub id: NodeId,
    /// Labels tagging this node's type(s), original casing preserved.
    pub labels: Vec<String>,
    /// Arbitrary property map.
    pub properties: Properties,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
    /// Last-update timestamp.
    pub updated_at: OffsetDateTime,
    /// Optional dense embedding, filled in by an external producer.
    pub embedding: Option<Embedding>,
    /// Decay counter used by inference (e.g. staleness scoring).
    pub decay: f64,
    /// Access counter used by inference (co-access/temporal signals).
    pub access_count: u64,
}

impl Node {
    /// Creates a new node with the given ID and no labels/properties.
    pub fn new(id: impl Into<NodeId>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            labels: Vec::new(),
            properties: Properties::new(),
            created_at: now,
            updated_at: now,
            embedding: None,
            decay: 0.0,
            access_count: 0,
        }
    }

    /// Builder-style label addition.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Builder-style property addition.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// True if any label (case-insensitively) matches `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// A typed, directed relationship between two nodes.
///
/// A pair `(start, end, type)` may occur at most once unless the schema
/// declares it multi-valued (enforced by the engine, not this type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Opaque, non-empty, caller-chosen identifier.
    pub id: EdgeId,
    /// ID of the start node. Must reference an existing node at commit time.
    pub start_node: NodeId,
    /// ID of the end node. Must reference an existing node at commit time.
    pub end_node: NodeId,
    /// Relationship type; non-empty.
    #[serde(rename = "type")]
    pub edge_type: String,
    /// Arbitrary property map.
    pub properties: Properties,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
    /// Last-update timestamp.
    pub updated_at: OffsetDateTime,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Set when this edge was materialized by the inference pipeline rather
    /// than created directly by a caller.
    pub auto_generated: bool,
}

impl Edge {
    /// Creates a new edge with confidence `1.0` and `auto_generated = false`.
    pub fn new(
        id: impl Into<EdgeId>,
        start_node: impl Into<NodeId>,
        end_node: impl Into<NodeId>,
        edge_type: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            start_node: start_node.into(),
            end_node: end_node.into(),
            edge_type: edge_type.into(),
            properties: Properties::new(),
            created_at: now,
            updated_at: now,
            confidence: 1.0,
            auto_generated: false,
        }
    }

    /// Builder-style property addition.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Validates that an ID is non-empty, the minimal invariant required of
/// node/edge identity.
pub fn validate_id(id: &str) -> crate::error::Result<()> {
    if id.is_empty() {
        return Err(crate::error::GraphError::InvalidId(
            "id must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_new_has_no_labels_or_properties() {
        let node = Node::new("alice");
        assert_eq!(node.id, "alice");
        assert!(node.labels.is_empty());
        assert!(node.properties.is_empty());
    }

    #[test]
    fn numeric_eq_coerces_across_int_and_float() {
        assert!(Value::Int(3).numeric_eq(&Value::Float(3.0)));
        assert!(Value::Float(3.0).numeric_eq(&Value::Int(3)));
        assert!(!Value::Int(3).numeric_eq(&Value::Float(3.5)));
    }

    #[test]
    fn has_label_is_case_insensitive() {
        let node = Node::new("n1").with_label("User");
        assert!(node.has_label("user"));
        assert!(node.has_label("USER"));
        assert!(!node.has_label("admin"));
    }

    #[test]
    fn edge_new_defaults_confidence_to_one() {
        let edge = Edge::new("e1", "a", "b", "KNOWS");
        assert_eq!(edge.confidence, 1.0);
        assert!(!edge.auto_generated);
    }
}
