//! Constraint declarations and the checks C4 runs against them.

use std::collections::BTreeMap;

use crate::error::{ConstraintKind, GraphError, Result};
use crate::model::{Properties, Value};

/// A single schema constraint, declared on a node label or a relationship
/// type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// `(label, property)` must be unique across every node with `label`.
    Unique { label: String, property: String },
    /// The tuple of `properties` must be unique across every node with
    /// `label` (a multi-property extension of [`Constraint::Unique`]).
    NodeKey {
        label: String,
        properties: Vec<String>,
    },
    /// `property` must be present and non-null on every node with `label`.
    Exists { label: String, property: String },
    /// `property`, when present, must have type `type_tag` (see
    /// [`Value::type_tag`]).
    PropertyType {
        label: String,
        property: String,
        type_tag: String,
    },
    /// Relationship-level `Unique`, over `(relationshipType, property)`.
    RelationshipUnique {
        rel_type: String,
        property: String,
    },
    /// Relationship-level `Exists`, over `(relationshipType, property)`.
    RelationshipExists {
        rel_type: String,
        property: String,
    },
}

impl Constraint {
    /// The constraint-kind tag used in [`GraphError::ConstraintViolation`].
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::Unique { .. } => ConstraintKind::Unique,
            Constraint::NodeKey { .. } => ConstraintKind::NodeKey,
            Constraint::Exists { .. } => ConstraintKind::Exists,
            Constraint::PropertyType { .. } => ConstraintKind::PropertyType,
            Constraint::RelationshipUnique { .. } => ConstraintKind::RelationshipUnique,
            Constraint::RelationshipExists { .. } => ConstraintKind::RelationshipExists,
        }
    }

    /// The label (or relationship type) this constraint governs.
    pub fn subject(&self) -> &str {
        match self {
            Constraint::Unique { label, .. }
            | Constraint::NodeKey { label, .. }
            | Constraint::Exists { label, .. }
            | Constraint::PropertyType { label, .. } => label,
            Constraint::RelationshipUnique { rel_type, .. }
            | Constraint::RelationshipExists { rel_type, .. } => rel_type,
        }
    }

    /// True if this is a node-label constraint that applies to `label`.
    pub fn applies_to_label(&self, label: &str) -> bool {
        matches!(
            self,
            Constraint::Unique { label: l, .. }
            | Constraint::NodeKey { label: l, .. }
            | Constraint::Exists { label: l, .. }
            | Constraint::PropertyType { label: l, .. }
            if l.eq_ignore_ascii_case(label)
        )
    }

    /// True if this is a relationship constraint that applies to `rel_type`.
    pub fn applies_to_rel_type(&self, rel_type: &str) -> bool {
        matches!(
            self,
            Constraint::RelationshipUnique { rel_type: t, .. }
            | Constraint::RelationshipExists { rel_type: t, .. }
            if t == rel_type
        )
    }

    /// Checks `properties` for an `Exists`/`PropertyType` violation. Does
    /// not check `Unique`/`NodeKey` — those require cross-node state and
    /// are checked by [`crate::schema::SchemaManager::check_node`].
    pub fn check_local(&self, properties: &Properties) -> Result<()> {
        match self {
            Constraint::Exists { label, property } => {
                match properties.get(property) {
                    None | Some(Value::Null) => Err(violation(
                        self.kind(),
                        label,
                        vec![property.clone()],
                        format!("property '{property}' must exist and be non-null"),
                    )),
                    _ => Ok(()),
                }
            }
            Constraint::RelationshipExists { rel_type, property } => {
                match properties.get(property) {
                    None | Some(Value::Null) => Err(violation(
                        self.kind(),
                        rel_type,
                        vec![property.clone()],
                        format!("property '{property}' must exist and be non-null"),
                    )),
                    _ => Ok(()),
                }
            }
            Constraint::PropertyType {
                label,
                property,
                type_tag,
            } => match properties.get(property) {
                None | Some(Value::Null) => Ok(()),
                Some(value) if value.type_tag() == type_tag => Ok(()),
                Some(value) => Err(violation(
                    self.kind(),
                    label,
                    vec![property.clone()],
                    format!(
                        "property '{property}' has type '{}', expected '{type_tag}'",
                        value.type_tag()
                    ),
                )),
            },
            Constraint::Unique { .. }
            | Constraint::NodeKey { .. }
            | Constraint::RelationshipUnique { .. } => Ok(()),
        }
    }
}

fn violation(
    kind: ConstraintKind,
    label: &str,
    properties: Vec<String>,
    message: String,
) -> GraphError {
    GraphError::ConstraintViolation {
        kind,
        label: label.to_string(),
        properties,
        message,
    }
}

/// Validates an existing data set against a newly registered `PropertyType`
/// constraint, rejecting the registration if any row violates it. Called
/// when a new type constraint is added against data that already exists.
pub fn validate_existing_rows<'a>(
    constraint: &Constraint,
    rows: impl Iterator<Item = (&'a str, &'a Properties)>,
) -> Result<()> {
    for (_id, properties) in rows {
        constraint.check_local(properties)?;
    }
    Ok(())
}

/// Builds the type-tagged sort key used by `NodeKey`/composite matching so
/// values of different types never compare equal by string accident.
pub fn tagged_repr(value: &Value) -> String {
    match value {
        Value::Null => "null:".to_string(),
        Value::Bool(b) => format!("bool:{b}"),
        Value::Int(i) => format!("num:{i}"),
        Value::Float(f) => format!("num:{f}"),
        Value::String(s) => format!("string:{s}"),
        Value::List(_) | Value::Map(_) => format!("{}:{value:?}", value.type_tag()),
    }
}

/// Extracts a `(label, property) -> Value` tuple, used by `NodeKey` checks
/// that must compare several properties at once.
pub fn extract_tuple<'a>(
    properties: &'a Properties,
    keys: &[String],
) -> Option<Vec<&'a Value>> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        out.push(properties.get(key)?);
    }
    Some(out)
}

/// Ordered representation of a property tuple, for stable hashing and
/// comparison.
pub fn tuple_repr(values: &[&Value]) -> BTreeMap<usize, String> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (i, tagged_repr(v)))
        .collect()
}
