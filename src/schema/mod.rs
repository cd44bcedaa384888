//! C4: schema manager — constraint registries and property/range/composite
//! index registries, with per-label locking.

pub mod constraints;
pub mod indexes;

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{ConstraintKind, GraphError, Result};
use crate::model::{NodeId, Properties, Value};

pub use constraints::Constraint;
pub use indexes::{CompositeIndex, ExternalIndexDef, ExternalIndexKind, LabelIndexes, PropertyIndex, RangeIndex};

use constraints::{extract_tuple, tagged_repr};

/// Thread-safe registry of constraints and indexes, shared by the engine
/// and transaction layer. Locking is per-registry rather than global, so a
/// constraint check on one label never blocks an index update on another.
#[derive(Default)]
pub struct SchemaManager {
    constraints: RwLock<Vec<Constraint>>,
    /// `(label, property) -> value-repr -> node_id`, the direct unique-value
    /// tracking map.
    unique_values: RwLock<HashMap<(String, String), HashMap<String, NodeId>>>,
    /// `(label, [properties]) -> value-repr -> node_id`, the `NodeKey`
    /// analogue of `unique_values`.
    node_key_values: RwLock<HashMap<(String, Vec<String>), HashMap<String, NodeId>>>,
    indexes: RwLock<HashMap<String, LabelIndexes>>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constraint. `existing` supplies every node currently
    /// carrying `label`, for existing-data validation: a new `PropertyType`
    /// constraint rejects registration if any row violates it; `Unique`/
    /// `NodeKey` rejects if a duplicate value already exists.
    pub fn register_constraint<'a>(
        &self,
        constraint: Constraint,
        existing: impl Iterator<Item = (&'a NodeId, &'a Properties)>,
    ) -> Result<()> {
        let existing: Vec<_> = existing.collect();
        match &constraint {
            Constraint::PropertyType { .. } | Constraint::Exists { .. } => {
                for (_, props) in &existing {
                    constraint.check_local(props)?;
                }
            }
            Constraint::Unique { label, property } => {
                let mut seen: HashMap<String, NodeId> = HashMap::new();
                for (id, props) in &existing {
                    if let Some(value) = props.get(property) {
                        let repr = tagged_repr(value);
                        if let Some(prior) = seen.insert(repr, (*id).clone()) {
                            return Err(unique_violation(
                                ConstraintKind::Unique,
                                label,
                                vec![property.clone()],
                                &prior,
                            ));
                        }
                    }
                }
                self.unique_values
                    .write()
                    .insert((label.to_lowercase(), property.clone()), seen);
            }
            Constraint::NodeKey { label, properties } => {
                let mut seen: HashMap<String, NodeId> = HashMap::new();
                for (id, props) in &existing {
                    if let Some(tuple) = extract_tuple(props, properties) {
                        let repr = tuple.iter().map(|v| tagged_repr(v)).collect::<Vec<_>>().join("\u{1f}");
                        if let Some(prior) = seen.insert(repr, (*id).clone()) {
                            return Err(unique_violation(
                                ConstraintKind::NodeKey,
                                label,
                                properties.clone(),
                                &prior,
                            ));
                        }
                    }
                }
                self.node_key_values
                    .write()
                    .insert((label.to_lowercase(), properties.clone()), seen);
            }
            Constraint::RelationshipUnique { .. } | Constraint::RelationshipExists { .. } => {}
        }
        self.constraints.write().push(constraint);
        Ok(())
    }

    /// Checks a node's properties against every constraint declared on
    /// `label`, including cross-node `Unique`/`NodeKey` checks.
    /// `excluding` is the node's own ID, so updating a node's own unique
    /// value doesn't self-conflict.
    pub fn check_node(&self, label: &str, node_id: &NodeId, properties: &Properties) -> Result<()> {
        let constraints = self.constraints.read();
        for constraint in constraints.iter().filter(|c| c.applies_to_label(label)) {
            constraint.check_local(properties)?;
            match constraint {
                Constraint::Unique {
                    label: l,
                    property,
                } => {
                    if let Some(value) = properties.get(property) {
                        let key = (l.to_lowercase(), property.clone());
                        let repr = tagged_repr(value);
                        let map = self.unique_values.read();
                        if let Some(holder) = map.get(&key).and_then(|m| m.get(&repr)) {
                            if holder != node_id {
                                return Err(unique_violation(
                                    ConstraintKind::Unique,
                                    l,
                                    vec![property.clone()],
                                    holder,
                                ));
                            }
                        }
                    }
                }
                Constraint::NodeKey {
                    label: l,
                    properties: keys,
                } => {
                    if let Some(tuple) = extract_tuple(properties, keys) {
                        let key = (l.to_lowercase(), keys.clone());
                        let repr = tuple.iter().map(|v| tagged_repr(v)).collect::<Vec<_>>().join("\u{1f}");
                        let map = self.node_key_values.read();
                        if let Some(holder) = map.get(&key).and_then(|m| m.get(&repr)) {
                            if holder != node_id {
                                return Err(unique_violation(
                                    ConstraintKind::NodeKey,
                                    l,
                                    keys.clone(),
                                    holder,
                                ));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks a relationship's properties against every constraint declared
    /// on `rel_type`.
    pub fn check_relationship(&self, rel_type: &str, properties: &Properties) -> Result<()> {
        let constraints = self.constraints.read();
        for constraint in constraints
            .iter()
            .filter(|c| c.applies_to_rel_type(rel_type))
        {
            constraint.check_local(properties)?;
        }
        Ok(())
    }

    /// Records `node_id`'s unique-tracked values after a successful write
    /// (call after [`SchemaManager::check_node`] has passed and the write
    /// has been applied).
    pub fn record_node(&self, label: &str, node_id: &NodeId, properties: &Properties) {
        let constraints = self.constraints.read().clone();
        for constraint in constraints.iter().filter(|c| c.applies_to_label(label)) {
            match constraint {
                Constraint::Unique {
                    label: l,
                    property,
                } => {
                    if let Some(value) = properties.get(property) {
                        self.unique_values
                            .write()
                            .entry((l.to_lowercase(), property.clone()))
                            .or_default()
                            .insert(tagged_repr(value), node_id.clone());
                    }
                }
                Constraint::NodeKey {
                    label: l,
                    properties: keys,
                } => {
                    if let Some(tuple) = extract_tuple(properties, keys) {
                        let repr = tuple.iter().map(|v| tagged_repr(v)).collect::<Vec<_>>().join("\u{1f}");
                        self.node_key_values
                            .write()
                            .entry((l.to_lowercase(), keys.clone()))
                            .or_default()
                            .insert(repr, node_id.clone());
                    }
                }
                _ => {}
            }
        }
    }

    /// Validates a batch of about-to-be-created nodes against Unique/
    /// NodeKey/Exists/PropertyType constraints, checking both already
    /// committed data and earlier nodes in the same batch. A violation
    /// anywhere in the batch fails the whole batch, so this runs before any
    /// of it is applied.
    pub fn check_batch<'a, I>(&self, nodes: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a NodeId, &'a Properties)>,
    {
        let mut local_unique: HashMap<(String, String), HashMap<String, NodeId>> = HashMap::new();
        let mut local_node_key: HashMap<(String, Vec<String>), HashMap<String, NodeId>> =
            HashMap::new();
        let constraints = self.constraints.read().clone();
        for (label, id, props) in nodes {
            for constraint in constraints.iter().filter(|c| c.applies_to_label(label)) {
                constraint.check_local(props)?;
                match constraint {
                    Constraint::Unique { label: l, property } => {
                        if let Some(value) = props.get(property) {
                            let repr = tagged_repr(value);
                            let lkey = (l.to_lowercase(), property.clone());
                            if let Some(holder) = local_unique.get(&lkey).and_then(|m| m.get(&repr)) {
                                return Err(unique_violation(
                                    ConstraintKind::Unique,
                                    l,
                                    vec![property.clone()],
                                    holder,
                                ));
                            }
                            if let Some(holder) = self
                                .unique_values
                                .read()
                                .get(&lkey)
                                .and_then(|m| m.get(&repr))
                            {
                                if holder != id {
                                    return Err(unique_violation(
                                        ConstraintKind::Unique,
                                        l,
                                        vec![property.clone()],
                                        holder,
                                    ));
                                }
                            }
                            local_unique.entry(lkey).or_default().insert(repr, id.clone());
                        }
                    }
                    Constraint::NodeKey {
                        label: l,
                        properties: keys,
                    } => {
                        if let Some(tuple) = extract_tuple(props, keys) {
                            let repr = tuple.iter().map(|v| tagged_repr(v)).collect::<Vec<_>>().join("\u{1f}");
                            let lkey = (l.to_lowercase(), keys.clone());
                            if let Some(holder) =
                                local_node_key.get(&lkey).and_then(|m| m.get(&repr))
                            {
                                return Err(unique_violation(
                                    ConstraintKind::NodeKey,
                                    l,
                                    keys.clone(),
                                    holder,
                                ));
                            }
                            if let Some(holder) = self
                                .node_key_values
                                .read()
                                .get(&lkey)
                                .and_then(|m| m.get(&repr))
                            {
                                if holder != id {
                                    return Err(unique_violation(
                                        ConstraintKind::NodeKey,
                                        l,
                                        keys.clone(),
                                        holder,
                                    ));
                                }
                            }
                            local_node_key.entry(lkey).or_default().insert(repr, id.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Forgets `node_id`'s unique-tracked values, called on node delete.
    pub fn forget_node(&self, label: &str, node_id: &NodeId, properties: &Properties) {
        let constraints = self.constraints.read().clone();
        for constraint in constraints.iter().filter(|c| c.applies_to_label(label)) {
            match constraint {
                Constraint::Unique {
                    label: l,
                    property,
                } => {
                    if let Some(value) = properties.get(property) {
                        if let Some(map) = self
                            .unique_values
                            .write()
                            .get_mut(&(l.to_lowercase(), property.clone()))
                        {
                            map.remove(&tagged_repr(value));
                        }
                    }
                }
                Constraint::NodeKey {
                    label: l,
                    properties: keys,
                } => {
                    if let Some(tuple) = extract_tuple(properties, keys) {
                        let repr = tuple.iter().map(|v| tagged_repr(v)).collect::<Vec<_>>().join("\u{1f}");
                        if let Some(map) = self
                            .node_key_values
                            .write()
                            .get_mut(&(l.to_lowercase(), keys.clone()))
                        {
                            map.remove(&repr);
                        }
                    }
                }
                _ => {}
            }
        }
        let _ = node_id;
    }

    /// Runs `f` with mutable access to the index registry for `label`,
    /// creating it on first use.
    pub fn with_label_indexes<R>(&self, label: &str, f: impl FnOnce(&mut LabelIndexes) -> R) -> R {
        let mut map = self.indexes.write();
        let entry = map.entry(label.to_lowercase()).or_default();
        f(entry)
    }

    /// All currently declared constraints, for diagnostics/introspection.
    pub fn constraints(&self) -> Vec<Constraint> {
        self.constraints.read().clone()
    }
}

fn unique_violation(
    kind: ConstraintKind,
    label: &str,
    properties: Vec<String>,
    holder: &NodeId,
) -> GraphError {
    GraphError::ConstraintViolation {
        kind,
        label: label.to_string(),
        properties,
        message: format!("value already held by node '{holder}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn unique_constraint_rejects_duplicate() {
        let schema = SchemaManager::new();
        schema
            .register_constraint(
                Constraint::Unique {
                    label: "User".into(),
                    property: "email".into(),
                },
                std::iter::empty(),
            )
            .unwrap();

        let n1 = "n1".to_string();
        let n2 = "n2".to_string();
        let p1 = props(&[("email", Value::String("a@example.com".into()))]);
        schema.check_node("User", &n1, &p1).unwrap();
        schema.record_node("User", &n1, &p1);

        let err = schema.check_node("User", &n2, &p1).unwrap_err();
        assert!(matches!(
            err,
            GraphError::ConstraintViolation {
                kind: ConstraintKind::Unique,
                ..
            }
        ));
    }

    #[test]
    fn exists_constraint_rejects_missing_property() {
        let schema = SchemaManager::new();
        schema
            .register_constraint(
                Constraint::Exists {
                    label: "User".into(),
                    property: "email".into(),
                },
                std::iter::empty(),
            )
            .unwrap();
        let err = schema
            .check_node("User", &"n1".to_string(), &Properties::new())
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::ConstraintViolation {
                kind: ConstraintKind::Exists,
                ..
            }
        ));
    }

    #[test]
    fn forget_node_frees_unique_value_for_reuse() {
        let schema = SchemaManager::new();
        schema
            .register_constraint(
                Constraint::Unique {
                    label: "User".into(),
                    property: "email".into(),
                },
                std::iter::empty(),
            )
            .unwrap();
        let p1 = props(&[("email", Value::String("a@example.com".into()))]);
        schema.check_node("User", &"n1".to_string(), &p1).unwrap();
        schema.record_node("User", &"n1".to_string(), &p1);
        schema.forget_node("User", &"n1".to_string(), &p1);
        schema.check_node("User", &"n2".to_string(), &p1).unwrap();
    }
}
