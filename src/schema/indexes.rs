//! Property, range, and composite index registries.

use std::collections::{BTreeMap, HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::model::{NodeId, Value};

use super::constraints::tagged_repr;

/// `(label, property, value-representation) -> node IDs`.
#[derive(Debug, Default)]
pub struct PropertyIndex {
    entries: HashMap<(String, String, String), HashSet<NodeId>>,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(label: &str, property: &str, value: &Value) -> (String, String, String) {
        (
            label.to_lowercase(),
            property.to_string(),
            tagged_repr(value),
        )
    }

    /// Registers `node_id` under `(label, property, value)`.
    pub fn insert(&mut self, label: &str, property: &str, value: &Value, node_id: &NodeId) {
        self.entries
            .entry(Self::key(label, property, value))
            .or_default()
            .insert(node_id.clone());
    }

    /// Removes `node_id` from `(label, property, value)`.
    pub fn remove(&mut self, label: &str, property: &str, value: &Value, node_id: &NodeId) {
        if let Some(set) = self.entries.get_mut(&Self::key(label, property, value)) {
            set.remove(node_id);
            if set.is_empty() {
                self.entries.remove(&Self::key(label, property, value));
            }
        }
    }

    /// Node IDs registered under `(label, property, value)`.
    pub fn lookup(&self, label: &str, property: &str, value: &Value) -> HashSet<NodeId> {
        self.entries
            .get(&Self::key(label, property, value))
            .cloned()
            .unwrap_or_default()
    }
}

/// Sorted `(value, node_id)` pairs plus a reverse `node_id -> position` map,
/// supporting O(log n) range queries and O(1) positional deletion (spec
/// §4.2: "inserts binary-search the position, splice in, update positions
/// of the tail; deletes remove at known position with tail-fixup").
#[derive(Debug, Default)]
pub struct RangeIndex {
    sorted: Vec<(f64, NodeId)>,
    positions: HashMap<NodeId, usize>,
}

impl RangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn search(&self, value: f64) -> usize {
        self.sorted
            .partition_point(|(v, _)| *v < value)
    }

    /// Inserts `(value, node_id)`, maintaining sort order.
    pub fn insert(&mut self, value: f64, node_id: NodeId) {
        let pos = self.search(value);
        self.sorted.insert(pos, (value, node_id.clone()));
        self.fix_positions_from(pos);
    }

    /// Removes `node_id` in O(1) using the reverse position map, followed
    /// by an O(n) tail-fixup of positions after the removed slot.
    pub fn remove(&mut self, node_id: &NodeId) {
        if let Some(&pos) = self.positions.get(node_id) {
            self.sorted.remove(pos);
            self.positions.remove(node_id);
            self.fix_positions_from(pos);
        }
    }

    fn fix_positions_from(&mut self, from: usize) {
        for (i, (_, id)) in self.sorted.iter().enumerate().skip(from) {
            self.positions.insert(id.clone(), i);
        }
    }

    /// Returns node IDs with value in `[lower, upper]` or the corresponding
    /// exclusive bound, per `inclusive_lower`/`inclusive_upper`.
    pub fn range(
        &self,
        lower: Option<f64>,
        inclusive_lower: bool,
        upper: Option<f64>,
        inclusive_upper: bool,
    ) -> Vec<NodeId> {
        let start = match lower {
            None => 0,
            Some(v) if inclusive_lower => self.sorted.partition_point(|(x, _)| *x < v),
            Some(v) => self.sorted.partition_point(|(x, _)| *x <= v),
        };
        let end = match upper {
            None => self.sorted.len(),
            Some(v) if inclusive_upper => self.sorted.partition_point(|(x, _)| *x <= v),
            Some(v) => self.sorted.partition_point(|(x, _)| *x < v),
        };
        self.sorted[start.min(self.sorted.len())..end.min(self.sorted.len())]
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// SHA-256 over the type-tagged, separator-joined representation of a
/// property tuple.
pub fn hash_tuple(values: &[&Value]) -> [u8; 32] {
    let joined = values
        .iter()
        .map(|v| tagged_repr(v))
        .collect::<Vec<_>>()
        .join("\u{1f}");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.finalize().into()
}

/// Full-tuple hash plus every length-`1..n-1` prefix hash, so prefix
/// lookups don't require hashing the full tuple.
#[derive(Debug, Default)]
pub struct CompositeIndex {
    full: HashMap<[u8; 32], HashSet<NodeId>>,
    prefixes: HashMap<[u8; 32], HashSet<NodeId>>,
}

impl CompositeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `node_id` under the full tuple hash and every proper,
    /// non-empty prefix hash.
    pub fn insert(&mut self, values: &[&Value], node_id: &NodeId) {
        self.full
            .entry(hash_tuple(values))
            .or_default()
            .insert(node_id.clone());
        for len in 1..values.len() {
            self.prefixes
                .entry(hash_tuple(&values[..len]))
                .or_default()
                .insert(node_id.clone());
        }
    }

    /// Reverses [`CompositeIndex::insert`] for the same tuple.
    pub fn remove(&mut self, values: &[&Value], node_id: &NodeId) {
        let full_hash = hash_tuple(values);
        if let Some(set) = self.full.get_mut(&full_hash) {
            set.remove(node_id);
            if set.is_empty() {
                self.full.remove(&full_hash);
            }
        }
        for len in 1..values.len() {
            let prefix_hash = hash_tuple(&values[..len]);
            if let Some(set) = self.prefixes.get_mut(&prefix_hash) {
                set.remove(node_id);
                if set.is_empty() {
                    self.prefixes.remove(&prefix_hash);
                }
            }
        }
    }

    /// Nodes matching the full tuple exactly.
    pub fn lookup_full(&self, values: &[&Value]) -> HashSet<NodeId> {
        self.full.get(&hash_tuple(values)).cloned().unwrap_or_default()
    }

    /// Nodes matching `values` as a prefix of a longer indexed tuple.
    pub fn lookup_prefix(&self, values: &[&Value]) -> HashSet<NodeId> {
        self.prefixes
            .get(&hash_tuple(values))
            .cloned()
            .unwrap_or_default()
    }
}

/// Registration record for vector/fulltext indexes: this crate only tracks
/// that the index exists, its payload is delegated to an external engine.
#[derive(Debug, Clone)]
pub struct ExternalIndexDef {
    pub label: String,
    pub property: String,
    pub kind: ExternalIndexKind,
}

/// Which external engine a registered index delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalIndexKind {
    Vector,
    Fulltext,
}

/// All index registries owned by one label.
#[derive(Debug, Default)]
pub struct LabelIndexes {
    pub property: BTreeMap<String, PropertyIndex>,
    pub range: BTreeMap<String, RangeIndex>,
    pub composite: BTreeMap<String, CompositeIndex>,
    pub external: Vec<ExternalIndexDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_index_insert_and_query() {
        let mut idx = RangeIndex::new();
        idx.insert(5.0, "n5".to_string());
        idx.insert(1.0, "n1".to_string());
        idx.insert(3.0, "n3".to_string());
        let result = idx.range(Some(1.0), false, Some(5.0), true);
        assert_eq!(result, vec!["n3".to_string(), "n5".to_string()]);
    }

    #[test]
    fn range_index_remove_fixes_positions() {
        let mut idx = RangeIndex::new();
        idx.insert(1.0, "n1".to_string());
        idx.insert(2.0, "n2".to_string());
        idx.insert(3.0, "n3".to_string());
        idx.remove(&"n2".to_string());
        assert_eq!(idx.len(), 2);
        let all = idx.range(None, true, None, true);
        assert_eq!(all, vec!["n1".to_string(), "n3".to_string()]);
    }

    #[test]
    fn composite_index_prefix_lookup() {
        let mut idx = CompositeIndex::new();
        let a = Value::String("US".into());
        let b = Value::String("CA".into());
        idx.insert(&[&a, &b], &"n1".to_string());
        assert_eq!(idx.lookup_full(&[&a, &b]).len(), 1);
        assert_eq!(idx.lookup_prefix(&[&a]).len(), 1);
    }

    #[test]
    fn composite_index_remove_reverses_insert() {
        let mut idx = CompositeIndex::new();
        let a = Value::String("US".into());
        let b = Value::String("CA".into());
        idx.insert(&[&a, &b], &"n1".to_string());
        idx.remove(&[&a, &b], &"n1".to_string());
        assert!(idx.lookup_full(&[&a, &b]).is_empty());
        assert!(idx.lookup_prefix(&[&a]).is_empty());
    }
}
