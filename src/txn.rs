//! C6: ACID transactions over [`PersistentEngine`] — buffered ops,
//! read-your-writes, constraint pre-validation at commit, atomic apply,
//! rollback.

use crate::codec::{decode_edge, decode_node, encode_edge, encode_node};
use crate::engine::{Engine, PersistentEngine};
use crate::error::{GraphError, Result};
use crate::keys;
use crate::model::{Edge, EdgeId, Node, NodeId};
use crate::schema::Constraint;

/// Maximum length of [`Transaction::set_metadata`]'s string.
pub const MAX_METADATA_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// A buffered, read-your-writes transaction over a [`PersistentEngine`].
/// Every mutation is staged in-memory; nothing is visible to other readers
/// until [`Transaction::commit`] applies the whole batch as one KV
/// transaction.
pub struct Transaction<'e> {
    engine: &'e PersistentEngine,
    state: TxState,
    pending_nodes: std::collections::HashMap<NodeId, Option<Node>>,
    pending_edges: std::collections::HashMap<EdgeId, Option<Edge>>,
    op_order: Vec<Op>,
    metadata: String,
}

#[derive(Debug, Clone)]
enum Op {
    Node(NodeId),
    Edge(EdgeId),
}

impl<'e> Transaction<'e> {
    pub(crate) fn new(engine: &'e PersistentEngine) -> Self {
        Self {
            engine,
            state: TxState::Active,
            pending_nodes: std::collections::HashMap::new(),
            pending_edges: std::collections::HashMap::new(),
            op_order: Vec::new(),
            metadata: String::new(),
        }
    }

    /// Attaches up to [`MAX_METADATA_LEN`] characters of informational
    /// metadata, logged on commit.
    pub fn set_metadata(&mut self, metadata: impl Into<String>) -> Result<()> {
        let metadata = metadata.into();
        if metadata.chars().count() > MAX_METADATA_LEN {
            return Err(GraphError::InvalidData(format!(
                "transaction metadata exceeds {MAX_METADATA_LEN} characters"
            )));
        }
        self.metadata = metadata;
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(GraphError::TransactionClosed);
        }
        Ok(())
    }

    /// Read-your-writes node lookup: deleted set, then pending set, then
    /// the committed engine.
    pub fn get_node(&self, id: &NodeId) -> Result<Node> {
        self.ensure_active()?;
        match self.pending_nodes.get(id) {
            Some(Some(node)) => Ok(node.clone()),
            Some(None) => Err(GraphError::NotFound(format!("node '{id}'"))),
            None => self.engine.get_node(id),
        }
    }

    /// Read-your-writes edge lookup.
    pub fn get_edge(&self, id: &EdgeId) -> Result<Edge> {
        self.ensure_active()?;
        match self.pending_edges.get(id) {
            Some(Some(edge)) => Ok(edge.clone()),
            Some(None) => Err(GraphError::NotFound(format!("edge '{id}'"))),
            None => self.engine.get_edge(id),
        }
    }

    /// Stages a node creation. Fails immediately if the ID is already
    /// pending or already committed (no distinction from a direct
    /// `Engine::create_node` here — duplicate detection doesn't need to
    /// wait for commit).
    pub fn create_node(&mut self, node: Node) -> Result<()> {
        self.ensure_active()?;
        crate::model::validate_id(&node.id)?;
        if self.node_visible(&node.id) {
            return Err(GraphError::AlreadyExists(format!("node '{}'", node.id)));
        }
        self.op_order.push(Op::Node(node.id.clone()));
        self.pending_nodes.insert(node.id.clone(), Some(node));
        Ok(())
    }

    fn node_visible(&self, id: &NodeId) -> bool {
        match self.pending_nodes.get(id) {
            Some(Some(_)) => true,
            Some(None) => false,
            None => self.engine.get_node(id).is_ok(),
        }
    }

    fn edge_visible(&self, id: &EdgeId) -> bool {
        match self.pending_edges.get(id) {
            Some(Some(_)) => true,
            Some(None) => false,
            None => self.engine.get_edge(id).is_ok(),
        }
    }

    /// Stages a node update.
    pub fn update_node(&mut self, node: Node) -> Result<()> {
        self.ensure_active()?;
        if !self.node_visible(&node.id) {
            return Err(GraphError::NotFound(format!("node '{}'", node.id)));
        }
        self.op_order.push(Op::Node(node.id.clone()));
        self.pending_nodes.insert(node.id.clone(), Some(node));
        Ok(())
    }

    /// Stages a node deletion.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.ensure_active()?;
        if !self.node_visible(&id) {
            return Err(GraphError::NotFound(format!("node '{id}'")));
        }
        self.op_order.push(Op::Node(id.clone()));
        self.pending_nodes.insert(id, None);
        Ok(())
    }

    /// Stages an edge creation.
    pub fn create_edge(&mut self, edge: Edge) -> Result<()> {
        self.ensure_active()?;
        crate::model::validate_id(&edge.id)?;
        if self.edge_visible(&edge.id) {
            return Err(GraphError::AlreadyExists(format!("edge '{}'", edge.id)));
        }
        if !self.node_visible(&edge.start_node) {
            return Err(GraphError::InvalidEdge(format!(
                "start node '{}' does not exist",
                edge.start_node
            )));
        }
        if !self.node_visible(&edge.end_node) {
            return Err(GraphError::InvalidEdge(format!(
                "end node '{}' does not exist",
                edge.end_node
            )));
        }
        self.op_order.push(Op::Edge(edge.id.clone()));
        self.pending_edges.insert(edge.id.clone(), Some(edge));
        Ok(())
    }

    /// Stages an edge update.
    pub fn update_edge(&mut self, edge: Edge) -> Result<()> {
        self.ensure_active()?;
        if !self.edge_visible(&edge.id) {
            return Err(GraphError::NotFound(format!("edge '{}'", edge.id)));
        }
        self.op_order.push(Op::Edge(edge.id.clone()));
        self.pending_edges.insert(edge.id.clone(), Some(edge));
        Ok(())
    }

    /// Stages an edge deletion.
    pub fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        self.ensure_active()?;
        if !self.edge_visible(&id) {
            return Err(GraphError::NotFound(format!("edge '{id}'")));
        }
        self.op_order.push(Op::Edge(id.clone()));
        self.pending_edges.insert(id, None);
        Ok(())
    }

    /// Validates every pending op against the schema one more time, then
    /// applies the whole batch as a single KV transaction. If validation or
    /// application fails, nothing staged in this transaction becomes
    /// visible.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;

        let creates: Vec<_> = self
            .pending_nodes
            .values()
            .filter_map(|v| v.as_ref())
            .filter(|n| self.engine.get_node(&n.id).is_err())
            .collect();
        self.engine.schema().check_batch(
            creates
                .iter()
                .flat_map(|n| n.labels.iter().map(move |l| (l.as_str(), &n.id, &n.properties))),
        )?;
        for node in self
            .pending_nodes
            .values()
            .filter_map(|v| v.as_ref())
            .filter(|n| self.engine.get_node(&n.id).is_ok())
        {
            for label in &node.labels {
                self.engine.schema().check_node(label, &node.id, &node.properties)?;
            }
        }
        for edge in self.pending_edges.values().filter_map(|v| v.as_ref()) {
            self.engine.schema().check_relationship(&edge.edge_type, &edge.properties)?;
        }

        let kv = self.engine.kv();
        let mut txn = kv.begin_write()?;

        // Nodes first: edges staged in the same transaction may reference
        // nodes created earlier in this same batch.
        let mut applied_node_changes: Vec<(NodeId, Option<Node>, Option<Node>)> = Vec::new();
        for (id, new_value) in self.pending_nodes.iter() {
            let key = keys::node_key(id);
            let previous = txn.get(&key).and_then(|b| decode_node(&b).ok());
            match new_value {
                Some(node) => {
                    txn.put(key, encode_node(node)?);
                    if let Some(prev) = &previous {
                        for label in &prev.labels {
                            if !node.labels.contains(label) {
                                txn.delete(keys::label_index_key(label, id));
                            }
                        }
                    }
                    for label in &node.labels {
                        let already = previous.as_ref().map(|p| p.labels.contains(label)).unwrap_or(false);
                        if !already {
                            txn.put(keys::label_index_key(label, id), Vec::new());
                        }
                    }
                }
                None => {
                    if let Some(prev) = &previous {
                        for (k, _) in txn.scan_prefix(&keys::outgoing_prefix(id)) {
                            if let Some((_, edge_id)) = keys::decode_incidence_key(&k) {
                                self.pending_edges.insert(edge_id, None);
                            }
                        }
                        for (k, _) in txn.scan_prefix(&keys::incoming_prefix(id)) {
                            if let Some((_, edge_id)) = keys::decode_incidence_key(&k) {
                                self.pending_edges.insert(edge_id, None);
                            }
                        }
                        for label in &prev.labels {
                            txn.delete(keys::label_index_key(label, id));
                        }
                    }
                    txn.delete(key);
                }
            }
            applied_node_changes.push((id.clone(), previous, new_value.clone()));
        }

        for (id, new_value) in self.pending_edges.iter() {
            let key = keys::edge_key(id);
            let previous = txn.get(&key).and_then(|b| decode_edge(&b).ok());
            match new_value {
                Some(edge) => {
                    if txn.get(&keys::node_key(&edge.start_node)).is_none() {
                        return Err(GraphError::InvalidEdge(format!(
                            "start node '{}' does not exist",
                            edge.start_node
                        )));
                    }
                    if txn.get(&keys::node_key(&edge.end_node)).is_none() {
                        return Err(GraphError::InvalidEdge(format!(
                            "end node '{}' does not exist",
                            edge.end_node
                        )));
                    }
                    txn.put(key, encode_edge(edge)?);
                    if previous.is_none() {
                        txn.put(keys::outgoing_key(&edge.start_node, id), Vec::new());
                        txn.put(keys::incoming_key(&edge.end_node, id), Vec::new());
                    }
                }
                None => {
                    if let Some(prev) = &previous {
                        txn.delete(keys::outgoing_key(&prev.start_node, id));
                        txn.delete(keys::incoming_key(&prev.end_node, id));
                    }
                    txn.delete(key);
                }
            }
        }

        txn.commit()?;

        for (id, previous, new_value) in &applied_node_changes {
            if let Some(prev) = previous {
                for label in &prev.labels {
                    self.engine.schema().forget_node(label, id, &prev.properties);
                }
            }
            if let Some(node) = new_value {
                for label in &node.labels {
                    self.engine.schema().record_node(label, id, &node.properties);
                }
            }
        }

        if !self.metadata.is_empty() {
            tracing::info!(metadata = %self.metadata, "transaction committed");
        }
        self.state = TxState::Committed;
        Ok(())
    }

    /// Discards every staged op.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxState::RolledBack;
        Ok(())
    }
}

impl<'e> Drop for Transaction<'e> {
    fn drop(&mut self) {
        if self.state == TxState::Active && !std::thread::panicking() {
            panic!("transaction dropped without commit or rollback");
        }
    }
}

/// Registers `constraint`, validating it against every currently stored
/// node carrying the constraint's label.
pub fn register_constraint_against_engine(
    engine: &PersistentEngine,
    constraint: Constraint,
) -> Result<()> {
    let node_ids = engine.all_nodes()?;
    let mut nodes = Vec::with_capacity(node_ids.len());
    for id in &node_ids {
        nodes.push(engine.get_node(id)?);
    }
    engine
        .schema()
        .register_constraint(constraint, nodes.iter().map(|n| (&n.id, &n.properties)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;
    use crate::schema::SchemaManager;
    use std::sync::Arc;

    fn engine() -> PersistentEngine {
        PersistentEngine::new(Kv::new(), Arc::new(SchemaManager::new()))
    }

    #[test]
    fn transaction_commit_is_visible_after_commit() {
        let engine = engine();
        let mut tx = Transaction::new(&engine);
        tx.create_node(Node::new("a")).unwrap();
        tx.create_node(Node::new("b")).unwrap();
        tx.create_edge(Edge::new("e1", "a", "b", "KNOWS")).unwrap();
        tx.commit().unwrap();

        assert!(engine.get_node(&"a".to_string()).is_ok());
        assert!(engine.get_edge(&"e1".to_string()).is_ok());
    }

    #[test]
    fn read_your_writes_inside_transaction() {
        let engine = engine();
        let mut tx = Transaction::new(&engine);
        tx.create_node(Node::new("a")).unwrap();
        assert!(tx.get_node(&"a".to_string()).is_ok());
        tx.delete_node("a".to_string()).unwrap();
        assert!(matches!(
            tx.get_node(&"a".to_string()).unwrap_err(),
            GraphError::NotFound(_)
        ));
        tx.rollback().unwrap();
    }

    #[test]
    fn rollback_leaves_no_trace() {
        let engine = engine();
        let mut tx = Transaction::new(&engine);
        tx.create_node(Node::new("a")).unwrap();
        tx.rollback().unwrap();
        assert!(matches!(
            engine.get_node(&"a".to_string()).unwrap_err(),
            GraphError::NotFound(_)
        ));
    }

    #[test]
    fn constraint_violation_at_commit_rolls_back_whole_transaction() {
        let engine = engine();
        register_constraint_against_engine(
            &engine,
            Constraint::Unique {
                label: "User".into(),
                property: "email".into(),
            },
        )
        .unwrap();
        engine
            .create_node(
                Node::new("u1")
                    .with_label("User")
                    .with_property("email", crate::model::Value::String("a@x".into())),
            )
            .unwrap();

        let mut tx = Transaction::new(&engine);
        tx.create_node(Node::new("u2").with_label("User").with_property(
            "email",
            crate::model::Value::String("unique@x".into()),
        ))
        .unwrap();
        tx.create_node(
            Node::new("u3")
                .with_label("User")
                .with_property("email", crate::model::Value::String("a@x".into())),
        )
        .unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, GraphError::ConstraintViolation { .. }));
        assert!(matches!(
            engine.get_node(&"u2".to_string()).unwrap_err(),
            GraphError::NotFound(_)
        ));
    }

    #[test]
    fn metadata_over_limit_is_rejected() {
        let engine = engine();
        let mut tx = Transaction::new(&engine);
        let oversized = "x".repeat(MAX_METADATA_LEN + 1);
        assert!(tx.set_metadata(oversized).is_err());
        tx.rollback().unwrap();
    }
}
