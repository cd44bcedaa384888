use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::{decode_edge, decode_node, encode_edge, encode_node};
use crate::error::{GraphError, Result};
use crate::keys;
use crate::kv::Kv;
use crate::model::{Edge, EdgeId, Node, NodeId};
use crate::schema::SchemaManager;

use super::{CancelToken, Engine, IntegrityReport, StreamSink, VerifyOptions};

/// Maximum number of items prefetched per streaming window.
const PREFETCH_WINDOW: usize = 100;

/// The default [`Engine`] implementation: a graph store over [`Kv`], with
/// label and incidence indexes maintained alongside primary records and a
/// [`SchemaManager`] enforcing constraints.
pub struct PersistentEngine {
    kv: Kv,
    schema: Arc<SchemaManager>,
}

impl PersistentEngine {
    /// Opens an engine over a fresh or already-populated [`Kv`] instance.
    /// Recovery (`crate::wal`) is responsible for populating `kv` before
    /// handing it here.
    pub fn new(kv: Kv, schema: Arc<SchemaManager>) -> Self {
        Self { kv, schema }
    }

    /// The schema manager this engine enforces constraints through.
    pub fn schema(&self) -> &Arc<SchemaManager> {
        &self.schema
    }

    /// Direct access to the underlying KV store, for the WAL/recovery and
    /// cache layers.
    pub fn kv(&self) -> &Kv {
        &self.kv
    }

    /// Opens a buffered, read-your-writes [`crate::txn::Transaction`] over
    /// this engine.
    pub fn begin_transaction(&self) -> crate::txn::Transaction<'_> {
        crate::txn::Transaction::new(self)
    }

    fn load_node(&self, read: &crate::kv::ReadTxn, id: &str) -> Result<Node> {
        let bytes = read
            .get(&keys::node_key(id))
            .ok_or_else(|| GraphError::NotFound(format!("node '{id}'")))?;
        decode_node(&bytes)
    }

    fn load_edge(&self, read: &crate::kv::ReadTxn, id: &str) -> Result<Edge> {
        let bytes = read
            .get(&keys::edge_key(id))
            .ok_or_else(|| GraphError::NotFound(format!("edge '{id}'")))?;
        decode_edge(&bytes)
    }
}

impl Engine for PersistentEngine {
    fn create_node(&self, node: Node) -> Result<()> {
        crate::model::validate_id(&node.id)?;
        for label in &node.labels {
            self.schema.check_node(label, &node.id, &node.properties)?;
        }

        let mut txn = self.kv.begin_write()?;
        let key = keys::node_key(&node.id);
        if txn.get(&key).is_some() {
            return Err(GraphError::AlreadyExists(format!("node '{}'", node.id)));
        }
        txn.put(key, encode_node(&node)?);
        for label in &node.labels {
            txn.put(keys::label_index_key(label, &node.id), Vec::new());
        }
        txn.commit()?;

        for label in &node.labels {
            self.schema.record_node(label, &node.id, &node.properties);
        }
        Ok(())
    }

    fn get_node(&self, id: &NodeId) -> Result<Node> {
        let read = self.kv.begin_read()?;
        self.load_node(&read, id)
    }

    fn update_node(&self, node: Node) -> Result<()> {
        crate::model::validate_id(&node.id)?;
        let mut txn = self.kv.begin_write()?;
        let key = keys::node_key(&node.id);
        let previous = txn
            .get(&key)
            .ok_or_else(|| GraphError::NotFound(format!("node '{}'", node.id)))
            .and_then(|b| decode_node(&b))?;

        for label in &node.labels {
            self.schema.check_node(label, &node.id, &node.properties)?;
        }

        txn.put(key, encode_node(&node)?);

        for label in previous.labels.iter() {
            if !node.labels.iter().any(|l| l == label) {
                txn.delete(keys::label_index_key(label, &node.id));
            }
        }
        for label in &node.labels {
            if !previous.labels.iter().any(|l| l == label) {
                txn.put(keys::label_index_key(label, &node.id), Vec::new());
            }
        }
        txn.commit()?;

        for label in &previous.labels {
            self.schema.forget_node(label, &node.id, &previous.properties);
        }
        for label in &node.labels {
            self.schema.record_node(label, &node.id, &node.properties);
        }
        Ok(())
    }

    fn delete_node(&self, id: &NodeId) -> Result<()> {
        let mut txn = self.kv.begin_write()?;
        let key = keys::node_key(id);
        let node = txn
            .get(&key)
            .ok_or_else(|| GraphError::NotFound(format!("node '{id}'")))
            .and_then(|b| decode_node(&b))?;

        let mut edges_to_delete: Vec<(EdgeId, NodeId, NodeId)> = Vec::new();
        for (k, _) in txn.scan_prefix(&keys::outgoing_prefix(id)) {
            if let Some((_node_id, edge_id)) = keys::decode_incidence_key(&k) {
                let edge_bytes = txn
                    .get(&keys::edge_key(&edge_id))
                    .ok_or_else(|| GraphError::Internal(format!("dangling outgoing index row for '{edge_id}'")))?;
                let edge = decode_edge(&edge_bytes)?;
                edges_to_delete.push((edge_id, edge.start_node.clone(), edge.end_node.clone()));
            }
        }
        for (k, _) in txn.scan_prefix(&keys::incoming_prefix(id)) {
            if let Some((_node_id, edge_id)) = keys::decode_incidence_key(&k) {
                if edges_to_delete.iter().any(|(existing, _, _)| existing == &edge_id) {
                    continue;
                }
                let edge_bytes = txn
                    .get(&keys::edge_key(&edge_id))
                    .ok_or_else(|| GraphError::Internal(format!("dangling incoming index row for '{edge_id}'")))?;
                let edge = decode_edge(&edge_bytes)?;
                edges_to_delete.push((edge_id, edge.start_node.clone(), edge.end_node.clone()));
            }
        }

        for (edge_id, start, end) in &edges_to_delete {
            txn.delete(keys::edge_key(edge_id));
            txn.delete(keys::outgoing_key(start, edge_id));
            txn.delete(keys::incoming_key(end, edge_id));
        }

        for label in &node.labels {
            txn.delete(keys::label_index_key(label, id));
        }
        txn.delete(key);
        txn.commit()?;

        for label in &node.labels {
            self.schema.forget_node(label, id, &node.properties);
        }
        if !edges_to_delete.is_empty() {
            info!(node_id = %id, count = edges_to_delete.len(), "cascaded edge deletion");
        }
        Ok(())
    }

    fn create_edge(&self, edge: Edge) -> Result<()> {
        crate::model::validate_id(&edge.id)?;
        self.schema.check_relationship(&edge.edge_type, &edge.properties)?;

        let mut txn = self.kv.begin_write()?;
        let key = keys::edge_key(&edge.id);
        if txn.get(&key).is_some() {
            return Err(GraphError::AlreadyExists(format!("edge '{}'", edge.id)));
        }
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

        txn.put(key, encode_edge(&edge)?);
        txn.put(keys::outgoing_key(&edge.start_node, &edge.id), Vec::new());
        txn.put(keys::incoming_key(&edge.end_node, &edge.id), Vec::new());
        txn.commit()
    }

    fn get_edge(&self, id: &EdgeId) -> Result<Edge> {
        let read = self.kv.begin_read()?;
        self.load_edge(&read, id)
    }

    fn update_edge(&self, edge: Edge) -> Result<()> {
        crate::model::validate_id(&edge.id)?;
        self.schema.check_relationship(&edge.edge_type, &edge.properties)?;

        let mut txn = self.kv.begin_write()?;
        let key = keys::edge_key(&edge.id);
        let previous = txn
            .get(&key)
            .ok_or_else(|| GraphError::NotFound(format!("edge '{}'", edge.id)))
            .and_then(|b| decode_edge(&b))?;

        if previous.start_node != edge.start_node || previous.end_node != edge.end_node {
            return Err(GraphError::InvalidEdge(
                "start/end node cannot change after creation".into(),
            ));
        }

        txn.put(key, encode_edge(&edge)?);
        txn.commit()
    }

    fn delete_edge(&self, id: &EdgeId) -> Result<()> {
        let mut txn = self.kv.begin_write()?;
        let key = keys::edge_key(id);
        let edge = txn
            .get(&key)
            .ok_or_else(|| GraphError::NotFound(format!("edge '{id}'")))
            .and_then(|b| decode_edge(&b))?;

        txn.delete(key);
        txn.delete(keys::outgoing_key(&edge.start_node, id));
        txn.delete(keys::incoming_key(&edge.end_node, id));
        txn.commit()
    }

    fn get_nodes_by_label(&self, label: &str) -> Result<Vec<NodeId>> {
        let read = self.kv.begin_read()?;
        Ok(read
            .scan_prefix(&keys::label_index_prefix(label))
            .into_iter()
            .filter_map(|(k, _)| keys::decode_label_index_key(&k).map(|(_, id)| id))
            .collect())
    }

    fn get_outgoing_edges(&self, node_id: &NodeId) -> Result<Vec<EdgeId>> {
        let read = self.kv.begin_read()?;
        Ok(read
            .scan_prefix(&keys::outgoing_prefix(node_id))
            .into_iter()
            .filter_map(|(k, _)| keys::decode_incidence_key(&k).map(|(_, edge_id)| edge_id))
            .collect())
    }

    fn get_incoming_edges(&self, node_id: &NodeId) -> Result<Vec<EdgeId>> {
        let read = self.kv.begin_read()?;
        Ok(read
            .scan_prefix(&keys::incoming_prefix(node_id))
            .into_iter()
            .filter_map(|(k, _)| keys::decode_incidence_key(&k).map(|(_, edge_id)| edge_id))
            .collect())
    }

    fn get_edges_between(&self, start: &NodeId, end: &NodeId) -> Result<Vec<EdgeId>> {
        let read = self.kv.begin_read()?;
        let mut out = Vec::new();
        for edge_id in self.get_outgoing_edges(start)? {
            let edge = self.load_edge(&read, &edge_id)?;
            if &edge.end_node == end {
                out.push(edge_id);
            }
        }
        Ok(out)
    }

    fn all_nodes(&self) -> Result<Vec<NodeId>> {
        let read = self.kv.begin_read()?;
        Ok(read
            .scan_prefix(&keys::all_nodes_prefix())
            .into_iter()
            .filter_map(|(k, _)| keys::decode_id_key(&k))
            .collect())
    }

    fn all_edges(&self) -> Result<Vec<EdgeId>> {
        let read = self.kv.begin_read()?;
        Ok(read
            .scan_prefix(&keys::all_edges_prefix())
            .into_iter()
            .filter_map(|(k, _)| keys::decode_id_key(&k))
            .collect())
    }

    fn create_nodes_bulk(&self, nodes: Vec<Node>) -> Result<()> {
        for node in &nodes {
            crate::model::validate_id(&node.id)?;
        }
        self.schema.check_batch(
            nodes
                .iter()
                .flat_map(|n| n.labels.iter().map(move |l| (l.as_str(), &n.id, &n.properties))),
        )?;

        let mut txn = self.kv.begin_write()?;
        for node in &nodes {
            let key = keys::node_key(&node.id);
            if txn.get(&key).is_some() {
                return Err(GraphError::AlreadyExists(format!("node '{}'", node.id)));
            }
            txn.put(key, encode_node(node)?);
            for label in &node.labels {
                txn.put(keys::label_index_key(label, &node.id), Vec::new());
            }
        }
        txn.commit()?;
        for node in &nodes {
            for label in &node.labels {
                self.schema.record_node(label, &node.id, &node.properties);
            }
        }
        Ok(())
    }

    fn delete_nodes_bulk(&self, ids: &[NodeId]) -> Result<()> {
        for id in ids {
            self.delete_node(id)?;
        }
        Ok(())
    }

    fn node_count(&self) -> Result<usize> {
        Ok(self.all_nodes()?.len())
    }

    fn edge_count(&self) -> Result<usize> {
        Ok(self.all_edges()?.len())
    }

    fn stream_nodes(&self, cancel: &dyn CancelToken, sink: &mut dyn StreamSink<Node>) -> Result<()> {
        let read = self.kv.begin_read()?;
        let rows = read.scan_prefix(&keys::all_nodes_prefix());
        for chunk in rows.chunks(PREFETCH_WINDOW) {
            for (_, bytes) in chunk {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let node = decode_node(bytes)?;
                if !sink.accept(node) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn stream_edges(&self, cancel: &dyn CancelToken, sink: &mut dyn StreamSink<Edge>) -> Result<()> {
        let read = self.kv.begin_read()?;
        let rows = read.scan_prefix(&keys::all_edges_prefix());
        for chunk in rows.chunks(PREFETCH_WINDOW) {
            for (_, bytes) in chunk {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let edge = decode_edge(bytes)?;
                if !sink.accept(edge) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn stream_node_chunks(
        &self,
        chunk_size: usize,
        cancel: &dyn CancelToken,
        sink: &mut dyn StreamSink<Vec<Node>>,
    ) -> Result<()> {
        let chunk_size = chunk_size.max(1);
        let read = self.kv.begin_read()?;
        let rows = read.scan_prefix(&keys::all_nodes_prefix());
        for batch in rows.chunks(chunk_size) {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut nodes = Vec::with_capacity(batch.len());
            for (_, bytes) in batch {
                nodes.push(decode_node(bytes)?);
            }
            if !sink.accept(nodes) {
                return Ok(());
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.kv.close();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.kv.sync()
    }

    fn run_gc(&self) -> Result<()> {
        self.kv.run_gc()
    }

    fn verify(&self, options: VerifyOptions) -> Result<IntegrityReport> {
        let max_errors = if options.max_errors == 0 {
            usize::MAX
        } else {
            options.max_errors
        };
        let mut report = IntegrityReport::default();
        let read = self.kv.begin_read()?;

        let node_rows = read.scan_prefix(&keys::all_nodes_prefix());
        let mut node_ids = std::collections::HashSet::new();
        for (k, v) in &node_rows {
            report.checked_nodes += 1;
            match decode_node(v) {
                Ok(node) => {
                    node_ids.insert(node.id.clone());
                    if keys::decode_id_key(k).as_deref() != Some(node.id.as_str()) {
                        report.record_errors += 1;
                        report.push_error(max_errors, format!("node key/id mismatch for '{}'", node.id));
                    }
                }
                Err(e) => {
                    report.record_errors += 1;
                    report.push_error(max_errors, format!("undecodable node record: {e}"));
                }
            }
        }

        if options.checksum_only {
            return Ok(report);
        }

        if options.verify_indexes {
            for (k, v) in &node_rows {
                if let Ok(node) = decode_node(v) {
                    for label in &node.labels {
                        if read.get(&keys::label_index_key(label, &node.id)).is_none() {
                            report.index_errors += 1;
                            report.push_error(
                                max_errors,
                                format!("missing label-index row for '{}' under '{}'", node.id, label),
                            );
                        }
                    }
                }
                let _ = k;
            }
        }

        let edge_rows = read.scan_prefix(&keys::all_edges_prefix());
        for (_, v) in &edge_rows {
            report.checked_edges += 1;
            match decode_edge(v) {
                Ok(edge) => {
                    if options.verify_adjacency {
                        if !node_ids.contains(&edge.start_node) {
                            report.adjacency_errors += 1;
                            report.push_error(
                                max_errors,
                                format!("edge '{}' references missing start node '{}'", edge.id, edge.start_node),
                            );
                        }
                        if read
                            .get(&keys::outgoing_key(&edge.start_node, &edge.id))
                            .is_none()
                        {
                            report.index_errors += 1;
                            report.push_error(
                                max_errors,
                                format!("missing outgoing-index row for edge '{}'", edge.id),
                            );
                        }
                        if read
                            .get(&keys::incoming_key(&edge.end_node, &edge.id))
                            .is_none()
                        {
                            report.index_errors += 1;
                            report.push_error(
                                max_errors,
                                format!("missing incoming-index row for edge '{}'", edge.id),
                            );
                        }
                    }
                }
                Err(e) => {
                    report.record_errors += 1;
                    report.push_error(max_errors, format!("undecodable edge record: {e}"));
                }
            }
        }

        if !report.is_clean() {
            warn!(
                record_errors = report.record_errors,
                index_errors = report.index_errors,
                adjacency_errors = report.adjacency_errors,
                "integrity verification found inconsistencies"
            );
        }
        Ok(report)
    }
}
