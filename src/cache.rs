//! C8: async write-behind cache wrapping any [`Engine`]. Writes land in an
//! in-memory pending set and return immediately; a background ticker (or an
//! explicit [`CacheEngine::flush`]) applies them to the wrapped engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::engine::{CancelToken, Engine, IntegrityReport, StreamSink, VerifyOptions};
use crate::error::{GraphError, Result};
use crate::model::{Edge, EdgeId, Node, NodeId};

#[derive(Default)]
struct CacheState {
    pending_nodes: HashMap<NodeId, Arc<Node>>,
    pending_edges: HashMap<EdgeId, Arc<Edge>>,
    deleted_nodes: HashSet<NodeId>,
    deleted_edges: HashSet<EdgeId>,
    /// `lowercase(label) -> pending node ids`, so label lookups don't have
    /// to scan every pending node.
    label_index: HashMap<String, HashSet<NodeId>>,
}

/// Tally produced by one [`CacheEngine::flush`] pass.
#[derive(Debug, Default, Clone)]
pub struct FlushResult {
    pub nodes_written: usize,
    pub nodes_deleted: usize,
    pub nodes_failed: usize,
    pub edges_written: usize,
    pub edges_deleted: usize,
    pub edges_failed: usize,
    pub failed_ids: Vec<String>,
}

impl FlushResult {
    pub fn is_clean(&self) -> bool {
        self.nodes_failed == 0 && self.edges_failed == 0
    }
}

/// Wraps an [`Engine`] with a write-behind cache. Reads consult the pending
/// set first so callers never observe a write they just made as missing.
pub struct CacheEngine<E: Engine + 'static> {
    inner: Arc<E>,
    state: Mutex<CacheState>,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    accepting_writes: AtomicBool,
}

impl<E: Engine + 'static> CacheEngine<E> {
    /// Wraps `inner`, spawning a background task that flushes every
    /// `flush_interval`. Must be called from within a running Tokio runtime.
    pub fn new(inner: E, flush_interval: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            inner: Arc::new(inner),
            state: Mutex::new(CacheState::default()),
            flush_task: Mutex::new(None),
            accepting_writes: AtomicBool::new(true),
        });

        let ticker = Arc::clone(&cache);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            loop {
                interval.tick().await;
                if !ticker.accepting_writes.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = ticker.flush() {
                    warn!(error = %e, "cache flush tick failed");
                }
            }
        });
        *cache.flush_task.lock() = Some(handle);
        cache
    }

    fn ensure_accepting_writes(&self) -> Result<()> {
        if !self.accepting_writes.load(Ordering::Acquire) {
            return Err(GraphError::StorageClosed);
        }
        Ok(())
    }

    fn node_exists_upstream(&self, id: &NodeId) -> bool {
        self.inner.get_node(id).is_ok()
    }

    fn edge_exists_upstream(&self, id: &EdgeId) -> bool {
        self.inner.get_edge(id).is_ok()
    }

    /// Applies every pending write to the wrapped engine. Deletes first,
    /// then node upserts, then edge upserts; an item is only cleared from
    /// the pending maps if it wasn't rewritten again since the snapshot was
    /// taken (checked via `Arc::ptr_eq`), so a concurrent write during flush
    /// survives for the next cycle instead of being silently dropped.
    pub fn flush(&self) -> Result<FlushResult> {
        let (nodes_snapshot, edges_snapshot, node_deletes, edge_deletes) = {
            let state = self.state.lock();
            (
                state.pending_nodes.clone(),
                state.pending_edges.clone(),
                state.deleted_nodes.clone(),
                state.deleted_edges.clone(),
            )
        };

        let mut result = FlushResult::default();

        let mut applied_node_deletes = Vec::new();
        if !node_deletes.is_empty() {
            let ids: Vec<NodeId> = node_deletes.iter().cloned().collect();
            if self.inner.delete_nodes_bulk(&ids).is_ok() {
                result.nodes_deleted += ids.len();
                applied_node_deletes = ids;
            } else {
                for id in ids {
                    match self.inner.delete_node(&id) {
                        Ok(()) | Err(GraphError::NotFound(_)) => {
                            result.nodes_deleted += 1;
                            applied_node_deletes.push(id);
                        }
                        Err(_) => {
                            result.nodes_failed += 1;
                            result.failed_ids.push(id);
                        }
                    }
                }
            }
        }

        let mut applied_edge_deletes = Vec::new();
        for id in &edge_deletes {
            match self.inner.delete_edge(id) {
                Ok(()) | Err(GraphError::NotFound(_)) => {
                    result.edges_deleted += 1;
                    applied_edge_deletes.push(id.clone());
                }
                Err(_) => {
                    result.edges_failed += 1;
                    result.failed_ids.push(id.clone());
                }
            }
        }

        let mut applied_node_upserts = Vec::new();
        for (id, node) in &nodes_snapshot {
            let outcome = if self.node_exists_upstream(id) {
                self.inner.update_node((**node).clone())
            } else {
                self.inner.create_node((**node).clone())
            };
            match outcome {
                Ok(()) => {
                    result.nodes_written += 1;
                    applied_node_upserts.push(id.clone());
                }
                Err(_) => {
                    result.nodes_failed += 1;
                    result.failed_ids.push(id.clone());
                }
            }
        }

        let mut applied_edge_upserts = Vec::new();
        for (id, edge) in &edges_snapshot {
            let outcome = match self.inner.create_edge((**edge).clone()) {
                Ok(()) => Ok(()),
                Err(GraphError::AlreadyExists(_)) => self.inner.update_edge((**edge).clone()),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    result.edges_written += 1;
                    applied_edge_upserts.push(id.clone());
                }
                Err(_) => {
                    result.edges_failed += 1;
                    result.failed_ids.push(id.clone());
                }
            }
        }

        let mut state = self.state.lock();
        for id in applied_node_deletes {
            state.deleted_nodes.remove(&id);
        }
        for id in applied_edge_deletes {
            state.deleted_edges.remove(&id);
        }
        for id in applied_node_upserts {
            let still_same = matches!(
                (state.pending_nodes.get(&id), nodes_snapshot.get(&id)),
                (Some(current), Some(snapshot)) if Arc::ptr_eq(current, snapshot)
            );
            if still_same {
                if let Some(node) = state.pending_nodes.remove(&id) {
                    for label in &node.labels {
                        if let Some(set) = state.label_index.get_mut(&label.to_lowercase()) {
                            set.remove(&id);
                        }
                    }
                }
            }
        }
        for id in applied_edge_upserts {
            let still_same = matches!(
                (state.pending_edges.get(&id), edges_snapshot.get(&id)),
                (Some(current), Some(snapshot)) if Arc::ptr_eq(current, snapshot)
            );
            if still_same {
                state.pending_edges.remove(&id);
            }
        }

        Ok(result)
    }

    fn stage_node(&self, node: Node) {
        let mut state = self.state.lock();
        state.deleted_nodes.remove(&node.id);
        for label in &node.labels {
            state
                .label_index
                .entry(label.to_lowercase())
                .or_default()
                .insert(node.id.clone());
        }
        state.pending_nodes.insert(node.id.clone(), Arc::new(node));
    }
}

impl<E: Engine + 'static> Engine for CacheEngine<E> {
    fn create_node(&self, node: Node) -> Result<()> {
        self.ensure_accepting_writes()?;
        crate::model::validate_id(&node.id)?;
        if self.get_node(&node.id).is_ok() {
            return Err(GraphError::AlreadyExists(format!("node '{}'", node.id)));
        }
        self.stage_node(node);
        Ok(())
    }

    fn get_node(&self, id: &NodeId) -> Result<Node> {
        let state = self.state.lock();
        if state.deleted_nodes.contains(id) {
            return Err(GraphError::NotFound(format!("node '{id}'")));
        }
        if let Some(node) = state.pending_nodes.get(id) {
            return Ok((**node).clone());
        }
        drop(state);
        self.inner.get_node(id)
    }

    fn update_node(&self, node: Node) -> Result<()> {
        self.ensure_accepting_writes()?;
        let previous_labels = {
            let state = self.state.lock();
            if state.deleted_nodes.contains(&node.id) {
                None
            } else if let Some(n) = state.pending_nodes.get(&node.id) {
                Some(n.labels.clone())
            } else {
                drop(state);
                match self.inner.get_node(&node.id) {
                    Ok(n) => Some(n.labels),
                    Err(_) => None,
                }
            }
        };
        let previous_labels = previous_labels.ok_or_else(|| GraphError::NotFound(format!("node '{}'", node.id)))?;

        let mut state = self.state.lock();
        for label in &previous_labels {
            if !node.labels.contains(label) {
                if let Some(set) = state.label_index.get_mut(&label.to_lowercase()) {
                    set.remove(&node.id);
                }
            }
        }
        drop(state);
        self.stage_node(node);
        Ok(())
    }

    fn delete_node(&self, id: &NodeId) -> Result<()> {
        self.ensure_accepting_writes()?;
        let mut state = self.state.lock();
        if state.deleted_nodes.contains(id) {
            return Err(GraphError::NotFound(format!("node '{id}'")));
        }
        let pending = state.pending_nodes.remove(id);
        let exists_upstream = {
            drop(state);
            let exists = self.node_exists_upstream(id);
            state = self.state.lock();
            exists
        };
        if pending.is_none() && !exists_upstream {
            return Err(GraphError::NotFound(format!("node '{id}'")));
        }
        if let Some(node) = &pending {
            for label in &node.labels {
                if let Some(set) = state.label_index.get_mut(&label.to_lowercase()) {
                    set.remove(id);
                }
            }
        }
        if exists_upstream {
            state.deleted_nodes.insert(id.clone());
        }
        Ok(())
    }

    fn create_edge(&self, edge: Edge) -> Result<()> {
        self.ensure_accepting_writes()?;
        crate::model::validate_id(&edge.id)?;
        if self.get_edge(&edge.id).is_ok() {
            return Err(GraphError::AlreadyExists(format!("edge '{}'", edge.id)));
        }
        if self.get_node(&edge.start_node).is_err() {
            return Err(GraphError::InvalidEdge(format!(
                "start node '{}' does not exist",
                edge.start_node
            )));
        }
        if self.get_node(&edge.end_node).is_err() {
            return Err(GraphError::InvalidEdge(format!(
                "end node '{}' does not exist",
                edge.end_node
            )));
        }
        let mut state = self.state.lock();
        state.deleted_edges.remove(&edge.id);
        state.pending_edges.insert(edge.id.clone(), Arc::new(edge));
        Ok(())
    }

    fn get_edge(&self, id: &EdgeId) -> Result<Edge> {
        let state = self.state.lock();
        if state.deleted_edges.contains(id) {
            return Err(GraphError::NotFound(format!("edge '{id}'")));
        }
        if let Some(edge) = state.pending_edges.get(id) {
            return Ok((**edge).clone());
        }
        drop(state);
        self.inner.get_edge(id)
    }

    fn update_edge(&self, edge: Edge) -> Result<()> {
        self.ensure_accepting_writes()?;
        if self.get_edge(&edge.id).is_err() {
            return Err(GraphError::NotFound(format!("edge '{}'", edge.id)));
        }
        let mut state = self.state.lock();
        state.pending_edges.insert(edge.id.clone(), Arc::new(edge));
        Ok(())
    }

    fn delete_edge(&self, id: &EdgeId) -> Result<()> {
        self.ensure_accepting_writes()?;
        let mut state = self.state.lock();
        if state.deleted_edges.contains(id) {
            return Err(GraphError::NotFound(format!("edge '{id}'")));
        }
        let pending = state.pending_edges.remove(id);
        let exists_upstream = {
            drop(state);
            let exists = self.edge_exists_upstream(id);
            state = self.state.lock();
            exists
        };
        if pending.is_none() && !exists_upstream {
            return Err(GraphError::NotFound(format!("edge '{id}'")));
        }
        if exists_upstream {
            state.deleted_edges.insert(id.clone());
        }
        Ok(())
    }

    fn get_nodes_by_label(&self, label: &str) -> Result<Vec<NodeId>> {
        let mut ids: HashSet<NodeId> = self.inner.get_nodes_by_label(label)?.into_iter().collect();
        let state = self.state.lock();
        if let Some(set) = state.label_index.get(&label.to_lowercase()) {
            ids.extend(set.iter().cloned());
        }
        ids.retain(|id| !state.deleted_nodes.contains(id));
        Ok(ids.into_iter().collect())
    }

    fn get_outgoing_edges(&self, node_id: &NodeId) -> Result<Vec<EdgeId>> {
        let mut ids: HashSet<EdgeId> = self.inner.get_outgoing_edges(node_id)?.into_iter().collect();
        let state = self.state.lock();
        for (id, edge) in &state.pending_edges {
            if &edge.start_node == node_id {
                ids.insert(id.clone());
            }
        }
        ids.retain(|id| !state.deleted_edges.contains(id));
        Ok(ids.into_iter().collect())
    }

    fn get_incoming_edges(&self, node_id: &NodeId) -> Result<Vec<EdgeId>> {
        let mut ids: HashSet<EdgeId> = self.inner.get_incoming_edges(node_id)?.into_iter().collect();
        let state = self.state.lock();
        for (id, edge) in &state.pending_edges {
            if &edge.end_node == node_id {
                ids.insert(id.clone());
            }
        }
        ids.retain(|id| !state.deleted_edges.contains(id));
        Ok(ids.into_iter().collect())
    }

    fn get_edges_between(&self, start: &NodeId, end: &NodeId) -> Result<Vec<EdgeId>> {
        Ok(self
            .get_outgoing_edges(start)?
            .into_iter()
            .filter(|id| self.get_edge(id).map(|e| &e.end_node == end).unwrap_or(false))
            .collect())
    }

    fn all_nodes(&self) -> Result<Vec<NodeId>> {
        let mut ids: HashSet<NodeId> = self.inner.all_nodes()?.into_iter().collect();
        let state = self.state.lock();
        ids.extend(state.pending_nodes.keys().cloned());
        ids.retain(|id| !state.deleted_nodes.contains(id));
        Ok(ids.into_iter().collect())
    }

    fn all_edges(&self) -> Result<Vec<EdgeId>> {
        let mut ids: HashSet<EdgeId> = self.inner.all_edges()?.into_iter().collect();
        let state = self.state.lock();
        ids.extend(state.pending_edges.keys().cloned());
        ids.retain(|id| !state.deleted_edges.contains(id));
        Ok(ids.into_iter().collect())
    }

    fn create_nodes_bulk(&self, nodes: Vec<Node>) -> Result<()> {
        self.ensure_accepting_writes()?;
        for node in &nodes {
            crate::model::validate_id(&node.id)?;
            if self.get_node(&node.id).is_ok() {
                return Err(GraphError::AlreadyExists(format!("node '{}'", node.id)));
            }
        }
        for node in nodes {
            self.stage_node(node);
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
        let base = self.inner.node_count()?;
        let state = self.state.lock();
        let new_pending = state
            .pending_nodes
            .keys()
            .filter(|id| !self.node_exists_upstream(id))
            .count();
        let removed_existing = state
            .deleted_nodes
            .iter()
            .filter(|id| self.node_exists_upstream(id))
            .count();
        Ok(base + new_pending - removed_existing)
    }

    fn edge_count(&self) -> Result<usize> {
        let base = self.inner.edge_count()?;
        let state = self.state.lock();
        let new_pending = state
            .pending_edges
            .keys()
            .filter(|id| !self.edge_exists_upstream(id))
            .count();
        let removed_existing = state
            .deleted_edges
            .iter()
            .filter(|id| self.edge_exists_upstream(id))
            .count();
        Ok(base + new_pending - removed_existing)
    }

    fn stream_nodes(&self, cancel: &dyn CancelToken, sink: &mut dyn StreamSink<Node>) -> Result<()> {
        self.flush()?;
        self.inner.stream_nodes(cancel, sink)
    }

    fn stream_edges(&self, cancel: &dyn CancelToken, sink: &mut dyn StreamSink<Edge>) -> Result<()> {
        self.flush()?;
        self.inner.stream_edges(cancel, sink)
    }

    fn stream_node_chunks(
        &self,
        chunk_size: usize,
        cancel: &dyn CancelToken,
        sink: &mut dyn StreamSink<Vec<Node>>,
    ) -> Result<()> {
        self.flush()?;
        self.inner.stream_node_chunks(chunk_size, cancel, sink)
    }

    fn close(&self) -> Result<()> {
        self.accepting_writes.store(false, Ordering::Release);
        if let Some(handle) = self.flush_task.lock().take() {
            handle.abort();
        }
        let result = self.flush()?;
        let residue = {
            let state = self.state.lock();
            state.pending_nodes.len()
                + state.pending_edges.len()
                + state.deleted_nodes.len()
                + state.deleted_edges.len()
        };
        if !result.is_clean() || residue > 0 {
            return Err(GraphError::Internal(format!(
                "cache close left {} node failures, {} edge failures, {residue} unflushed items",
                result.nodes_failed, result.edges_failed
            )));
        }
        self.inner.close()
    }

    fn sync(&self) -> Result<()> {
        self.flush()?;
        self.inner.sync()
    }

    fn run_gc(&self) -> Result<()> {
        self.inner.run_gc()
    }

    fn verify(&self, options: VerifyOptions) -> Result<IntegrityReport> {
        self.flush()?;
        self.inner.verify(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PersistentEngine;
    use crate::kv::Kv;
    use crate::schema::SchemaManager;

    fn persistent() -> PersistentEngine {
        PersistentEngine::new(Kv::new(), Arc::new(SchemaManager::new()))
    }

    #[tokio::test]
    async fn read_after_write_sees_pending_node() {
        let cache = CacheEngine::new(persistent(), Duration::from_secs(3600));
        cache.create_node(Node::new("a")).unwrap();
        assert!(cache.get_node(&"a".to_string()).is_ok());
        assert!(cache.inner.get_node(&"a".to_string()).is_err());
    }

    #[tokio::test]
    async fn flush_applies_pending_writes_to_inner_engine() {
        let cache = CacheEngine::new(persistent(), Duration::from_secs(3600));
        cache.create_node(Node::new("a")).unwrap();
        let result = cache.flush().unwrap();
        assert_eq!(result.nodes_written, 1);
        assert!(cache.inner.get_node(&"a".to_string()).is_ok());
    }

    #[tokio::test]
    async fn delete_of_never_flushed_node_just_drops_it() {
        let cache = CacheEngine::new(persistent(), Duration::from_secs(3600));
        cache.create_node(Node::new("a")).unwrap();
        cache.delete_node(&"a".to_string()).unwrap();
        let result = cache.flush().unwrap();
        assert_eq!(result.nodes_deleted, 0);
        assert!(cache.get_node(&"a".to_string()).is_err());
    }

    #[tokio::test]
    async fn delete_of_flushed_node_marks_for_upstream_deletion() {
        let cache = CacheEngine::new(persistent(), Duration::from_secs(3600));
        cache.create_node(Node::new("a")).unwrap();
        cache.flush().unwrap();
        cache.delete_node(&"a".to_string()).unwrap();
        assert!(cache.get_node(&"a".to_string()).is_err());
        let result = cache.flush().unwrap();
        assert_eq!(result.nodes_deleted, 1);
        assert!(cache.inner.get_node(&"a".to_string()).is_err());
    }

    #[tokio::test]
    async fn close_performs_final_flush() {
        let cache = CacheEngine::new(persistent(), Duration::from_secs(3600));
        cache.create_node(Node::new("a")).unwrap();
        cache.close().unwrap();
    }
}
