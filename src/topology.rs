//! C10: chunked, parallel topology builder. Turns an `Engine`'s nodes/edges
//! into an in-memory adjacency map usable by [`crate::linkpred`], with an
//! optional disk cache and incremental deltas between full rebuilds.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinSet;

use crate::engine::{CancelToken, Engine};
use crate::error::{GraphError, Result};
use crate::linkpred::LinkGraph;
use crate::model::NodeId;

/// Tunables for [`TopologyBuilder::build`].
#[derive(Clone)]
pub struct BuildOptions {
    pub chunk_size: usize,
    pub worker_count: usize,
    /// Mirror the reverse direction into the adjacency map too, matching
    /// link-prediction's undirected neighbor model.
    pub undirected: bool,
    /// Invoked after each chunk merges, with `(chunks_done, chunks_total)`.
    pub progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            worker_count: 4,
            undirected: true,
            progress: None,
        }
    }
}

/// Where the built graph persists between process restarts.
#[derive(Clone)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub ttl: time::Duration,
}

/// A built adjacency snapshot plus the time it finished.
#[derive(Debug, Clone)]
pub struct TopologyGraph {
    pub adjacency: HashMap<NodeId, HashSet<NodeId>>,
    pub built_at: OffsetDateTime,
}

impl TopologyGraph {
    /// Hands the adjacency map to the link-prediction scorers (C9).
    pub fn to_link_graph(&self) -> LinkGraph {
        LinkGraph::from_adjacency(self.adjacency.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    built_at: OffsetDateTime,
    adjacency: HashMap<NodeId, HashSet<NodeId>>,
}

#[derive(Default)]
struct PendingDelta {
    node_removes: HashSet<NodeId>,
    edge_adds: HashSet<(NodeId, NodeId)>,
    edge_removes: HashSet<(NodeId, NodeId)>,
}

impl PendingDelta {
    fn is_empty(&self) -> bool {
        self.node_removes.is_empty() && self.edge_adds.is_empty() && self.edge_removes.is_empty()
    }
}

/// Builds and maintains a [`TopologyGraph`] for one `Engine`.
pub struct TopologyBuilder<E: Engine + 'static> {
    engine: Arc<E>,
    options: BuildOptions,
    cache: Option<CacheConfig>,
    refresh_every_n: usize,
    current: RwLock<Option<TopologyGraph>>,
    delta: Mutex<PendingDelta>,
    predictions_since_build: AtomicUsize,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl<E: Engine + Send + Sync + 'static> TopologyBuilder<E> {
    pub fn new(engine: Arc<E>, options: BuildOptions) -> Self {
        Self {
            engine,
            options,
            cache: None,
            refresh_every_n: 1000,
            current: RwLock::new(None),
            delta: Mutex::new(PendingDelta::default()),
            predictions_since_build: AtomicUsize::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_refresh_every(mut self, predictions: usize) -> Self {
        self.refresh_every_n = predictions.max(1);
        self
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Call once per prediction round so the refresh-every-N-predictions
    /// policy can trigger a rebuild.
    pub fn record_prediction(&self) {
        self.predictions_since_build.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_node_added(&self, _id: &NodeId) {
        // Nothing to queue: the node gains adjacency entries only once an
        // edge touching it is added, which `on_edge_added` handles.
    }

    pub fn on_node_removed(&self, id: &NodeId) {
        self.delta.lock().node_removes.insert(id.clone());
    }

    pub fn on_edge_added(&self, from: &NodeId, to: &NodeId) {
        let mut delta = self.delta.lock();
        delta.edge_removes.remove(&(from.clone(), to.clone()));
        delta.edge_adds.insert((from.clone(), to.clone()));
    }

    pub fn on_edge_removed(&self, from: &NodeId, to: &NodeId) {
        let mut delta = self.delta.lock();
        delta.edge_adds.remove(&(from.clone(), to.clone()));
        delta.edge_removes.insert((from.clone(), to.clone()));
    }

    /// Drops the in-memory graph and any disk cache, forcing a full rebuild
    /// on the next [`TopologyBuilder::snapshot`] call.
    pub fn invalidate(&self) -> Result<()> {
        *self.current.write() = None;
        if let Some(cache) = &self.cache {
            if cache.path.exists() {
                fs::remove_file(&cache.path)?;
            }
        }
        Ok(())
    }

    fn should_rebuild(&self) -> bool {
        let current = self.current.read();
        let Some(graph) = current.as_ref() else {
            return true;
        };
        if self.predictions_since_build.load(Ordering::Relaxed) >= self.refresh_every_n {
            return true;
        }
        if let Some(cache) = &self.cache {
            if OffsetDateTime::now_utc() - graph.built_at > cache.ttl {
                return true;
            }
        }
        false
    }

    fn apply_pending_delta(&self) {
        let mut delta = self.delta.lock();
        if delta.is_empty() {
            return;
        }
        let mut current = self.current.write();
        let Some(graph) = current.as_mut() else {
            return;
        };
        for id in delta.node_removes.drain() {
            if let Some(neighbors) = graph.adjacency.remove(&id) {
                for n in neighbors {
                    if let Some(set) = graph.adjacency.get_mut(&n) {
                        set.remove(&id);
                    }
                }
            }
        }
        for (from, to) in delta.edge_removes.drain() {
            if let Some(set) = graph.adjacency.get_mut(&from) {
                set.remove(&to);
            }
            if self.options.undirected {
                if let Some(set) = graph.adjacency.get_mut(&to) {
                    set.remove(&from);
                }
            }
        }
        for (from, to) in delta.edge_adds.drain() {
            graph.adjacency.entry(from.clone()).or_default().insert(to.clone());
            if self.options.undirected {
                graph.adjacency.entry(to).or_default().insert(from);
            }
        }
    }

    /// Returns a usable graph: applies any pending delta if a rebuild isn't
    /// due, otherwise loads from cache or does a full rebuild.
    pub async fn snapshot(&self, cancel: &dyn CancelToken) -> Result<TopologyGraph> {
        if !self.should_rebuild() {
            self.apply_pending_delta();
            if let Some(graph) = self.current.read().clone() {
                return Ok(graph);
            }
        }
        self.build_or_load(cancel).await
    }

    async fn build_or_load(&self, cancel: &dyn CancelToken) -> Result<TopologyGraph> {
        if let Some(cache) = &self.cache {
            if let Some(graph) = load_cache(&cache.path, cache.ttl)? {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                *self.current.write() = Some(graph.clone());
                self.predictions_since_build.store(0, Ordering::Release);
                *self.delta.lock() = PendingDelta::default();
                return Ok(graph);
            }
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        self.build(cancel).await
    }

    /// Fans chunked node IDs across a worker pool, each worker resolving
    /// its chunk's outgoing edges into (from, to) pairs; a single merge
    /// step assembles the adjacency map and honors cancellation between
    /// chunks.
    pub async fn build(&self, cancel: &dyn CancelToken) -> Result<TopologyGraph> {
        let node_ids = self.engine.all_nodes()?;
        let chunk_size = self.options.chunk_size.max(1);
        let mut pending: Vec<Vec<NodeId>> = node_ids
            .chunks(chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        pending.reverse();
        let total = pending.len();

        let mut adjacency: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        let mut in_flight: JoinSet<Result<Vec<(NodeId, NodeId)>>> = JoinSet::new();
        let worker_count = self.options.worker_count.max(1);

        for _ in 0..worker_count {
            if let Some(chunk) = pending.pop() {
                spawn_chunk_worker(&mut in_flight, Arc::clone(&self.engine), chunk);
            }
        }

        let mut done = 0usize;
        while let Some(outcome) = in_flight.join_next().await {
            let pairs = outcome.map_err(|e| GraphError::Internal(format!("topology worker panicked: {e}")))??;
            for (from, to) in pairs {
                adjacency.entry(from.clone()).or_default().insert(to.clone());
                if self.options.undirected {
                    adjacency.entry(to).or_default().insert(from);
                }
            }
            done += 1;
            if let Some(progress) = &self.options.progress {
                progress(done, total);
            }

            if cancel.is_cancelled() {
                in_flight.abort_all();
                return Err(GraphError::IterationStopped);
            }

            if let Some(chunk) = pending.pop() {
                spawn_chunk_worker(&mut in_flight, Arc::clone(&self.engine), chunk);
            }
        }

        let graph = TopologyGraph {
            adjacency,
            built_at: OffsetDateTime::now_utc(),
        };
        *self.current.write() = Some(graph.clone());
        self.predictions_since_build.store(0, Ordering::Release);
        *self.delta.lock() = PendingDelta::default();
        if let Some(cache) = &self.cache {
            save_cache(&cache.path, &graph)?;
        }
        Ok(graph)
    }
}

fn spawn_chunk_worker<E: Engine + 'static>(
    set: &mut JoinSet<Result<Vec<(NodeId, NodeId)>>>,
    engine: Arc<E>,
    chunk: Vec<NodeId>,
) {
    set.spawn_blocking(move || {
        let mut pairs = Vec::new();
        for node_id in chunk {
            for edge_id in engine.get_outgoing_edges(&node_id)? {
                let edge = engine.get_edge(&edge_id)?;
                pairs.push((edge.start_node, edge.end_node));
            }
        }
        Ok(pairs)
    });
}

fn save_cache(path: &Path, graph: &TopologyGraph) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(&file);
        let payload = CacheFile {
            built_at: graph.built_at,
            adjacency: graph.adjacency.clone(),
        };
        serde_json::to_writer(&mut writer, &payload)
            .map_err(|e| GraphError::Internal(format!("topology cache encode failed: {e}")))?;
        writer.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn load_cache(path: &Path, ttl: time::Duration) -> Result<Option<TopologyGraph>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let cached: CacheFile = serde_json::from_slice(&bytes)
        .map_err(|e| GraphError::Internal(format!("topology cache decode failed: {e}")))?;
    if OffsetDateTime::now_utc() - cached.built_at > ttl {
        return Ok(None);
    }
    Ok(Some(TopologyGraph {
        adjacency: cached.adjacency,
        built_at: cached.built_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NeverCancel, PersistentEngine};
    use crate::kv::Kv;
    use crate::model::{Edge, Node};
    use crate::schema::SchemaManager;

    fn engine_with_triangle() -> Arc<PersistentEngine> {
        let engine = PersistentEngine::new(Kv::new(), Arc::new(SchemaManager::new()));
        engine.create_node(Node::new("a")).unwrap();
        engine.create_node(Node::new("b")).unwrap();
        engine.create_node(Node::new("c")).unwrap();
        engine.create_edge(Edge::new("e1", "a", "b", "KNOWS")).unwrap();
        engine.create_edge(Edge::new("e2", "b", "c", "KNOWS")).unwrap();
        Arc::new(engine)
    }

    #[tokio::test]
    async fn build_produces_symmetric_adjacency_when_undirected() {
        let builder = TopologyBuilder::new(engine_with_triangle(), BuildOptions::default());
        let graph = builder.build(&NeverCancel).await.unwrap();
        assert!(graph.adjacency.get(&"a".to_string()).unwrap().contains("b"));
        assert!(graph.adjacency.get(&"b".to_string()).unwrap().contains("a"));
        assert!(graph.adjacency.get(&"b".to_string()).unwrap().contains("c"));
    }

    #[tokio::test]
    async fn delta_hooks_update_adjacency_without_a_rebuild() {
        let engine = engine_with_triangle();
        let builder = TopologyBuilder::new(Arc::clone(&engine), BuildOptions::default()).with_refresh_every(1000);
        builder.build(&NeverCancel).await.unwrap();

        engine.create_node(Node::new("d")).unwrap();
        engine.create_edge(Edge::new("e3", "c", "d", "KNOWS")).unwrap();
        builder.on_edge_added(&"c".to_string(), &"d".to_string());

        let graph = builder.snapshot(&NeverCancel).await.unwrap();
        assert!(graph.adjacency.get(&"c".to_string()).unwrap().contains("d"));
        assert!(graph.adjacency.get(&"d".to_string()).unwrap().contains("c"));
    }

    #[tokio::test]
    async fn invalidate_forces_a_rebuild_on_next_snapshot() {
        let engine = engine_with_triangle();
        let builder = TopologyBuilder::new(Arc::clone(&engine), BuildOptions::default());
        builder.build(&NeverCancel).await.unwrap();
        builder.invalidate().unwrap();

        let graph = builder.snapshot(&NeverCancel).await.unwrap();
        assert!(graph.adjacency.get(&"a".to_string()).unwrap().contains("b"));
    }
}
