//! C5: the persistent graph engine — CRUD over nodes/edges, label and
//! incidence indexes, bulk ops, and cancellable streaming iteration.

mod persistent;

pub use persistent::PersistentEngine;

use crate::error::Result;
use crate::model::{Edge, EdgeId, Node, NodeId};

/// Tallies produced by [`Engine::verify`]: logical-record and index
/// counters this KV-backed engine can actually check.
#[derive(Debug, Default, Clone)]
pub struct IntegrityReport {
    pub checked_nodes: usize,
    pub checked_edges: usize,
    pub record_errors: usize,
    pub index_errors: usize,
    pub adjacency_errors: usize,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    fn push_error(&mut self, max_errors: usize, message: String) {
        if self.errors.len() < max_errors {
            self.errors.push(message);
        }
    }

    /// True if no inconsistency was found.
    pub fn is_clean(&self) -> bool {
        self.record_errors == 0 && self.index_errors == 0 && self.adjacency_errors == 0
    }
}

/// Options controlling an [`Engine::verify`] pass.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Skip index/adjacency cross-checks, reporting only structural record
    /// decode failures.
    pub checksum_only: bool,
    /// Stop accumulating `errors` past this count (0 means unlimited).
    pub max_errors: usize,
    /// Cross-check the label index against node records.
    pub verify_indexes: bool,
    /// Cross-check incidence indexes against edge records.
    pub verify_adjacency: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            checksum_only: false,
            max_errors: 16,
            verify_indexes: true,
            verify_adjacency: true,
        }
    }
}

/// A callback invoked once per streamed item; returning `false` ends the
/// stream early without surfacing an error.
pub trait StreamSink<T> {
    fn accept(&mut self, item: T) -> bool;
}

impl<T, F: FnMut(T) -> bool> StreamSink<T> for F {
    fn accept(&mut self, item: T) -> bool {
        self(item)
    }
}

/// A cooperative cancellation flag, checked once per streamed item.
pub trait CancelToken {
    fn is_cancelled(&self) -> bool;
}

impl CancelToken for std::sync::atomic::AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// A no-op token for call sites with nothing to cancel on.
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// The storage contract every layer above C5 (transactions, cache,
/// inference) is built against. `crate::cache::CacheEngine` also implements
/// this, so callers can swap a persistent engine for a cached one
/// transparently.
pub trait Engine: Send + Sync {
    fn create_node(&self, node: Node) -> Result<()>;
    fn get_node(&self, id: &NodeId) -> Result<Node>;
    fn update_node(&self, node: Node) -> Result<()>;
    fn delete_node(&self, id: &NodeId) -> Result<()>;

    fn create_edge(&self, edge: Edge) -> Result<()>;
    fn get_edge(&self, id: &EdgeId) -> Result<Edge>;
    fn update_edge(&self, edge: Edge) -> Result<()>;
    fn delete_edge(&self, id: &EdgeId) -> Result<()>;

    fn get_nodes_by_label(&self, label: &str) -> Result<Vec<NodeId>>;
    fn get_outgoing_edges(&self, node_id: &NodeId) -> Result<Vec<EdgeId>>;
    fn get_incoming_edges(&self, node_id: &NodeId) -> Result<Vec<EdgeId>>;
    fn get_edges_between(&self, start: &NodeId, end: &NodeId) -> Result<Vec<EdgeId>>;

    fn all_nodes(&self) -> Result<Vec<NodeId>>;
    fn all_edges(&self) -> Result<Vec<EdgeId>>;

    fn create_nodes_bulk(&self, nodes: Vec<Node>) -> Result<()>;
    fn delete_nodes_bulk(&self, ids: &[NodeId]) -> Result<()>;

    fn node_count(&self) -> Result<usize>;
    fn edge_count(&self) -> Result<usize>;

    /// Streams every node through `sink`, honoring `cancel` and a small
    /// prefetch window.
    fn stream_nodes(&self, cancel: &dyn CancelToken, sink: &mut dyn StreamSink<Node>) -> Result<()>;
    /// Streams every edge through `sink`.
    fn stream_edges(&self, cancel: &dyn CancelToken, sink: &mut dyn StreamSink<Edge>) -> Result<()>;
    /// Streams nodes in fixed-size chunks, for chunked consumers like the
    /// topology builder (C10).
    fn stream_node_chunks(
        &self,
        chunk_size: usize,
        cancel: &dyn CancelToken,
        sink: &mut dyn StreamSink<Vec<Node>>,
    ) -> Result<()>;

    fn close(&self) -> Result<()>;
    fn sync(&self) -> Result<()>;
    fn run_gc(&self) -> Result<()>;

    /// Read-only consistency scan; see [`IntegrityReport`].
    fn verify(&self, options: VerifyOptions) -> Result<IntegrityReport>;
}
