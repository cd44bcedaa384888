//! # ligaturedb
//!
//! `ligaturedb` is an embedded, ACID-capable labeled-property-graph storage
//! engine with automatic relationship inference: as nodes and edges are
//! written and read, similarity, co-access, and topological signals feed an
//! inference layer that proposes new edges, and a gating layer decides which
//! of those proposals actually get materialized.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use ligaturedb::{Kv, Node, PersistentEngine, SchemaManager};
//!
//! # fn main() -> ligaturedb::Result<()> {
//! let engine = PersistentEngine::new(Kv::new(), Arc::new(SchemaManager::new()));
//!
//! let mut tx = engine.begin_transaction();
//! tx.create_node(Node::new("alice").with_label("Person"))?;
//! tx.create_node(Node::new("bob").with_label("Person"))?;
//! tx.create_edge(ligaturedb::Edge::new("e1", "alice", "bob", "KNOWS"))?;
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`kv`** — the ordered byte-oriented key/value backend every other
//!   layer is built on.
//! - **`codec`** / **`keys`** / **`schema`** — record (de)serialization, the
//!   key layout, and label/edge-type/constraint catalog management.
//! - **`engine`** — the synchronous [`Engine`] trait and its KV-backed
//!   implementation, [`PersistentEngine`].
//! - **`txn`** — transactions layered over an `Engine`.
//! - **`wal`** — write-ahead logging, crash recovery, and snapshotting.
//! - **`cache`** — an async write-behind [`CacheEngine`] wrapping any
//!   `Engine`.
//! - **`linkpred`**, **`topology`**, **`inference`**, **`gating`** — the
//!   relationship-inference stack: topological scorers over an adjacency
//!   map, a background topology builder, a signal-to-suggestion inference
//!   engine, and the cooldown/evidence/policy gate in front of
//!   materialization.
//! - **`metrics`** — ambient operational counters.

pub mod cache;
pub mod codec;
pub mod engine;
pub mod error;
pub mod gating;
pub mod inference;
pub mod keys;
pub mod kv;
pub mod linkpred;
pub mod metrics;
pub mod model;
pub mod schema;
pub mod topology;
pub mod txn;
pub mod wal;

pub use crate::cache::{CacheEngine, FlushResult};
pub use crate::engine::{CancelToken, Engine, IntegrityReport, NeverCancel, PersistentEngine, StreamSink, VerifyOptions};
pub use crate::error::{GraphError, Result};
pub use crate::gating::{Decision, GatingConfig, GatingEngine};
pub use crate::inference::{InferenceConfig, InferenceEngine, Suggestion};
pub use crate::kv::Kv;
pub use crate::linkpred::{LinkGraph, PredictConfig, Prediction, Scorer};
pub use crate::metrics::{Metrics, MetricsSnapshot};
pub use crate::model::{Edge, EdgeId, Embedding, Node, NodeId, Properties, Value};
pub use crate::schema::SchemaManager;
pub use crate::topology::{BuildOptions, CacheConfig, TopologyBuilder, TopologyGraph};
pub use crate::txn::Transaction;
pub use crate::wal::{SyncMode, Wal, WalBatch, WalConfig};
