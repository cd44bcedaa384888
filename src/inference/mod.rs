//! C11: turns raw signals (embedding similarity, co-access, transitive
//! closure, topology) into [`Suggestion`]s. Gating (`crate::gating`) decides
//! what actually becomes an edge.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::linkpred::Prediction;
use crate::model::NodeId;

/// A candidate relationship the inference engine has found evidence for.
/// Not yet materialized — gating decides that.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub from: NodeId,
    pub to: NodeId,
    pub confidence: f64,
    /// Relationship type this suggestion would materialize as, e.g.
    /// `"RELATES_TO"`. Together with `from`/`to` this is the triple gating
    /// accumulates evidence against; `method` is the signal that produced
    /// this particular occurrence of it.
    pub edge_type: String,
    pub method: String,
    pub reasons: Vec<String>,
}

/// Default relationship type for suggestions with no more specific type
/// signal to go on.
pub const DEFAULT_EDGE_TYPE: &str = "RELATES_TO";

/// Injected similarity search: given an embedding and `k`, returns
/// candidate `(node_id, score)` pairs. Usually backed by a vector index
/// this crate doesn't own.
pub type SimilaritySearch = dyn Fn(&[f32], usize) -> Vec<(NodeId, f64)> + Send + Sync;

/// Injected topology integration: given a node, returns topological
/// predictions (see `crate::linkpred`/`crate::topology`).
pub type TopologyPredict = dyn Fn(&NodeId) -> Vec<Prediction> + Send + Sync;

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Minimum similarity score for `OnStore` to consider a hit.
    pub similarity_threshold: f64,
    pub similarity_top_k: usize,
    /// Weight given to the topology channel when combining with semantic
    /// similarity (see `crate::linkpred::combine`).
    pub topology_weight: f64,
    /// How far back `OnAccess` looks for prior accesses to pair with.
    pub co_access_window: Duration,
    /// Minimum co-access count before a suggestion is emitted.
    pub co_access_min_count: u32,
    /// Minimum `c1 * c2` for `SuggestTransitive` to emit a suggestion.
    pub transitive_threshold: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.80,
            similarity_top_k: 10,
            topology_weight: 0.3,
            co_access_window: Duration::from_secs(30),
            co_access_min_count: 2,
            transitive_threshold: 0.5,
        }
    }
}

/// Maps a raw similarity score to a suggestion confidence via a small
/// piecewise table, so a near-exact embedding match is weighted far above
/// a borderline one.
fn similarity_confidence(score: f64) -> f64 {
    if score >= 0.95 {
        0.9
    } else if score >= 0.90 {
        0.7
    } else if score >= 0.85 {
        0.5
    } else {
        0.3
    }
}

struct AccessEvent {
    node_id: NodeId,
    at: Instant,
}

fn pair_key(a: &NodeId, b: &NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Generates link suggestions from similarity, co-access, transitive, and
/// topology signals.
pub struct InferenceEngine {
    config: InferenceConfig,
    search: Option<Arc<SimilaritySearch>>,
    topology_predict: Option<Arc<TopologyPredict>>,
    recent_accesses: Mutex<VecDeque<AccessEvent>>,
    co_access_counts: Mutex<HashMap<(NodeId, NodeId), u32>>,
}

impl InferenceEngine {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            config,
            search: None,
            topology_predict: None,
            recent_accesses: Mutex::new(VecDeque::new()),
            co_access_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_similarity_search(mut self, search: Arc<SimilaritySearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_topology(mut self, predict: Arc<TopologyPredict>) -> Self {
        self.topology_predict = Some(predict);
        self
    }

    /// Runs similarity search (if wired) for a newly-stored embedding, then
    /// folds in topological predictions if topology is wired, combining the
    /// two channels per `crate::linkpred::combine`.
    pub fn on_store(&self, node_id: &NodeId, embedding: &[f32]) -> Vec<Suggestion> {
        let mut semantic = Vec::new();
        if let Some(search) = &self.search {
            if !embedding.is_empty() {
                for (target, score) in search(embedding, self.config.similarity_top_k) {
                    if &target == node_id || score < self.config.similarity_threshold {
                        continue;
                    }
                    semantic.push(Prediction {
                        target,
                        score: similarity_confidence(score),
                        reasons: vec!["similarity".to_string()],
                    });
                }
            }
        }

        let Some(topology_predict) = &self.topology_predict else {
            return semantic
                .into_iter()
                .map(|p| Suggestion {
                    from: node_id.clone(),
                    to: p.target,
                    confidence: p.score,
                    edge_type: DEFAULT_EDGE_TYPE.to_string(),
                    method: "similarity".to_string(),
                    reasons: p.reasons,
                })
                .collect();
        };

        let topological = topology_predict(node_id);
        crate::linkpred::combine(&semantic, &topological, self.config.topology_weight)
            .into_iter()
            .map(|p| {
                let method = if p.reasons.len() > 1 {
                    "similarity+topology".to_string()
                } else {
                    p.reasons.first().cloned().unwrap_or_else(|| "topology".to_string())
                };
                Suggestion {
                    from: node_id.clone(),
                    to: p.target,
                    confidence: p.score,
                    edge_type: DEFAULT_EDGE_TYPE.to_string(),
                    method,
                    reasons: p.reasons,
                }
            })
            .collect()
    }

    /// Pairs `node_id` against every access within the sliding window,
    /// bumping a per-pair co-access counter; emits a suggestion once a pair
    /// crosses `co_access_min_count`. Prunes entries older than the window.
    pub fn on_access(&self, node_id: &NodeId) -> Vec<Suggestion> {
        let now = Instant::now();
        let window = self.config.co_access_window;
        let mut recent = self.recent_accesses.lock();
        let mut counts = self.co_access_counts.lock();
        let mut suggestions = Vec::new();

        for event in recent.iter() {
            if &event.node_id == node_id || now.duration_since(event.at) > window {
                continue;
            }
            let key = pair_key(node_id, &event.node_id);
            let count = counts.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count >= self.config.co_access_min_count {
                suggestions.push(Suggestion {
                    from: key.0,
                    to: key.1,
                    confidence: (*count as f64 / 10.0).min(0.8),
                    edge_type: DEFAULT_EDGE_TYPE.to_string(),
                    method: "co_access".to_string(),
                    reasons: vec![format!("co_access_count={count}")],
                });
            }
        }

        recent.push_back(AccessEvent {
            node_id: node_id.clone(),
            at: now,
        });
        recent.retain(|e| now.duration_since(e.at) <= window);

        suggestions
    }

    /// For every `A -> B` and `B -> C` suggestion pair, emits `A -> C` with
    /// confidence `c1 * c2` if it clears the transitive threshold and
    /// `A != C`.
    pub fn suggest_transitive(&self, edges: &[Suggestion]) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();
        for ab in edges {
            for bc in edges {
                if ab.to != bc.from || ab.from == bc.to {
                    continue;
                }
                let confidence = ab.confidence * bc.confidence;
                if confidence < self.config.transitive_threshold {
                    continue;
                }
                suggestions.push(Suggestion {
                    from: ab.from.clone(),
                    to: bc.to.clone(),
                    confidence,
                    edge_type: DEFAULT_EDGE_TYPE.to_string(),
                    method: "transitive".to_string(),
                    reasons: vec![format!("{}->{}->{}", ab.from, ab.to, bc.to)],
                });
            }
        }
        suggestions
    }
}
