//! C9: topological link-prediction scorers over an in-memory adjacency map,
//! plus the semantic+topology combine step the inference engine (C11) calls
//! into for `SuggestTopological`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::model::NodeId;

/// An undirected adjacency view built once per prediction round (or kept
/// warm by the topology builder, C10).
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    adjacency: HashMap<NodeId, HashSet<NodeId>>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_adjacency(adjacency: HashMap<NodeId, HashSet<NodeId>>) -> Self {
        Self { adjacency }
    }

    /// Adds an undirected edge, inserting either endpoint not already
    /// present as an isolated node.
    pub fn add_edge(&mut self, a: &NodeId, b: &NodeId) {
        self.adjacency.entry(a.clone()).or_default().insert(b.clone());
        self.adjacency.entry(b.clone()).or_default().insert(a.clone());
    }

    pub fn degree(&self, id: &NodeId) -> usize {
        self.adjacency.get(id).map(HashSet::len).unwrap_or(0)
    }

    fn neighbors(&self, id: &NodeId) -> &HashSet<NodeId> {
        static EMPTY: OnceLock<HashSet<NodeId>> = OnceLock::new();
        self.adjacency.get(id).unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }

    /// Candidates for link prediction from `source`: every node reachable in
    /// exactly two hops, excluding `source` itself and its existing
    /// neighbors.
    pub fn candidates(&self, source: &NodeId) -> HashSet<NodeId> {
        let direct = self.neighbors(source);
        let mut frontier = HashSet::new();
        for n in direct {
            for two_hop in self.neighbors(n) {
                if two_hop != source && !direct.contains(two_hop) {
                    frontier.insert(two_hop.clone());
                }
            }
        }
        frontier
    }

    /// Every node in the graph that isn't `source` and isn't already its
    /// neighbor, regardless of hop distance. Preferential attachment draws
    /// its candidates from here rather than the 2-hop frontier, since it
    /// scores purely on degree and has no notion of shared neighbors.
    pub fn non_neighbors(&self, source: &NodeId) -> HashSet<NodeId> {
        let direct = self.neighbors(source);
        self.adjacency
            .keys()
            .filter(|id| *id != source && !direct.contains(*id))
            .cloned()
            .collect()
    }
}

/// The five topological scorers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scorer {
    CommonNeighbors,
    Jaccard,
    AdamicAdar,
    ResourceAllocation,
    PreferentialAttachment,
}

impl Scorer {
    pub fn name(&self) -> &'static str {
        match self {
            Scorer::CommonNeighbors => "common_neighbors",
            Scorer::Jaccard => "jaccard",
            Scorer::AdamicAdar => "adamic_adar",
            Scorer::ResourceAllocation => "resource_allocation",
            Scorer::PreferentialAttachment => "preferential_attachment",
        }
    }

    fn raw(&self, graph: &LinkGraph, u: &NodeId, v: &NodeId) -> f64 {
        let nu = graph.neighbors(u);
        let nv = graph.neighbors(v);
        match self {
            Scorer::CommonNeighbors => nu.intersection(nv).count() as f64,
            Scorer::Jaccard => {
                let inter = nu.intersection(nv).count();
                let union = nu.union(nv).count();
                if union == 0 {
                    0.0
                } else {
                    inter as f64 / union as f64
                }
            }
            Scorer::AdamicAdar => nu
                .intersection(nv)
                .filter_map(|z| {
                    let deg = graph.degree(z);
                    (deg > 1).then(|| 1.0 / (deg as f64).ln())
                })
                .sum(),
            Scorer::ResourceAllocation => nu
                .intersection(nv)
                .filter_map(|z| {
                    let deg = graph.degree(z);
                    (deg > 0).then(|| 1.0 / deg as f64)
                })
                .sum(),
            Scorer::PreferentialAttachment => (nu.len() * nv.len()) as f64,
        }
    }

    /// Maps a raw score to `[0, 1]` so scores from different scorers are
    /// comparable as a `confidence`.
    fn normalize(&self, raw: f64) -> f64 {
        match self {
            Scorer::Jaccard => raw.clamp(0.0, 1.0),
            Scorer::CommonNeighbors => 1.0 - 1.0 / (1.0 + raw / 2.0),
            Scorer::AdamicAdar | Scorer::ResourceAllocation => (raw / 5.0).tanh(),
            Scorer::PreferentialAttachment => {
                if raw > 1.0 {
                    (raw.log10() / 4.0).min(1.0)
                } else {
                    0.0
                }
            }
        }
    }
}

/// Bounds on a single [`predict`] call.
#[derive(Debug, Clone, Copy)]
pub struct PredictConfig {
    pub top_k: usize,
    pub min_score: f64,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.0,
        }
    }
}

/// One scored prediction, already normalized to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub target: NodeId,
    pub score: f64,
    pub reasons: Vec<String>,
}

fn deterministic_sort(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.target.cmp(&b.target))
    });
}

/// Scores `source`'s candidates with `scorer`, normalizes, drops anything
/// below `config.min_score`, sorts descending (ties broken by target ID for
/// determinism), and truncates to `config.top_k`. Every scorer but
/// preferential attachment draws candidates from the 2-hop frontier;
/// preferential attachment scores purely on degree, so it draws from every
/// non-neighbor in the graph instead.
pub fn predict(graph: &LinkGraph, source: &NodeId, scorer: Scorer, config: &PredictConfig) -> Vec<Prediction> {
    let candidate_set = match scorer {
        Scorer::PreferentialAttachment => graph.non_neighbors(source),
        _ => graph.candidates(source),
    };
    let mut predictions: Vec<Prediction> = candidate_set
        .into_iter()
        .map(|target| {
            let raw = scorer.raw(graph, source, &target);
            let score = scorer.normalize(raw);
            Prediction {
                target,
                score,
                reasons: vec![scorer.name().to_string()],
            }
        })
        .filter(|p| p.score >= config.min_score)
        .collect();

    deterministic_sort(&mut predictions);
    predictions.truncate(config.top_k);
    predictions
}

/// Combines a semantic-similarity ranking with a topological-prediction
/// ranking: `combined = semantic * (1 - w) + topology * w`. A target
/// appearing in both channels sums its weighted contributions and
/// concatenates reasons rather than picking one side.
pub fn combine(semantic: &[Prediction], topology: &[Prediction], topology_weight: f64) -> Vec<Prediction> {
    let w = topology_weight.clamp(0.0, 1.0);
    let mut merged: HashMap<NodeId, Prediction> = HashMap::new();

    for p in semantic {
        merged.insert(
            p.target.clone(),
            Prediction {
                target: p.target.clone(),
                score: p.score * (1.0 - w),
                reasons: p.reasons.clone(),
            },
        );
    }
    for p in topology {
        merged
            .entry(p.target.clone())
            .and_modify(|existing| {
                existing.score += p.score * w;
                existing.reasons.extend(p.reasons.clone());
            })
            .or_insert_with(|| Prediction {
                target: p.target.clone(),
                score: p.score * w,
                reasons: p.reasons.clone(),
            });
    }

    let mut combined: Vec<Prediction> = merged.into_values().collect();
    deterministic_sort(&mut combined);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_plus_bridge() -> LinkGraph {
        let mut g = LinkGraph::new();
        g.add_edge(&"a".to_string(), &"b".to_string());
        g.add_edge(&"a".to_string(), &"c".to_string());
        g.add_edge(&"b".to_string(), &"c".to_string());
        g.add_edge(&"c".to_string(), &"d".to_string());
        g
    }

    #[test]
    fn preferential_attachment_reaches_a_node_with_no_common_neighbor() {
        let mut g = triangle_plus_bridge();
        g.add_edge(&"z".to_string(), &"y".to_string());
        // z has no common neighbor with a and isn't within two hops of it, so
        // it never appears in candidates(), but PA's non_neighbors() reaches
        // it anyway since PA scores purely on degree.
        assert!(!g.candidates(&"a".to_string()).contains(&"z".to_string()));
        let predictions = predict(&g, &"a".to_string(), Scorer::PreferentialAttachment, &PredictConfig::default());
        assert!(predictions.iter().any(|p| p.target == "z"));
    }

    #[test]
    fn candidates_exclude_self_and_existing_neighbors() {
        let g = triangle_plus_bridge();
        let candidates = g.candidates(&"a".to_string());
        assert!(!candidates.contains(&"a".to_string()));
        assert!(!candidates.contains(&"b".to_string()));
        assert!(!candidates.contains(&"c".to_string()));
        assert!(candidates.contains(&"d".to_string()));
    }

    #[test]
    fn common_neighbors_scores_shared_triangle_member() {
        let g = triangle_plus_bridge();
        let predictions = predict(&g, &"a".to_string(), Scorer::CommonNeighbors, &PredictConfig::default());
        let d = predictions.iter().find(|p| p.target == "d").unwrap();
        assert!(d.score > 0.0);
        assert!(d.score < 1.0);
    }

    #[test]
    fn jaccard_is_clamped_to_unit_interval() {
        let g = triangle_plus_bridge();
        for p in predict(&g, &"a".to_string(), Scorer::Jaccard, &PredictConfig::default()) {
            assert!((0.0..=1.0).contains(&p.score));
        }
    }

    #[test]
    fn min_score_filters_low_scoring_candidates() {
        let g = triangle_plus_bridge();
        let config = PredictConfig {
            top_k: 10,
            min_score: 0.99,
        };
        let predictions = predict(&g, &"a".to_string(), Scorer::Jaccard, &config);
        assert!(predictions.is_empty());
    }

    #[test]
    fn top_k_truncates_results() {
        let mut g = LinkGraph::new();
        g.add_edge(&"hub".to_string(), &"leaf".to_string());
        for i in 0..5 {
            g.add_edge(&"leaf".to_string(), &format!("c{i}"));
        }
        let config = PredictConfig { top_k: 2, min_score: 0.0 };
        let predictions = predict(&g, &"hub".to_string(), Scorer::CommonNeighbors, &config);
        assert_eq!(predictions.len(), 2);
    }

    #[test]
    fn combine_sums_weighted_contributions_on_overlap() {
        let semantic = vec![Prediction {
            target: "x".to_string(),
            score: 0.8,
            reasons: vec!["similarity".to_string()],
        }];
        let topology = vec![Prediction {
            target: "x".to_string(),
            score: 0.4,
            reasons: vec!["common_neighbors".to_string()],
        }];
        let combined = combine(&semantic, &topology, 0.5);
        assert_eq!(combined.len(), 1);
        assert!((combined[0].score - (0.8 * 0.5 + 0.4 * 0.5)).abs() < 1e-9);
        assert_eq!(combined[0].reasons.len(), 2);
    }

    #[test]
    fn combine_keeps_single_channel_targets() {
        let semantic = vec![Prediction {
            target: "x".to_string(),
            score: 0.6,
            reasons: vec!["similarity".to_string()],
        }];
        let combined = combine(&semantic, &[], 0.3);
        assert_eq!(combined.len(), 1);
        assert!((combined[0].score - 0.6 * 0.7).abs() < 1e-9);
    }
}
