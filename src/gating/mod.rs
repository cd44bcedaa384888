//! C12: turns an inference [`Suggestion`] into a materialize / pending /
//! blocked [`Decision`], via provenance, cooldown, per-node policy, and
//! evidence-buffering checks. Every check defaults to on for production
//! safety; disabling one makes `process_suggestion` skip it.
//!
//! Evidence accumulates per `(from, to, edge_type)` triple, counting
//! *distinct* methods that have suggested it rather than raw occurrences —
//! two suggestions from the same method never materialize on their own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::inference::Suggestion;
use crate::model::NodeId;

/// A candidate relationship identified by its triple, not its method: two
/// suggestions for the same `(from, to, edge_type)` are evidence for the
/// same edge even when distinct signals produced them.
type SuggestionKey = (NodeId, NodeId, String);

fn key_of(s: &Suggestion) -> SuggestionKey {
    (s.from.clone(), s.to.clone(), s.edge_type.clone())
}

/// What `process_suggestion` decided to do with a [`Suggestion`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// All checks passed; the caller should create the edge and then call
    /// [`GatingEngine::record_materialization`].
    Materialize,
    /// Evidence hasn't reached the threshold yet.
    Pending,
    /// Rejected, with the reason (cooldown, policy, ...).
    Blocked(String),
}

#[derive(Debug, Clone)]
pub struct GatingConfig {
    pub cooldown_enabled: bool,
    pub cooldown_window: Duration,
    pub evidence_enabled: bool,
    /// Occurrences of the same suggestion required before it materializes.
    pub evidence_threshold: u32,
    /// An evidence count not reinforced within this long is dropped.
    pub evidence_window: Duration,
    pub provenance_enabled: bool,
    pub provenance_retention: Duration,
    pub policy_enabled: bool,
    pub max_outgoing_edges_per_node: usize,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            cooldown_enabled: true,
            cooldown_window: Duration::from_secs(300),
            evidence_enabled: true,
            evidence_threshold: 2,
            evidence_window: Duration::from_secs(3600),
            provenance_enabled: true,
            provenance_retention: Duration::from_secs(86_400),
            policy_enabled: true,
            max_outgoing_edges_per_node: 50,
        }
    }
}

#[derive(Debug, Clone)]
struct ProvenanceRecord {
    first_observed: Instant,
    last_observed: Instant,
    materialized: bool,
    last_session: Arc<str>,
}

/// Cooldown / evidence / policy / provenance gate in front of edge
/// materialization.
pub struct GatingEngine {
    config: GatingConfig,
    provenance: Mutex<HashMap<SuggestionKey, ProvenanceRecord>>,
    cooldowns: Mutex<HashMap<(NodeId, NodeId), Instant>>,
    /// Distinct methods observed for a triple, plus when one was last added.
    evidence: Mutex<HashMap<SuggestionKey, (HashSet<String>, Instant)>>,
    deny_list: Mutex<HashSet<NodeId>>,
    outgoing_counts: Mutex<HashMap<NodeId, usize>>,
}

impl GatingEngine {
    pub fn new(config: GatingConfig) -> Self {
        Self {
            config,
            provenance: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            evidence: Mutex::new(HashMap::new()),
            deny_list: Mutex::new(HashSet::new()),
            outgoing_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn deny_node(&self, id: &NodeId) {
        self.deny_list.lock().insert(id.clone());
    }

    pub fn allow_node(&self, id: &NodeId) {
        self.deny_list.lock().remove(id);
    }

    /// Runs `suggestion` through provenance, cooldown, per-node policy, and
    /// evidence buffering, in that order.
    pub fn process_suggestion(&self, suggestion: &Suggestion, session_id: &str) -> Decision {
        let now = Instant::now();
        let key = key_of(suggestion);

        if self.config.provenance_enabled {
            let mut provenance = self.provenance.lock();
            let record = provenance.entry(key.clone()).or_insert_with(|| ProvenanceRecord {
                first_observed: now,
                last_observed: now,
                materialized: false,
                last_session: Arc::from(session_id),
            });
            record.last_observed = now;
            record.last_session = Arc::from(session_id);
        }

        if self.config.cooldown_enabled {
            let pair = (suggestion.from.clone(), suggestion.to.clone());
            if let Some(&last) = self.cooldowns.lock().get(&pair) {
                if now.duration_since(last) < self.config.cooldown_window {
                    return Decision::Blocked("cooldown active".to_string());
                }
            }
        }

        if self.config.policy_enabled {
            let denied = {
                let deny_list = self.deny_list.lock();
                deny_list.contains(&suggestion.from) || deny_list.contains(&suggestion.to)
            };
            if denied {
                return Decision::Blocked("node denied by policy".to_string());
            }
            let at_cap = {
                let outgoing = self.outgoing_counts.lock();
                outgoing.get(&suggestion.from).copied().unwrap_or(0) >= self.config.max_outgoing_edges_per_node
            };
            if at_cap {
                return Decision::Blocked("outgoing edge cap reached".to_string());
            }
        }

        if self.config.evidence_enabled {
            let mut evidence = self.evidence.lock();
            let entry = evidence.entry(key).or_insert_with(|| (HashSet::new(), now));
            entry.0.insert(suggestion.method.clone());
            entry.1 = now;
            if (entry.0.len() as u32) < self.config.evidence_threshold {
                return Decision::Pending;
            }
        }

        Decision::Materialize
    }

    /// Called by the caller after it actually creates the edge for a
    /// materialized suggestion: starts the cooldown, marks provenance
    /// materialized, and bumps the source node's outgoing-edge count.
    pub fn record_materialization(&self, suggestion: &Suggestion) {
        let now = Instant::now();
        let key = key_of(suggestion);

        self.cooldowns
            .lock()
            .insert((suggestion.from.clone(), suggestion.to.clone()), now);

        if let Some(record) = self.provenance.lock().get_mut(&key) {
            record.materialized = true;
            record.last_observed = now;
        }

        *self.outgoing_counts.lock().entry(suggestion.from.clone()).or_insert(0) += 1;
        self.evidence.lock().remove(&key);
    }

    /// Trims expired cooldowns, evidence entries not reinforced within
    /// their window, and provenance records past their retention period.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.cooldowns
            .lock()
            .retain(|_, last| now.duration_since(*last) <= self.config.cooldown_window);
        self.evidence
            .lock()
            .retain(|_, (_, last_seen)| now.duration_since(*last_seen) <= self.config.evidence_window);
        self.provenance
            .lock()
            .retain(|_, record| now.duration_since(record.last_observed) <= self.config.provenance_retention);
    }
}
