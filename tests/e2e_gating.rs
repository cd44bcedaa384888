//! End-to-end coverage of the gating layer: evidence accumulates per
//! distinct method on a (from, to, edge_type) triple, and a cooldown blocks
//! any suggestion between the same pair of nodes, regardless of method.

use std::time::Duration;

use ligaturedb::{Decision, GatingConfig, GatingEngine, Suggestion};

fn similarity_suggestion() -> Suggestion {
    Suggestion {
        from: "A".to_string(),
        to: "B".to_string(),
        confidence: 0.6,
        edge_type: "RELATES_TO".to_string(),
        method: "similarity".to_string(),
        reasons: vec!["similarity".to_string()],
    }
}

fn topology_suggestion() -> Suggestion {
    Suggestion {
        from: "A".to_string(),
        to: "B".to_string(),
        confidence: 0.7,
        edge_type: "RELATES_TO".to_string(),
        method: "topology".to_string(),
        reasons: vec!["common_neighbors".to_string()],
    }
}

#[test]
fn a_second_distinct_method_on_the_same_triple_materializes_then_cooldown_blocks_any_method_on_the_pair() {
    let gating = GatingEngine::new(GatingConfig {
        cooldown_window: Duration::from_secs(60),
        evidence_threshold: 2,
        ..GatingConfig::default()
    });

    // A similarity-only hit is the first distinct method for this triple: pending.
    assert_eq!(gating.process_suggestion(&similarity_suggestion(), "session-1"), Decision::Pending);
    // Repeating the same method again doesn't add a second distinct method.
    assert_eq!(gating.process_suggestion(&similarity_suggestion(), "session-1"), Decision::Pending);
    // A topology suggestion for the same (A, B, RELATES_TO) triple is the
    // second distinct method: evidence threshold 2 is now met.
    assert_eq!(gating.process_suggestion(&topology_suggestion(), "session-1"), Decision::Materialize);

    gating.record_materialization(&topology_suggestion());

    // Cooldown is keyed on the node pair, not the method: the similarity
    // suggestion for the same (A, B) pair is blocked too.
    assert_eq!(
        gating.process_suggestion(&similarity_suggestion(), "session-1"),
        Decision::Blocked("cooldown active".to_string())
    );
}

#[test]
fn denying_a_node_blocks_before_evidence_is_ever_consulted() {
    let gating = GatingEngine::new(GatingConfig {
        evidence_threshold: 1,
        ..GatingConfig::default()
    });
    gating.deny_node(&"B".to_string());
    assert_eq!(
        gating.process_suggestion(&similarity_suggestion(), "session-1"),
        Decision::Blocked("node denied by policy".to_string())
    );

    gating.allow_node(&"B".to_string());
    assert_eq!(gating.process_suggestion(&similarity_suggestion(), "session-1"), Decision::Materialize);
}

#[test]
fn cleanup_forgets_a_cooldown_that_has_fully_expired() {
    let gating = GatingEngine::new(GatingConfig {
        cooldown_window: Duration::from_millis(1),
        evidence_threshold: 1,
        ..GatingConfig::default()
    });
    let suggestion = similarity_suggestion();
    assert_eq!(gating.process_suggestion(&suggestion, "session-1"), Decision::Materialize);
    gating.record_materialization(&suggestion);

    std::thread::sleep(Duration::from_millis(5));
    gating.cleanup();

    assert_eq!(gating.process_suggestion(&suggestion, "session-1"), Decision::Materialize);
}
