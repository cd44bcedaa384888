//! End-to-end coverage of topological link prediction over a small "kite"
//! graph, and the [0, 1] normalization guarantee across every scorer.

use ligaturedb::linkpred::predict;
use ligaturedb::{LinkGraph, PredictConfig, Scorer};

fn kite() -> LinkGraph {
    // alice-bob, alice-charlie, bob-diana, charlie-diana, eve isolated.
    let mut g = LinkGraph::new();
    g.add_edge(&"alice".to_string(), &"bob".to_string());
    g.add_edge(&"alice".to_string(), &"charlie".to_string());
    g.add_edge(&"bob".to_string(), &"diana".to_string());
    g.add_edge(&"charlie".to_string(), &"diana".to_string());
    // eve is isolated: never added as an edge endpoint.
    g
}

#[test]
fn common_neighbors_ranks_diana_first_with_normalized_score_one_half() {
    let g = kite();
    let predictions = predict(&g, &"alice".to_string(), Scorer::CommonNeighbors, &PredictConfig::default());
    assert_eq!(predictions[0].target, "diana");
    assert!((predictions[0].score - 0.5).abs() < 1e-9);
}

#[test]
fn adamic_adar_and_jaccard_also_rank_diana_first() {
    let g = kite();
    for scorer in [Scorer::AdamicAdar, Scorer::Jaccard] {
        let predictions = predict(&g, &"alice".to_string(), scorer, &PredictConfig::default());
        assert_eq!(predictions[0].target, "diana", "{:?} did not rank diana first", scorer);
    }
}

#[test]
fn isolated_node_never_appears_as_a_two_hop_candidate() {
    let g = kite();
    for source in ["alice", "bob", "charlie", "diana"] {
        let predictions = predict(&g, &source.to_string(), Scorer::CommonNeighbors, &PredictConfig::default());
        assert!(predictions.iter().all(|p| p.target != "eve"));
    }
}

#[test]
fn preferential_attachment_still_scores_a_node_with_no_common_neighbor() {
    let mut g = kite();
    g.add_edge(&"eve".to_string(), &"frank".to_string());
    // eve shares no neighbor with alice and falls outside the 2-hop
    // frontier, but preferential attachment draws from every non-neighbor.
    let predictions = predict(&g, &"alice".to_string(), Scorer::PreferentialAttachment, &PredictConfig::default());
    assert!(predictions.iter().any(|p| p.target == "eve"));
}

#[test]
fn every_scorer_normalizes_into_the_unit_interval_on_a_denser_graph() {
    let mut g = LinkGraph::new();
    for i in 0..6 {
        for j in (i + 1)..6 {
            if (i + j) % 2 == 0 {
                g.add_edge(&format!("n{i}"), &format!("n{j}"));
            }
        }
    }
    for scorer in [
        Scorer::CommonNeighbors,
        Scorer::Jaccard,
        Scorer::AdamicAdar,
        Scorer::ResourceAllocation,
        Scorer::PreferentialAttachment,
    ] {
        for source in 0..6 {
            let predictions = predict(&g, &format!("n{source}"), scorer, &PredictConfig::default());
            for p in predictions {
                assert!((0.0..=1.0).contains(&p.score), "{:?} produced out-of-range score {}", scorer, p.score);
            }
        }
    }
}
