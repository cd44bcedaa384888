//! Recovery: load the latest snapshot (if any), then replay WAL entries with
//! a sequence past it through a real [`PersistentEngine`], so schema state
//! (unique/node-key tracking maps, label/incidence indexes) comes back
//! exactly as it would from a sequence of live calls.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::engine::{Engine, PersistentEngine};
use crate::error::{GraphError, Result};
use crate::kv::Kv;
use crate::schema::SchemaManager;

use super::{list_segments, WalLine, WalOp};

/// Tallies how a recovery replay went. Callers should inspect this before
/// trusting the reopened store.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayResult {
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Recovers a [`PersistentEngine`] from `dir`'s snapshot + WAL segments.
/// Returns the engine, the replay tally, and the sequence number the next
/// WAL append should continue from.
pub fn recover(dir: &Path) -> Result<(PersistentEngine, ReplayResult, u64)> {
    let kv = Kv::new();
    let schema = Arc::new(SchemaManager::new());
    let engine = PersistentEngine::new(kv, schema.clone());

    let mut snapshot_sequence = 0u64;
    if let Some(snapshot) = super::snapshot::load(dir)? {
        snapshot_sequence = snapshot.sequence;
        for node in &snapshot.nodes {
            for label in &node.labels {
                schema.record_node(label, &node.id, &node.properties);
            }
        }
        engine.kv().bulk_load(
            snapshot
                .nodes
                .iter()
                .map(|n| Ok((crate::keys::node_key(&n.id), crate::codec::encode_node(n)?)))
                .collect::<Result<Vec<_>>>()?,
        )?;
        engine.kv().bulk_load(snapshot.nodes.iter().flat_map(|n| {
            n.labels
                .iter()
                .map(move |l| (crate::keys::label_index_key(l, &n.id), Vec::new()))
        }))?;
        engine.kv().bulk_load(
            snapshot
                .edges
                .iter()
                .map(|e| Ok((crate::keys::edge_key(&e.id), crate::codec::encode_edge(e)?)))
                .collect::<Result<Vec<_>>>()?,
        )?;
        engine.kv().bulk_load(snapshot.edges.iter().flat_map(|e| {
            [
                (crate::keys::outgoing_key(&e.start_node, &e.id), Vec::new()),
                (crate::keys::incoming_key(&e.end_node, &e.id), Vec::new()),
            ]
        }))?;
    }

    let mut result = ReplayResult::default();
    let mut max_sequence = snapshot_sequence;

    'segments: for segment_path in list_segments(dir)? {
        let file = File::open(&segment_path)?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: WalLine = match serde_json::from_str(&line) {
                Ok(p) => p,
                Err(e) => {
                    warn!(segment = %segment_path.display(), error = %e, "undecodable WAL line, stopping replay");
                    break 'segments;
                }
            };
            if parsed.sequence <= snapshot_sequence {
                continue;
            }

            let op: Option<WalOp> = serde_json::from_str(&parsed.payload).ok();
            let crc_ok = crc32c::crc32c(parsed.payload.as_bytes()) == parsed.crc32c;

            let op = match (op, crc_ok) {
                (None, _) => {
                    break 'segments;
                }
                (Some(op), true) => op,
                (Some(WalOp::UpdateEmbedding { id, embedding }), false) => {
                    warn!(node_id = %id, "dropping corrupt embedding-update WAL entry");
                    result.skipped += 1;
                    max_sequence = max_sequence.max(parsed.sequence);
                    let _ = embedding;
                    continue;
                }
                (Some(_), false) => {
                    break 'segments;
                }
            };

            max_sequence = max_sequence.max(parsed.sequence);
            apply_replayed_op(&engine, op, &mut result);
        }
    }

    Ok((engine, result, max_sequence + 1))
}

fn apply_replayed_op(engine: &PersistentEngine, op: WalOp, result: &mut ReplayResult) {
    let outcome = match op {
        WalOp::CreateNode { node } => engine.create_node(node),
        WalOp::UpdateNode { node } => engine.update_node(node),
        WalOp::DeleteNode { id } => engine.delete_node(&id),
        WalOp::CreateEdge { edge } => engine.create_edge(edge),
        WalOp::UpdateEdge { edge } => engine.update_edge(edge),
        WalOp::DeleteEdge { id } => engine.delete_edge(&id),
        WalOp::BulkCreateNodes { nodes } => engine.create_nodes_bulk(nodes),
        WalOp::BulkCreateEdges { edges } => {
            let mut last = Ok(());
            for edge in edges {
                last = engine.create_edge(edge);
                if last.is_err() {
                    break;
                }
            }
            last
        }
        WalOp::UpdateEmbedding { id, embedding } => match engine.get_node(&id) {
            Ok(mut node) => {
                node.embedding = Some(embedding);
                engine.update_node(node)
            }
            Err(GraphError::NotFound(_)) => {
                warn!(node_id = %id, "embedding update for missing node during replay");
                Err(GraphError::NotFound(format!("node '{id}'")))
            }
            Err(e) => Err(e),
        },
        WalOp::Checkpoint { .. } => Ok(()),
    };

    match outcome {
        Ok(()) => result.applied += 1,
        Err(GraphError::AlreadyExists(_)) | Err(GraphError::NotFound(_)) => result.skipped += 1,
        Err(GraphError::InvalidEdge(_)) => result.failed += 1,
        Err(_) => result.failed += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Node};
    use crate::wal::{Wal, WalConfig};

    #[test]
    fn recovers_from_wal_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = WalConfig::new(dir.path());
        cfg.sync_mode = crate::wal::SyncMode::None;
        let wal = Wal::open(cfg, 1).unwrap();
        wal.append(WalOp::CreateNode { node: Node::new("a") }).unwrap();
        wal.append(WalOp::CreateNode { node: Node::new("b") }).unwrap();
        wal.append(WalOp::CreateEdge {
            edge: Edge::new("e1", "a", "b", "KNOWS"),
        })
        .unwrap();
        wal.close().unwrap();

        let (engine, tally, next_seq) = recover(dir.path()).unwrap();
        assert_eq!(tally.applied, 3);
        assert_eq!(tally.failed, 0);
        assert_eq!(next_seq, 4);
        assert!(engine.get_node(&"a".to_string()).is_ok());
        assert!(engine.get_edge(&"e1".to_string()).is_ok());
    }

    #[test]
    fn duplicate_create_during_replay_is_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = WalConfig::new(dir.path());
        cfg.sync_mode = crate::wal::SyncMode::None;
        let wal = Wal::open(cfg, 1).unwrap();
        wal.append(WalOp::CreateNode { node: Node::new("a") }).unwrap();
        wal.append(WalOp::CreateNode { node: Node::new("a") }).unwrap();
        wal.close().unwrap();

        let (_engine, tally, _) = recover(dir.path()).unwrap();
        assert_eq!(tally.applied, 1);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.failed, 0);
    }

    #[test]
    fn edge_referencing_missing_node_is_failed_not_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = WalConfig::new(dir.path());
        cfg.sync_mode = crate::wal::SyncMode::None;
        let wal = Wal::open(cfg, 1).unwrap();
        wal.append(WalOp::CreateEdge {
            edge: Edge::new("e1", "missing-a", "missing-b", "KNOWS"),
        })
        .unwrap();
        wal.append(WalOp::CreateNode { node: Node::new("c") }).unwrap();
        wal.close().unwrap();

        let (engine, tally, _) = recover(dir.path()).unwrap();
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.applied, 1);
        assert!(engine.get_node(&"c".to_string()).is_ok());
    }

    #[test]
    fn snapshot_plus_wal_tail_recovers_full_state() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = crate::wal::snapshot::Snapshot::new(2, vec![Node::new("a"), Node::new("b")], vec![]);
        crate::wal::snapshot::save(dir.path(), &snapshot).unwrap();

        let mut cfg = WalConfig::new(dir.path());
        cfg.sync_mode = crate::wal::SyncMode::None;
        let wal = Wal::open(cfg, 3).unwrap();
        wal.append(WalOp::CreateEdge {
            edge: Edge::new("e1", "a", "b", "KNOWS"),
        })
        .unwrap();
        wal.close().unwrap();

        let (engine, tally, _) = recover(dir.path()).unwrap();
        assert_eq!(tally.applied, 1);
        assert!(engine.get_node(&"a".to_string()).is_ok());
        assert!(engine.get_edge(&"e1".to_string()).is_ok());
    }
}
