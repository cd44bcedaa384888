//! Full-state snapshot: every node and edge as of a given WAL sequence,
//! written atomically (temp file, fsync, rename, directory fsync) so a crash
//! mid-write never leaves a half-written snapshot visible.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{GraphError, Result};
use crate::model::{Edge, Node};

/// Bumped whenever the snapshot's on-disk shape changes incompatibly.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The highest WAL sequence number covered by this snapshot. Recovery
    /// only replays WAL entries with a strictly greater sequence.
    pub sequence: u64,
    /// When this snapshot was taken.
    pub timestamp: OffsetDateTime,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub version: u32,
}

impl Snapshot {
    pub fn new(sequence: u64, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            sequence,
            timestamp: OffsetDateTime::now_utc(),
            nodes,
            edges,
            version: CURRENT_SNAPSHOT_VERSION,
        }
    }
}

fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join("snapshot.json")
}

/// Writes `snapshot` to `dir/snapshot.json` via temp-file-then-rename.
pub fn save(dir: &Path, snapshot: &Snapshot) -> Result<()> {
    fs::create_dir_all(dir)?;
    let final_path = snapshot_path(dir);
    let tmp_path = dir.join("snapshot.json.tmp");

    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(&file);
        serde_json::to_writer(&mut writer, snapshot)
            .map_err(|e| GraphError::SnapshotFailed(format!("encode failed: {e}")))?;
        writer.flush()?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, &final_path)?;
    super::fsync_dir(dir)?;
    Ok(())
}

/// Loads `dir/snapshot.json`, if present. Refuses a snapshot whose version
/// exceeds what this build understands.
pub fn load(dir: &Path) -> Result<Option<Snapshot>> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    let snapshot: Snapshot = serde_json::from_slice(&bytes)
        .map_err(|e| GraphError::SnapshotFailed(format!("decode failed: {e}")))?;
    if snapshot.version > CURRENT_SNAPSHOT_VERSION {
        return Err(GraphError::SnapshotFailed(format!(
            "snapshot version {} is newer than this build supports ({})",
            snapshot.version, CURRENT_SNAPSHOT_VERSION
        )));
    }
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::new(42, vec![Node::new("a")], vec![]);
        save(dir.path(), &snapshot).unwrap();

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.sequence, 42);
        assert_eq!(loaded.nodes.len(), 1);
    }

    #[test]
    fn missing_snapshot_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn future_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut snapshot = Snapshot::new(1, vec![], vec![]);
        snapshot.version = CURRENT_SNAPSHOT_VERSION + 1;
        save(dir.path(), &snapshot).unwrap();

        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, GraphError::SnapshotFailed(_)));
    }
}
