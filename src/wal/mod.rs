//! C7: write-ahead log. One JSON object per line, each carrying a monotonic
//! sequence number and a CRC32C over its encoded payload. Segments rotate by
//! size or entry count; [`snapshot`] and [`recovery`] handle checkpointing
//! and replay on open.

pub mod recovery;
pub mod snapshot;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{GraphError, Result};
use crate::model::{Edge, EdgeId, Node, NodeId};

/// How aggressively the WAL flushes to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync after every append.
    Immediate,
    /// fsync on a periodic tick (driven by the caller, e.g. [`crate::cache`]).
    Batch,
    /// Rely on the OS page cache only.
    None,
}

/// The logical operation a WAL entry records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalOp {
    CreateNode { node: Node },
    UpdateNode { node: Node },
    DeleteNode { id: NodeId },
    CreateEdge { edge: Edge },
    UpdateEdge { edge: Edge },
    DeleteEdge { id: EdgeId },
    BulkCreateNodes { nodes: Vec<Node> },
    BulkCreateEdges { edges: Vec<Edge> },
    /// Embedding refresh, written outside the normal update path so a
    /// re-embedding pass doesn't churn `updated_at` on every node.
    UpdateEmbedding { id: NodeId, embedding: Vec<f32> },
    /// Marks that every entry up to `sequence` is covered by a snapshot.
    Checkpoint { sequence: u64 },
}

impl WalOp {
    fn tag(&self) -> &'static str {
        match self {
            WalOp::CreateNode { .. } => "create_node",
            WalOp::UpdateNode { .. } => "update_node",
            WalOp::DeleteNode { .. } => "delete_node",
            WalOp::CreateEdge { .. } => "create_edge",
            WalOp::UpdateEdge { .. } => "update_edge",
            WalOp::DeleteEdge { .. } => "delete_edge",
            WalOp::BulkCreateNodes { .. } => "bulk_create_nodes",
            WalOp::BulkCreateEdges { .. } => "bulk_create_edges",
            WalOp::UpdateEmbedding { .. } => "update_embedding",
            WalOp::Checkpoint { .. } => "checkpoint",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WalLine {
    sequence: u64,
    timestamp: OffsetDateTime,
    /// JSON-encoded [`WalOp`], checksummed as opaque bytes so corruption in
    /// the payload is caught independently of whether it still happens to
    /// parse as valid JSON.
    payload: String,
    crc32c: u32,
}

/// Tunables for [`Wal::open`].
#[derive(Debug, Clone)]
pub struct WalConfig {
    pub dir: PathBuf,
    pub sync_mode: SyncMode,
    pub max_file_size: u64,
    pub max_entries: u64,
}

impl WalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sync_mode: SyncMode::Batch,
            max_file_size: 64 * 1024 * 1024,
            max_entries: 100_000,
        }
    }
}

struct Segment {
    file: File,
    path: PathBuf,
    entries: u64,
    bytes: u64,
}

/// The write-ahead log for one open store. Appends are serialized behind a
/// single mutex, matching the store's single-writer discipline.
pub struct Wal {
    inner: Mutex<Inner>,
}

struct Inner {
    dir: PathBuf,
    segment: Segment,
    next_sequence: u64,
    sync_mode: SyncMode,
    max_file_size: u64,
    max_entries: u64,
    closed: bool,
}

/// A batch of ops staged without sequence numbers; [`Wal::commit_batch`]
/// reserves a contiguous sequence range for the whole batch atomically.
#[derive(Default)]
pub struct WalBatch {
    ops: Vec<WalOp>,
}

impl WalBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WalOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Wal {
    /// Opens a fresh segment in `config.dir`, continuing sequence numbers
    /// from `starting_sequence` (the caller determines this from recovery).
    pub fn open(config: WalConfig, starting_sequence: u64) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let segment = open_new_segment(&config.dir, starting_sequence)?;
        fsync_dir(&config.dir)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                dir: config.dir,
                segment,
                next_sequence: starting_sequence,
                sync_mode: config.sync_mode,
                max_file_size: config.max_file_size,
                max_entries: config.max_entries,
                closed: false,
            }),
        })
    }

    /// Appends a single op, assigning it the next sequence number.
    pub fn append(&self, op: WalOp) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.write_line(sequence, &op)?;
        inner.maybe_sync()?;
        inner.maybe_rotate()?;
        Ok(sequence)
    }

    /// Writes every op in `batch` under one reserved, contiguous sequence
    /// range. Any concurrent [`Wal::append`]/[`Wal::commit_batch`] call is
    /// serialized behind the same lock, so it necessarily receives a range
    /// fully before or after this one.
    pub fn commit_batch(&self, batch: WalBatch) -> Result<Vec<u64>> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let start = inner.next_sequence;
        let mut assigned = Vec::with_capacity(batch.ops.len());
        for (offset, op) in batch.ops.into_iter().enumerate() {
            let sequence = start + offset as u64;
            inner.write_line(sequence, &op)?;
            assigned.push(sequence);
        }
        inner.next_sequence = start + assigned.len() as u64;
        inner.maybe_sync()?;
        inner.maybe_rotate()?;
        Ok(assigned)
    }

    /// Forces an fsync of the current segment regardless of sync mode. The
    /// batch-mode flush ticker calls this.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.check_open()?;
        inner.segment.file.sync_data()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.segment.file.sync_data()?;
            inner.closed = true;
        }
        Ok(())
    }

    /// Next sequence number that would be assigned, for tests/diagnostics.
    pub fn next_sequence(&self) -> u64 {
        self.inner.lock().next_sequence
    }
}

impl Inner {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(GraphError::WalClosed);
        }
        Ok(())
    }

    fn write_line(&mut self, sequence: u64, op: &WalOp) -> Result<()> {
        let payload = serde_json::to_string(op)
            .map_err(|e| GraphError::Serialization(format!("WAL payload encode failed: {e}")))?;
        let crc32c = crc32c::crc32c(payload.as_bytes());
        let line = WalLine {
            sequence,
            timestamp: OffsetDateTime::now_utc(),
            payload,
            crc32c,
        };
        let mut bytes = serde_json::to_vec(&line)
            .map_err(|e| GraphError::Serialization(format!("WAL line encode failed: {e}")))?;
        bytes.push(b'\n');
        self.segment.file.write_all(&bytes)?;
        self.segment.entries += 1;
        self.segment.bytes += bytes.len() as u64;
        Ok(())
    }

    fn maybe_sync(&mut self) -> Result<()> {
        if self.sync_mode == SyncMode::Immediate {
            self.segment.file.sync_data()?;
        }
        Ok(())
    }

    fn maybe_rotate(&mut self) -> Result<()> {
        if self.segment.bytes < self.max_file_size && self.segment.entries < self.max_entries {
            return Ok(());
        }
        self.segment.file.sync_data()?;
        self.segment = open_new_segment(&self.dir, self.next_sequence)?;
        fsync_dir(&self.dir)?;
        Ok(())
    }
}

/// Segment file name for the entry starting at `start_sequence`, zero-padded
/// so lexicographic and sequence order agree.
fn segment_path(dir: &Path, start_sequence: u64) -> PathBuf {
    dir.join(format!("{start_sequence:020}.wal"))
}

fn open_new_segment(dir: &Path, start_sequence: u64) -> Result<Segment> {
    let path = segment_path(dir, start_sequence);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(&path)?;
    Ok(Segment {
        file,
        path,
        entries: 0,
        bytes: 0,
    })
}

/// All segment files in `dir`, in sequence order, lowest `start_sequence`
/// first.
pub(crate) fn list_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("wal"))
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> WalConfig {
        let mut cfg = WalConfig::new(dir);
        cfg.sync_mode = SyncMode::None;
        cfg
    }

    #[test]
    fn append_assigns_increasing_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(config(dir.path()), 1).unwrap();
        let s1 = wal.append(WalOp::DeleteNode { id: "a".into() }).unwrap();
        let s2 = wal.append(WalOp::DeleteNode { id: "b".into() }).unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
    }

    #[test]
    fn commit_batch_reserves_contiguous_range() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(config(dir.path()), 5).unwrap();
        let mut batch = WalBatch::new();
        batch.push(WalOp::DeleteNode { id: "a".into() });
        batch.push(WalOp::DeleteNode { id: "b".into() });
        batch.push(WalOp::DeleteNode { id: "c".into() });
        let assigned = wal.commit_batch(batch).unwrap();
        assert_eq!(assigned, vec![5, 6, 7]);
        assert_eq!(wal.next_sequence(), 8);
    }

    #[test]
    fn rotation_creates_additional_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_entries = 2;
        let wal = Wal::open(cfg, 1).unwrap();
        for i in 0..5 {
            wal.append(WalOp::DeleteNode { id: format!("n{i}") }).unwrap();
        }
        let segments = list_segments(dir.path()).unwrap();
        assert!(segments.len() > 1);
    }

    #[test]
    fn closed_wal_rejects_append() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(config(dir.path()), 1).unwrap();
        wal.close().unwrap();
        assert!(matches!(
            wal.append(WalOp::DeleteNode { id: "a".into() }),
            Err(GraphError::WalClosed)
        ));
    }
}
