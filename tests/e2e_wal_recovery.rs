//! End-to-end coverage of WAL corruption handling during recovery: a
//! corrupted embedding update is skipped and replay continues, but
//! corruption anywhere else stops the scan.

use ligaturedb::{Engine, Node, SyncMode, Wal, WalConfig, WalOp};

/// Finds the single WAL segment file written in `dir` and flips one bit of
/// its `n`th line's recorded CRC, corrupting that entry without touching
/// its neighbors.
fn flip_crc_bit(dir: &std::path::Path, n: usize) {
    let segment = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("wal"))
        .expect("exactly one WAL segment");

    let content = std::fs::read_to_string(&segment).unwrap();
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let mut line: serde_json::Value = serde_json::from_str(&lines[n]).unwrap();
    let crc = line["crc32c"].as_u64().expect("crc32c field");
    line["crc32c"] = serde_json::Value::from(crc ^ 1);
    lines[n] = serde_json::to_string(&line).unwrap();

    std::fs::write(&segment, lines.join("\n") + "\n").unwrap();
}

fn write_wal(dir: &std::path::Path, ops: Vec<WalOp>) {
    let mut config = WalConfig::new(dir);
    config.sync_mode = SyncMode::None;
    let wal = Wal::open(config, 1).unwrap();
    for op in ops {
        wal.append(op).unwrap();
    }
    wal.close().unwrap();
}

#[test]
fn corrupted_embedding_update_is_skipped_and_replay_continues() {
    let dir = tempfile::tempdir().unwrap();
    write_wal(
        dir.path(),
        vec![
            WalOp::CreateNode { node: Node::new("a") },
            WalOp::UpdateEmbedding {
                id: "a".to_string(),
                embedding: vec![0.1, 0.2, 0.3],
            },
            WalOp::CreateNode { node: Node::new("b") },
        ],
    );
    flip_crc_bit(dir.path(), 1);

    let (engine, tally, _) = ligaturedb::wal::recovery::recover(dir.path()).unwrap();
    assert_eq!(tally.applied, 2);
    assert_eq!(tally.skipped, 1);
    assert_eq!(tally.failed, 0);
    assert!(engine.get_node(&"a".to_string()).is_ok());
    assert!(engine.get_node(&"b".to_string()).is_ok());
}

#[test]
fn corrupted_create_node_stops_replay_at_that_entry() {
    let dir = tempfile::tempdir().unwrap();
    write_wal(
        dir.path(),
        vec![
            WalOp::CreateNode { node: Node::new("a") },
            WalOp::CreateNode { node: Node::new("b") },
            WalOp::CreateNode { node: Node::new("c") },
        ],
    );
    flip_crc_bit(dir.path(), 1);

    let (engine, tally, _) = ligaturedb::wal::recovery::recover(dir.path()).unwrap();
    assert_eq!(tally.applied, 1);
    assert_eq!(tally.failed, 0);
    assert!(engine.get_node(&"a".to_string()).is_ok());
    assert!(engine.get_node(&"b".to_string()).is_err());
    assert!(engine.get_node(&"c".to_string()).is_err());
}

#[test]
fn sequence_numbers_stay_strictly_increasing_across_singleton_and_batch_appends() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WalConfig::new(dir.path());
    config.sync_mode = SyncMode::None;
    let wal = Wal::open(config, 1).unwrap();

    let s1 = wal.append(WalOp::CreateNode { node: Node::new("a") }).unwrap();
    let mut batch = ligaturedb::WalBatch::new();
    batch.push(WalOp::CreateNode { node: Node::new("b") });
    batch.push(WalOp::CreateNode { node: Node::new("c") });
    let batch_sequences = wal.commit_batch(batch).unwrap();
    let s_last = wal.append(WalOp::CreateNode { node: Node::new("d") }).unwrap();

    let mut all = vec![s1];
    all.extend(batch_sequences);
    all.push(s_last);
    for pair in all.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}

#[test]
fn replaying_the_same_wal_twice_tallies_the_second_pass_as_all_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_wal(
        dir.path(),
        vec![
            WalOp::CreateNode { node: Node::new("a") },
            WalOp::CreateNode { node: Node::new("b") },
        ],
    );

    let (_engine, first, _) = ligaturedb::wal::recovery::recover(dir.path()).unwrap();
    assert_eq!(first.applied, 2);

    // A WAL that actually replays a duplicate create tallies it skipped,
    // not failed, independent of how many times recovery itself runs.
    let dir2 = tempfile::tempdir().unwrap();
    write_wal(
        dir2.path(),
        vec![
            WalOp::CreateNode { node: Node::new("a") },
            WalOp::CreateNode { node: Node::new("a") },
        ],
    );
    let (_engine2, second, _) = ligaturedb::wal::recovery::recover(dir2.path()).unwrap();
    assert_eq!(second.applied, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.failed, 0);
}
