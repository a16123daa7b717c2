// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use std::time::Duration;

use causeway_cortex::application::{CycleRunner, KernelConfig};
use causeway_cortex::artifacts::{self, ArtifactStore};
use causeway_cortex::ledger::{ledger_files, read_ledger};
use causeway_cortex::{
    AppendOnlyWriter, BridgeAdapter, ChainVerifier, ChangeEvent, CycleRecord, EventBus, FileChange, FileStatus,
    LedgerConfig, TamperStatus, GENESIS_HASH,
};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn history() -> Vec<ChangeEvent> {
    [
        ("add search endpoint", "src/search.rs", FileStatus::Added),
        ("refactor search ranking", "src/search.rs", FileStatus::Modified),
        ("add unit test for ranking", "tests/ranking_test.rs", FileStatus::Added),
        ("fix panic in ranking", "src/search.rs", FileStatus::Modified),
        ("add test for empty query", "tests/query_test.rs", FileStatus::Added),
    ]
    .iter()
    .enumerate()
    .map(|(i, (message, path, status))| ChangeEvent {
        hash: format!("h{}", i),
        message: message.to_string(),
        author: "dev".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1 + i as u32, 12, 0, 0).unwrap(),
        files: vec![FileChange {
            path: path.to_string(),
            status: *status,
            additions: 30,
            deletions: 5,
        }],
    })
    .collect()
}

fn runner(dir: &TempDir, ledger: Arc<AppendOnlyWriter>) -> CycleRunner {
    let bus = EventBus::new(64);
    CycleRunner::new(
        KernelConfig::default(),
        BridgeAdapter::native(bus.clone()),
        ArtifactStore::new(dir.path()),
        ledger,
        bus,
    )
}

/// Size of one serialized cycle record for `history()`
async fn record_len() -> u64 {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(artifacts::LEDGER);
    let ledger = Arc::new(AppendOnlyWriter::new(&path, LedgerConfig::default()));
    let mut probe = runner(&dir, ledger.clone());
    probe.run_cycle("repo-a", &history(), &[]).await.unwrap();
    ledger.close().await.unwrap();
    std::fs::metadata(&path).unwrap().len()
}

#[tokio::test]
async fn test_rotation_keeps_chain_intact() {
    let len = record_len().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(artifacts::LEDGER);
    let config = LedgerConfig {
        buffer_size: 1,
        flush_interval: Duration::from_secs(60),
        // Rotates before the fourth record is written
        max_file_size: len * 5 / 2,
    };
    let ledger = Arc::new(AppendOnlyWriter::new(&path, config));
    let mut runner = runner(&dir, ledger.clone());

    let events = history();
    for _ in 0..5 {
        runner.run_cycle("repo-a", &events, &[]).await.unwrap();
    }
    assert_eq!(runner.close().await.unwrap(), 5);
    ledger.close().await.unwrap();

    assert_eq!(ledger.rotations().await, 1);
    let files = ledger_files(&path).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files.last().unwrap(), &path);

    let records: Vec<CycleRecord> = read_ledger(&path, true).await.unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.cycle_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(records[0].prev_hash, GENESIS_HASH);

    let result = ChainVerifier::verify_chain(&records);
    assert!(result.valid, "{:?}", result.error_message);
    assert_eq!(result.verified_entries, 5);
}

#[tokio::test]
async fn test_mutation_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(artifacts::LEDGER);
    let ledger = Arc::new(AppendOnlyWriter::new(&path, LedgerConfig::default()));
    let mut runner = runner(&dir, ledger.clone());
    for _ in 0..3 {
        runner.run_cycle("repo-a", &history(), &[]).await.unwrap();
    }
    ledger.close().await.unwrap();

    let mut records: Vec<CycleRecord> = read_ledger(&path, true).await.unwrap();
    records[1].metadata.events_processed += 1;

    assert!(matches!(
        ChainVerifier::detect_tampering(&records[1]),
        TamperStatus::ContentTampered { .. }
    ));
    let result = ChainVerifier::verify_chain(&records);
    assert!(!result.valid);
    assert_eq!(result.first_invalid_index, Some(1));
}
