// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Append-Only Ledger Writer
//!
//! Buffered, size-rotated NDJSON writer used for the cycle ledger.
//!
//! - Records are serialized on `append` and buffered in memory. The buffer is
//!   flushed when it reaches `buffer_size` records, when the periodic timer
//!   fires, or on `close`.
//! - A flush first checks the on-disk size. Once the file has reached
//!   `max_file_size` it is closed, renamed to
//!   `<stem>.<UTC timestamp>.jsonl` and a fresh file is opened under the
//!   original name.
//! - Flushes are reentrancy-guarded: a timer tick or buffer-full trigger that
//!   arrives while a flush is running is dropped; the records stay buffered
//!   for the next flush.
//! - `close` cancels the timer, waits for any in-flight flush, writes whatever
//!   is buffered and releases the file. Appends after `close` has begun fail.
//!
//! The writer is hash-agnostic. Hash chaining happens before records reach it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::KernelEvent;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Records buffered before an automatic flush
    pub buffer_size: usize,

    /// Period of the background flush timer
    pub flush_interval: Duration,

    /// Size at which the active file is rotated (bytes)
    pub max_file_size: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10,                       // Flush every 10 records
            flush_interval: Duration::from_secs(5), // or every 5 seconds
            max_file_size: 100 * 1024 * 1024,      // Rotate at 100 MB
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger {0} is closing; append rejected")]
    Closing(PathBuf),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize ledger record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed ledger line {line} in {path}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

struct WriterState {
    buffer: Vec<String>,
    file: Option<File>,
    appended: u64,
    rotations: u64,
}

/// Resets the reentrancy flag when a flush ends, including on error
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AppendOnlyWriter {
    path: PathBuf,
    config: LedgerConfig,
    state: Mutex<WriterState>,
    flushing: AtomicBool,
    closing: AtomicBool,
    shutdown_token: CancellationToken,
    event_bus: Option<EventBus>,
}

impl AppendOnlyWriter {
    pub fn new(path: impl Into<PathBuf>, config: LedgerConfig) -> Self {
        Self {
            path: path.into(),
            config,
            state: Mutex::new(WriterState {
                buffer: Vec::new(),
                file: None,
                appended: 0,
                rotations: 0,
            }),
            flushing: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Number of records accepted so far
    pub async fn appended(&self) -> u64 {
        self.state.lock().await.appended
    }

    pub async fn rotations(&self) -> u64 {
        self.state.lock().await.rotations
    }

    /// Serializes and buffers one record. Returns its append position.
    pub async fn append<T: Serialize>(&self, record: &T) -> Result<u64, LedgerError> {
        if self.is_closing() {
            return Err(LedgerError::Closing(self.path.clone()));
        }
        let line = serde_json::to_string(record)?;

        let (index, full) = {
            let mut state = self.state.lock().await;
            // close() may have started while waiting for the lock
            if self.is_closing() {
                return Err(LedgerError::Closing(self.path.clone()));
            }
            state.buffer.push(line);
            let index = state.appended;
            state.appended += 1;
            (index, state.buffer.len() >= self.config.buffer_size)
        };

        if full {
            self.flush().await?;
        }
        Ok(index)
    }

    /// Writes buffered records to disk. Returns immediately if another flush
    /// is already running or the buffer is empty.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        if self.flushing.swap(true, Ordering::AcqRel) {
            debug!(path = %self.path.display(), "Flush already in progress, skipping");
            return Ok(());
        }
        let _guard = FlushGuard(&self.flushing);

        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Final flush and release of the file handle. Idempotent.
    pub async fn close(&self) -> Result<(), LedgerError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown_token.cancel();

        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await?;
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        info!(
            path = %self.path.display(),
            appended = state.appended,
            rotations = state.rotations,
            "Ledger closed"
        );
        Ok(())
    }

    /// Spawns the periodic flush task. The task holds a weak reference and
    /// stops on `close` or when the writer is dropped.
    pub fn spawn_flush_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let writer: Weak<Self> = Arc::downgrade(self);
        let token = self.shutdown_token.clone();
        let period = self.config.flush_interval;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            // First tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let Some(writer) = writer.upgrade() else { break };
                        if let Err(e) = writer.flush().await {
                            warn!(path = %writer.path.display(), "Periodic ledger flush failed: {}", e);
                        }
                    }
                    _ = token.cancelled() => {
                        debug!("Ledger flush timer stopped");
                        break;
                    }
                }
            }
        })
    }

    async fn flush_locked(&self, state: &mut WriterState) -> Result<(), LedgerError> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        self.rotate_if_needed(state).await?;

        if state.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            state.file = Some(file);
        }

        let lines = std::mem::take(&mut state.buffer);
        let mut payload = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in &lines {
            payload.push_str(line);
            payload.push('\n');
        }

        let result = match state.file.as_mut() {
            Some(file) => match file.write_all(payload.as_bytes()).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            },
            None => Ok(()),
        };

        if let Err(e) = result {
            // Keep the records for the next attempt; drop the handle so it is reopened
            state.file = None;
            let mut restored = lines;
            restored.append(&mut state.buffer);
            state.buffer = restored;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), records = lines.len(), "Ledger flushed");
        Ok(())
    }

    async fn rotate_if_needed(&self, state: &mut WriterState) -> Result<(), LedgerError> {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size < self.config.max_file_size {
            return Ok(());
        }

        if let Some(mut file) = state.file.take() {
            file.flush().await?;
        }

        let rotated = rotated_path(&self.path);
        fs::rename(&self.path, &rotated).await?;
        state.rotations += 1;

        metrics::counter!("causeway_ledger_rotations_total").increment(1);
        info!(
            path = %self.path.display(),
            rotated_to = %rotated.display(),
            size,
            "Ledger rotated"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(KernelEvent::LedgerRotated {
                path: self.path.display().to_string(),
                rotated_to: rotated.display().to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }
}

/// `<dir>/<stem>.<YYYY-MM-DDTHH-MM-SS-mmmZ>.jsonl`, suffixed on collision.
fn rotated_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger".to_string());
    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut candidate = dir.join(format!("{}.{}.jsonl", stem, stamp));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}.{}-{}.jsonl", stem, stamp, n));
        n += 1;
    }
    candidate
}

/// Ledger files for `active` in append order: rotated files oldest first,
/// then the active file.
pub fn ledger_files(active: &Path) -> std::io::Result<Vec<PathBuf>> {
    let Some(dir) = active.parent() else {
        return Ok(vec![active.to_path_buf()]);
    };
    let stem = active
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!("{}.", stem);

    let mut rotated = Vec::new();
    if dir.exists() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if path != active && name.starts_with(&prefix) && name.ends_with(".jsonl") {
                rotated.push(path);
            }
        }
    }
    rotated.sort_by_key(|p| rotation_order_key(p));

    if active.exists() {
        rotated.push(active.to_path_buf());
    }
    Ok(rotated)
}

/// Orders `stem.<stamp>.jsonl` before `stem.<stamp>-1.jsonl`.
fn rotation_order_key(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = name.trim_end_matches(".jsonl");
    match base.rfind("Z-") {
        Some(idx) => match base[idx + 2..].parse::<u32>() {
            Ok(n) => (base[..idx + 1].to_string(), n),
            Err(_) => (base.to_string(), 0),
        },
        None => (base.to_string(), 0),
    }
}

/// Reads one NDJSON file. In strict mode the first malformed line is an
/// error; otherwise malformed lines are skipped with a warning.
pub async fn read_records<T: DeserializeOwned>(path: &Path, strict: bool) -> Result<Vec<T>, LedgerError> {
    let content = fs::read_to_string(path).await?;
    let mut records = Vec::new();

    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) if strict => {
                return Err(LedgerError::Malformed {
                    path: path.to_path_buf(),
                    line: i + 1,
                    message: e.to_string(),
                })
            }
            Err(e) => {
                warn!(path = %path.display(), line = i + 1, "Skipping malformed ledger line: {}", e);
            }
        }
    }
    Ok(records)
}

/// Reads the active ledger and all of its rotations in append order.
pub async fn read_ledger<T: DeserializeOwned>(active: &Path, strict: bool) -> Result<Vec<T>, LedgerError> {
    let mut records = Vec::new();
    for file in ledger_files(active)? {
        records.extend(read_records(&file, strict).await?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        seq: u64,
        body: String,
    }

    fn entry(seq: u64) -> Entry {
        Entry {
            seq,
            body: "x".repeat(80),
        }
    }

    #[tokio::test]
    async fn test_buffer_flushes_at_capacity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger").join("cycles.jsonl");
        let config = LedgerConfig {
            buffer_size: 3,
            ..Default::default()
        };
        let writer = AppendOnlyWriter::new(&path, config);

        writer.append(&entry(0)).await.unwrap();
        writer.append(&entry(1)).await.unwrap();
        assert!(!path.exists());

        writer.append(&entry(2)).await.unwrap();
        let records: Vec<Entry> = read_records(&path, true).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_close_flushes_and_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycles.jsonl");
        let writer = AppendOnlyWriter::new(&path, LedgerConfig::default());

        assert_eq!(writer.append(&entry(0)).await.unwrap(), 0);
        assert_eq!(writer.append(&entry(1)).await.unwrap(), 1);
        writer.close().await.unwrap();

        let records: Vec<Entry> = read_records(&path, true).await.unwrap();
        assert_eq!(records, vec![entry(0), entry(1)]);

        let err = writer.append(&entry(2)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Closing(_)));
        // Second close is a no-op
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_happens_once_without_loss() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycles.jsonl");
        let line_len = serde_json::to_string(&entry(0)).unwrap().len() as u64 + 1;
        let config = LedgerConfig {
            buffer_size: 1,
            flush_interval: Duration::from_secs(60),
            max_file_size: line_len * 10,
        };
        let writer = AppendOnlyWriter::new(&path, config);

        for seq in 0..15 {
            writer.append(&entry(seq)).await.unwrap();
        }
        writer.close().await.unwrap();

        assert_eq!(writer.rotations().await, 1);
        let files = ledger_files(&path).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files.last().unwrap(), &path);
        let rotated_name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(rotated_name.starts_with("cycles."));
        assert!(!rotated_name.contains(':'));

        let rotated: Vec<Entry> = read_records(&files[0], true).await.unwrap();
        let active: Vec<Entry> = read_records(&path, true).await.unwrap();
        assert_eq!(rotated.len(), 10);
        assert_eq!(active.len(), 5);

        let all: Vec<Entry> = read_ledger(&path, true).await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..15).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_flush_timer_writes_partial_buffer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycles.jsonl");
        let config = LedgerConfig {
            buffer_size: 100,
            flush_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let writer = Arc::new(AppendOnlyWriter::new(&path, config));
        let timer = writer.spawn_flush_timer();

        writer.append(&entry(7)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let records: Vec<Entry> = read_records(&path, true).await.unwrap();
        assert_eq!(records, vec![entry(7)]);

        writer.close().await.unwrap();
        timer.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycles.jsonl");
        let config = LedgerConfig {
            buffer_size: 4,
            ..Default::default()
        };
        let writer = Arc::new(AppendOnlyWriter::new(&path, config));

        let mut handles = Vec::new();
        for task in 0..8u64 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25u64 {
                    writer.append(&entry(task * 100 + i)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        writer.close().await.unwrap();

        let mut seqs: Vec<u64> = read_records::<Entry>(&path, true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs.len(), 200);
        seqs.sort();
        seqs.dedup();
        assert_eq!(seqs.len(), 200);
    }

    #[tokio::test]
    async fn test_tolerant_read_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycles.jsonl");
        std::fs::write(&path, "{\"seq\":1,\"body\":\"a\"}\nnot json\n{\"seq\":2,\"body\":\"b\"}\n").unwrap();

        let records: Vec<Entry> = read_records(&path, false).await.unwrap();
        assert_eq!(records.len(), 2);

        let err = read_records::<Entry>(&path, true).await.unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { line: 2, .. }));
    }
}
