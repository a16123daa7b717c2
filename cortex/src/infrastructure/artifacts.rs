// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Derived artifact files under the output root.
//!
//! NDJSON artifacts are append-only and shared by every repository pipeline;
//! appends to the same file are serialized through a per-path lock so lines
//! from concurrent pipelines never interleave. JSON documents are replaced
//! atomically (write to a sibling temp file, then rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const PATTERNS: &str = "patterns.jsonl";
pub const SEQUENCES: &str = "sequences.jsonl";
pub const CORRELATIONS: &str = "correlations.jsonl";
pub const CHAINS: &str = "causal_chains.jsonl";
pub const RULES: &str = "contextual_rules.jsonl";
pub const FORECASTS: &str = "forecasts.jsonl";
pub const DECISIONS: &str = "decisions.jsonl";
pub const REASONING_HISTORY: &str = "kernel/reasoning_history.jsonl";
pub const FORECAST_METRICS: &str = "kernel/forecast_metrics.json";
pub const COGNITIVE_STATE: &str = "kernel/cognitive_state.json";
pub const UNIVERSAL_RULES: &str = "kernel/universal_rules.json";
pub const COMPACTED_STATE: &str = "kernel/state.json";
pub const METRICS_REPORT: &str = "metrics/stats.json";
pub const META_DECISIONS: &str = "feedback/meta_decisions.json";
pub const LEDGER: &str = "ledger/cycles.jsonl";

/// Relative path of a repository's timeline document
pub fn timeline_path(repo: &str) -> String {
    let safe: String = repo
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    format!("timelines/{}.json", safe)
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode artifact {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Appends one line per item. No-op for an empty slice.
    pub async fn append_jsonl<T: Serialize>(&self, relative: &str, items: &[T]) -> Result<(), ArtifactError> {
        if items.is_empty() {
            return Ok(());
        }
        let path = self.resolve(relative);

        let mut payload = String::new();
        for item in items {
            let line = serde_json::to_string(item).map_err(|source| ArtifactError::Encode {
                path: path.clone(),
                source,
            })?;
            payload.push_str(&line);
            payload.push('\n');
        }

        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        ensure_parent(&path).await?;
        let io_err = |source| ArtifactError::Io { path: path.clone(), source };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(payload.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        debug!(path = %path.display(), lines = items.len(), "Artifact appended");
        Ok(())
    }

    /// Replaces a JSON document atomically.
    pub async fn write_json<T: Serialize>(&self, relative: &str, value: &T) -> Result<(), ArtifactError> {
        let path = self.resolve(relative);
        let body = serde_json::to_string_pretty(value).map_err(|source| ArtifactError::Encode {
            path: path.clone(),
            source,
        })?;

        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        ensure_parent(&path).await?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| ArtifactError::Io { path: path.clone(), source };
        fs::write(&tmp, body).await.map_err(io_err)?;
        fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }

    /// Reads every parseable line; missing files read as empty.
    pub async fn read_jsonl<T: DeserializeOwned>(&self, relative: &str) -> Vec<T> {
        let path = self.resolve(relative);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), "Failed to read artifact: {}", e);
                return Vec::new();
            }
        };

        let mut skipped = 0usize;
        let items: Vec<T> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(item) => Some(item),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "Skipped malformed artifact lines");
        }
        items
    }

    /// Reads a JSON document; absent or unparseable documents yield `None`.
    pub async fn read_json<T: DeserializeOwned>(&self, relative: &str) -> Option<T> {
        let path = self.resolve(relative);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), "Ignoring unparseable artifact: {}", e);
                None
            }
        }
    }
}

async fn ensure_parent(path: &Path) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|source| ArtifactError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        n: u32,
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.append_jsonl(CORRELATIONS, &[Row { n: 1 }, Row { n: 2 }]).await.unwrap();
        store.append_jsonl(CORRELATIONS, &[Row { n: 3 }]).await.unwrap();

        let rows: Vec<Row> = store.read_jsonl(CORRELATIONS).await;
        assert_eq!(rows, vec![Row { n: 1 }, Row { n: 2 }, Row { n: 3 }]);
    }

    #[tokio::test]
    async fn test_missing_files_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let rows: Vec<Row> = store.read_jsonl(FORECASTS).await;
        assert!(rows.is_empty());
        assert!(store.read_json::<Row>(COGNITIVE_STATE).await.is_none());
    }

    #[tokio::test]
    async fn test_write_json_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.write_json(FORECAST_METRICS, &Row { n: 1 }).await.unwrap();
        store.write_json(FORECAST_METRICS, &Row { n: 2 }).await.unwrap();

        assert_eq!(store.read_json::<Row>(FORECAST_METRICS).await, Some(Row { n: 2 }));
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut handles = Vec::new();
        for task in 0..10u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let rows: Vec<Row> = (0..50).map(|i| Row { n: task * 1000 + i }).collect();
                store.append_jsonl(PATTERNS, &rows).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let rows: Vec<Row> = store.read_jsonl(PATTERNS).await;
        assert_eq!(rows.len(), 500);
    }

    #[test]
    fn test_timeline_path_sanitizes_repo() {
        assert_eq!(timeline_path("org/repo name"), "timelines/org_repo_name.json");
    }
}
