// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Batch trainer
//!
//! Runs one [`RepositoryPipeline`] per repository with at most
//! `concurrency` pipelines in flight. A repository that fails (error or
//! panic) is recorded and never aborts the batch. After every pipeline has
//! finished the shared ledger is closed and the maintenance steps run in
//! order; their failures are logged and do not change the outcome.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use causeway_cortex::AppendOnlyWriter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::events::repo_name;
use crate::maintenance::MaintenanceStep;
use crate::pipeline::{RepoStats, RepositoryPipeline};

/// Outcome for one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoResult {
    pub repo: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RepoStats>,
}

impl RepoResult {
    fn succeeded(repo: String, stats: RepoStats) -> Self {
        Self {
            repo,
            success: true,
            error: None,
            stats: Some(stats),
        }
    }

    fn failed(repo: String, error: String) -> Self {
        Self {
            repo,
            success: false,
            error: Some(error),
            stats: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_repos: usize,
    pub successful: usize,
    pub failed: usize,
    /// In repository-list order
    pub results: Vec<RepoResult>,
    pub total_duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BatchSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Writes `diagnostics/batch-summary-<epoch-ms>.json` under `output_dir`.
    pub async fn save(&self, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let dir = output_dir.join("diagnostics");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(format!("batch-summary-{}.json", self.end_time.timestamp_millis()));
        let body = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub struct BatchTrainer {
    pipeline: Arc<dyn RepositoryPipeline>,
    concurrency: usize,
    ledger: Option<Arc<AppendOnlyWriter>>,
    maintenance: Vec<Arc<dyn MaintenanceStep>>,
    summary_dir: Option<PathBuf>,
}

impl BatchTrainer {
    pub fn new(pipeline: Arc<dyn RepositoryPipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
            ledger: None,
            maintenance: Vec::new(),
            summary_dir: None,
        }
    }

    /// Ledger to close once every pipeline has finished
    pub fn with_ledger(mut self, ledger: Arc<AppendOnlyWriter>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Appends a post-batch step; steps run in insertion order
    pub fn with_maintenance(mut self, step: Arc<dyn MaintenanceStep>) -> Self {
        self.maintenance.push(step);
        self
    }

    /// Persist the summary under `<dir>/diagnostics/`
    pub fn with_summary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.summary_dir = Some(dir.into());
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run_all(&self, repos: Vec<String>) -> BatchSummary {
        let started = Instant::now();
        let start_time = Utc::now();
        info!(
            repos = repos.len(),
            concurrency = self.concurrency,
            "Starting batch training"
        );

        let results = self.train_all(&repos).await;

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.close().await {
                error!("Failed to close ledger after batch: {}", e);
            }
        }
        self.run_maintenance().await;

        let successful = results.iter().filter(|r| r.success).count();
        let summary = BatchSummary {
            total_repos: results.len(),
            successful,
            failed: results.len() - successful,
            results,
            total_duration_ms: started.elapsed().as_millis() as u64,
            start_time,
            end_time: Utc::now(),
        };

        if let Some(dir) = &self.summary_dir {
            match summary.save(dir).await {
                Ok(path) => info!(path = %path.display(), "Batch summary saved"),
                Err(e) => error!("Failed to save batch summary: {:#}", e),
            }
        }

        info!(
            total = summary.total_repos,
            successful = summary.successful,
            failed = summary.failed,
            duration_ms = summary.total_duration_ms,
            "Batch training finished"
        );
        summary
    }

    async fn train_all(&self, repos: &[String]) -> Vec<RepoResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (index, entry) in repos.iter().enumerate() {
            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            let entry = entry.clone();

            join_set.spawn(async move {
                let repo = repo_name(&entry);
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, RepoResult::failed(repo, "Worker pool closed".to_string()));
                };

                let started = Instant::now();
                // Inner task so a panicking pipeline only loses its own result
                let task = tokio::spawn(async move { pipeline.run(&entry).await });
                let result = match task.await {
                    Ok(Ok(stats)) => {
                        info!(repo = %repo, duration_ms = stats.duration_ms, "Repository trained");
                        RepoResult::succeeded(repo, stats)
                    }
                    Ok(Err(e)) => {
                        let message = format!("{:#}", e);
                        error!(repo = %repo, "Training failed: {}", message);
                        RepoResult::failed(repo, message)
                    }
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic());
                        error!(repo = %repo, "Training panicked: {}", message);
                        RepoResult::failed(repo, message)
                    }
                    Err(e) => {
                        error!(repo = %repo, "Training task cancelled: {}", e);
                        RepoResult::failed(repo, e.to_string())
                    }
                };

                let outcome = if result.success { "success" } else { "failure" };
                metrics::counter!("causeway_repos_total", "outcome" => outcome).increment(1);
                metrics::histogram!("causeway_repo_duration_ms").record(started.elapsed().as_millis() as f64);
                (index, result)
            });
        }

        let mut slots: Vec<Option<RepoResult>> = vec![None; repos.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Batch worker task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(repos)
            .map(|(slot, entry)| {
                slot.unwrap_or_else(|| RepoResult::failed(repo_name(entry), "Worker task lost".to_string()))
            })
            .collect()
    }

    async fn run_maintenance(&self) {
        for step in &self.maintenance {
            let started = Instant::now();
            match step.run().await {
                Ok(()) => info!(
                    step = step.name(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Maintenance step complete"
                ),
                Err(e) => warn!(step = step.name(), "Maintenance step failed (non-blocking): {:#}", e),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Pipeline panicked".to_string()
    }
}
