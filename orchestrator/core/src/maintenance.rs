// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Post-batch maintenance
//!
//! Steps run after every batch, in order, each best-effort:
//!
//! 1. [`ConsolidationStep`]: cross-repository cognitive state
//! 2. [`FeedbackStep`]: cycle metrics snapshot and meta decision records
//! 3. [`LedgerCompactor`]: digest of the ledger into `kernel/state.json`
//! 4. [`ArchiveRotator`]: gzip archive of the ledger and corpus purge once
//!    the workspace grows past its size limit

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use causeway_cortex::application::{CognitiveKernel, FeedbackConfig, FeedbackEngine, MetricsReport};
use causeway_cortex::artifacts::{self, ArtifactStore};
use causeway_cortex::ledger::read_ledger;
use causeway_cortex::{CycleRecord, DecisionKind, DecisionRecord, Pattern, Priority};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CausewayConfig;

pub const COMPACTED_STATE_VERSION: &str = "1.0.0";

/// One best-effort step of the post-batch sequence
#[async_trait]
pub trait MaintenanceStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

pub struct ConsolidationStep {
    kernel: CognitiveKernel,
}

impl ConsolidationStep {
    pub fn new(kernel: CognitiveKernel) -> Self {
        Self { kernel }
    }
}

#[async_trait]
impl MaintenanceStep for ConsolidationStep {
    fn name(&self) -> &'static str {
        "consolidation"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let state = self.kernel.consolidate().await?;
        if state.goal_reached {
            info!(
                coherence = state.coherence_score,
                precision = state.forecast_precision,
                universals = state.universals,
                "Cognitive goals reached"
            );
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline feedback
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackOutcome {
    pub report: MetricsReport,
    pub meta_decisions: Vec<DecisionRecord>,
}

/// Measures the pipeline against its own ledger and proposes meta decision
/// records for readings outside their thresholds.
pub struct FeedbackStep {
    artifacts: ArtifactStore,
    ledger_path: PathBuf,
    engine: FeedbackEngine,
}

impl FeedbackStep {
    pub fn new(artifacts: ArtifactStore, engine: FeedbackEngine) -> Self {
        Self {
            ledger_path: artifacts.resolve(artifacts::LEDGER),
            artifacts,
            engine,
        }
    }

    pub fn from_config(config: &CausewayConfig) -> Self {
        let engine = FeedbackEngine::new(FeedbackConfig {
            min_severity: config.maintenance.feedback_min_severity,
            thresholds: config.thresholds.metrics.clone(),
        });
        Self::new(ArtifactStore::new(&config.paths.output_dir), engine)
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Writes `metrics/stats.json` and replaces `feedback/meta_decisions.json`.
    pub async fn evaluate(&self) -> anyhow::Result<FeedbackOutcome> {
        let records: Vec<CycleRecord> = read_ledger(&self.ledger_path, false)
            .await
            .with_context(|| format!("Failed to read ledger {}", self.ledger_path.display()))?;

        let report = MetricsReport::compute(&records, Utc::now());
        self.artifacts.write_json(artifacts::METRICS_REPORT, &report).await?;

        let meta_decisions = self.engine.generate(&report);
        self.artifacts.write_json(artifacts::META_DECISIONS, &meta_decisions).await?;
        metrics::gauge!("causeway_meta_decisions").set(meta_decisions.len() as f64);

        for decision in meta_decisions.iter().filter(|d| d.priority >= Priority::High) {
            warn!(id = %decision.id, title = %decision.title, "Pipeline metric needs attention");
        }
        info!(
            cycles = report.global.total_cycles,
            repos = report.by_repo.len(),
            pattern_density = report.global.pattern_density,
            forecast_accuracy = report.global.forecast_accuracy,
            entropy = report.global.entropy,
            meta_decisions = meta_decisions.len(),
            "Cycle metrics evaluated"
        );
        Ok(FeedbackOutcome { report, meta_decisions })
    }
}

#[async_trait]
impl MaintenanceStep for FeedbackStep {
    fn name(&self) -> &'static str {
        "feedback"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.evaluate().await.map(|_| ())
    }
}

// ============================================================================
// Ledger compaction
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedPattern {
    #[serde(rename = "type")]
    pub pattern_type: String,
    /// Occurrences per ledger cycle
    pub confidence: f64,
    pub frequency: u64,
    pub repos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityDecision {
    pub id: String,
    #[serde(default)]
    pub kind: DecisionKind,
    pub priority: Priority,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    pub repo: String,
}

impl PriorityDecision {
    fn from_record(record: DecisionRecord, repo: String) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            priority: record.priority,
            recommendation: record.decision,
            impact: record.estimated_improvement,
            repo,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_patterns: u64,
    pub total_correlations: u64,
    pub total_forecasts: u64,
    pub total_decisions: u64,
    pub avg_patterns_per_repo: f64,
    pub avg_correlations_per_pattern: f64,
}

/// Digest written to `kernel/state.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactedState {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub total_repos: usize,
    pub total_cycles: usize,
    pub patterns: Vec<ConsolidatedPattern>,
    pub decisions: Vec<PriorityDecision>,
    pub statistics: LedgerStatistics,
    /// SHA-256 over the serialized consolidated patterns
    pub digest: String,
}

pub struct LedgerCompactor {
    artifacts: ArtifactStore,
    ledger_path: PathBuf,
    top_patterns: usize,
    top_decisions: usize,
    max_repos_per_pattern: usize,
}

impl LedgerCompactor {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            ledger_path: artifacts.resolve(artifacts::LEDGER),
            artifacts,
            top_patterns: 50,
            top_decisions: 20,
            max_repos_per_pattern: 10,
        }
    }

    pub fn from_config(config: &CausewayConfig) -> Self {
        Self::new(ArtifactStore::new(&config.paths.output_dir))
            .with_limits(config.maintenance.top_patterns, config.maintenance.top_decisions)
    }

    pub fn with_limits(mut self, top_patterns: usize, top_decisions: usize) -> Self {
        self.top_patterns = top_patterns;
        self.top_decisions = top_decisions;
        self
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Reads every ledger file, skipping malformed lines, and writes the
    /// compacted state. High-priority meta decision records from the last
    /// feedback run follow the ledger's own decisions.
    pub async fn compact(&self) -> anyhow::Result<CompactedState> {
        let records: Vec<CycleRecord> = read_ledger(&self.ledger_path, false)
            .await
            .with_context(|| format!("Failed to read ledger {}", self.ledger_path.display()))?;
        let meta: Vec<DecisionRecord> = self
            .artifacts
            .read_json(artifacts::META_DECISIONS)
            .await
            .unwrap_or_default();

        let state = self.summarize(&records, &meta, Utc::now())?;
        self.artifacts.write_json(artifacts::COMPACTED_STATE, &state).await?;

        info!(
            cycles = state.total_cycles,
            repos = state.total_repos,
            patterns = state.patterns.len(),
            decisions = state.decisions.len(),
            "Ledger compacted"
        );
        Ok(state)
    }

    fn summarize(
        &self,
        records: &[CycleRecord],
        meta: &[DecisionRecord],
        now: DateTime<Utc>,
    ) -> anyhow::Result<CompactedState> {
        let mut repos: BTreeSet<&str> = BTreeSet::new();
        let mut by_type: BTreeMap<String, (u64, BTreeSet<String>)> = BTreeMap::new();
        let mut decisions = Vec::new();
        let mut statistics = LedgerStatistics::default();

        for record in records {
            let repo = record.metadata.repo.as_str();
            repos.insert(repo);

            let phases = &record.phases;
            statistics.total_patterns += phases.patterns.count as u64;
            statistics.total_correlations += phases.correlations.count as u64;
            statistics.total_forecasts += phases.forecasts.count as u64;
            statistics.total_decisions += phases.decisions.count as u64;

            for pattern in decode_items::<Pattern>(&phases.patterns.items) {
                let entry = by_type
                    .entry(pattern.pattern_type.as_str().to_string())
                    .or_default();
                entry.0 += 1;
                entry.1.insert(repo.to_string());
            }

            decisions.extend(
                decode_items::<DecisionRecord>(&phases.decisions.items)
                    .into_iter()
                    .filter(|d| d.priority >= Priority::High)
                    .map(|d| PriorityDecision::from_record(d, repo.to_string())),
            );
        }
        decisions.extend(meta.iter().filter(|d| d.priority >= Priority::High).map(|d| {
            let scope = d
                .observation
                .as_ref()
                .map(|o| o.repos_affected.join(","))
                .unwrap_or_default();
            PriorityDecision::from_record(d.clone(), scope)
        }));
        decisions.truncate(self.top_decisions);

        let cycles = records.len();
        let mut patterns: Vec<ConsolidatedPattern> = by_type
            .into_iter()
            .map(|(pattern_type, (frequency, repos))| ConsolidatedPattern {
                pattern_type,
                confidence: if cycles == 0 { 0.0 } else { frequency as f64 / cycles as f64 },
                frequency,
                repos: repos.into_iter().take(self.max_repos_per_pattern).collect(),
            })
            .collect();
        // Stable sort keeps type order on ties
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        patterns.truncate(self.top_patterns);

        if !repos.is_empty() {
            statistics.avg_patterns_per_repo = statistics.total_patterns as f64 / repos.len() as f64;
        }
        if statistics.total_patterns > 0 {
            statistics.avg_correlations_per_pattern =
                statistics.total_correlations as f64 / statistics.total_patterns as f64;
        }

        let digest = hex::encode(Sha256::digest(serde_json::to_string(&patterns)?.as_bytes()));

        Ok(CompactedState {
            version: COMPACTED_STATE_VERSION.to_string(),
            generated_at: now,
            total_repos: repos.len(),
            total_cycles: cycles,
            patterns,
            decisions,
            statistics,
            digest,
        })
    }
}

#[async_trait]
impl MaintenanceStep for LedgerCompactor {
    fn name(&self) -> &'static str {
        "compaction"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.compact().await.map(|_| ())
    }
}

/// Elements of a phase item array that decode as `T`
fn decode_items<T: serde::de::DeserializeOwned>(items: &serde_json::Value) -> Vec<T> {
    match items.as_array() {
        Some(values) => values
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        None => Vec::new(),
    }
}

// ============================================================================
// Archival rotation
// ============================================================================

pub struct ArchiveRotator {
    workspace_dir: PathBuf,
    ledger_dir: PathBuf,
    corpus_dir: PathBuf,
    archive_dir: PathBuf,
    threshold_bytes: u64,
}

impl ArchiveRotator {
    pub fn new(
        workspace_dir: impl Into<PathBuf>,
        ledger_dir: impl Into<PathBuf>,
        corpus_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        threshold_bytes: u64,
    ) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            ledger_dir: ledger_dir.into(),
            corpus_dir: corpus_dir.into(),
            archive_dir: archive_dir.into(),
            threshold_bytes,
        }
    }

    pub fn from_config(config: &CausewayConfig) -> Self {
        let artifacts = ArtifactStore::new(&config.paths.output_dir);
        let ledger_path = artifacts.resolve(artifacts::LEDGER);
        let ledger_dir = ledger_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.paths.output_dir.clone());
        Self::new(
            &config.paths.workspace_dir,
            ledger_dir,
            &config.paths.corpus_dir,
            config.paths.output_dir.join("archives"),
            config.maintenance.max_workspace_bytes(),
        )
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    /// Bytes under the workspace, archives excluded
    pub async fn workspace_size(&self) -> anyhow::Result<u64> {
        let root = self.workspace_dir.clone();
        let archives = self.archive_dir.clone();
        let size = tokio::task::spawn_blocking(move || directory_size(&root, Some(&archives))).await?;
        Ok(size)
    }

    /// Archives and purges when the workspace is at or over the threshold.
    /// Returns the archive path when a rotation happened.
    pub async fn rotate_if_needed(&self) -> anyhow::Result<Option<PathBuf>> {
        let size = self.workspace_size().await?;
        if size < self.threshold_bytes {
            debug!(size, threshold = self.threshold_bytes, "Workspace below archival threshold");
            return Ok(None);
        }

        warn!(
            size_gb = size as f64 / 1e9,
            threshold_gb = self.threshold_bytes as f64 / 1e9,
            "Workspace over size limit, archiving ledger"
        );
        let archive = self.archive().await?;
        Ok(Some(archive))
    }

    /// Concatenates every ledger file in path order into one gzip archive,
    /// then empties the ledger and corpus directories.
    pub async fn archive(&self) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.archive_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.archive_dir.display()))?;
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let target = self.archive_dir.join(format!("ledger-dump-{}.jsonl.gz", stamp));

        let ledger_dir = self.ledger_dir.clone();
        let destination = target.clone();
        let (files, bytes) = tokio::task::spawn_blocking(move || write_archive(&ledger_dir, &destination)).await??;

        let archived = fs::metadata(&target).await.map(|m| m.len()).unwrap_or(0);
        info!(
            archive = %target.display(),
            files,
            raw_bytes = bytes,
            archived_bytes = archived,
            "Ledger archived"
        );

        purge_dir(&self.ledger_dir).await?;
        purge_dir(&self.corpus_dir).await?;
        info!("Ledger and corpus purged");
        Ok(target)
    }
}

#[async_trait]
impl MaintenanceStep for ArchiveRotator {
    fn name(&self) -> &'static str {
        "archival"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.rotate_if_needed().await.map(|_| ())
    }
}

fn directory_size(root: &Path, exclude: Option<&Path>) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| exclude.map_or(true, |ex| entry.path() != ex))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn write_archive(ledger_dir: &Path, target: &Path) -> anyhow::Result<(usize, u64)> {
    let mut files: Vec<PathBuf> = WalkDir::new(ledger_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    let output = File::create(target).with_context(|| format!("Failed to create {}", target.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::best());
    let mut total = 0u64;
    for path in &files {
        let mut reader = BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        );
        total += std::io::copy(&mut reader, &mut encoder)?;
    }
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok((files.len(), total))
}

async fn purge_dir(dir: &Path) -> anyhow::Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        }
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use causeway_cortex::{
        ChangeEvent, CycleMetadata, CyclePhases, DecisionBasis, DecisionKind, DecisionStatus, HashChain, PatternType,
        PhaseOutput,
    };
    use causeway_cortex::application::Severity;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn event(hash: &str) -> ChangeEvent {
        ChangeEvent {
            hash: hash.to_string(),
            message: "change".to_string(),
            author: "dev".to_string(),
            timestamp: Utc::now(),
            files: vec![],
        }
    }

    fn decision(id: &str, priority: Priority) -> DecisionRecord {
        DecisionRecord {
            id: id.to_string(),
            kind: DecisionKind::Adr,
            title: id.to_string(),
            context: String::new(),
            decision: format!("do {}", id),
            consequences: String::new(),
            estimated_improvement: None,
            priority,
            status: DecisionStatus::Proposed,
            based_on: DecisionBasis::default(),
            observation: None,
            timestamp: Utc::now(),
        }
    }

    fn record(chain: &mut HashChain, repo: &str, types: &[PatternType], decisions: &[DecisionRecord]) -> CycleRecord {
        let patterns: Vec<Pattern> = types
            .iter()
            .map(|t| Pattern::new(*t, 0.8, &event("c1"), repo, &[]))
            .collect();
        let empty: Vec<Pattern> = Vec::new();
        let phases = CyclePhases {
            patterns: PhaseOutput::from_items(&patterns).unwrap(),
            sequences: PhaseOutput::from_items(&empty).unwrap(),
            timeline: PhaseOutput::from_items(&empty).unwrap(),
            correlations: PhaseOutput::from_items(&empty).unwrap(),
            chains: PhaseOutput::from_items(&empty).unwrap(),
            rules: PhaseOutput::from_items(&empty).unwrap(),
            forecasts: PhaseOutput::from_items(&empty).unwrap(),
            decisions: PhaseOutput::from_items(decisions).unwrap(),
        };
        chain
            .seal(
                Utc::now(),
                phases,
                CycleMetadata {
                    repo: repo.to_string(),
                    chain_id: Uuid::nil(),
                    duration_ms: 5,
                    events_processed: 1,
                    precision: 0.0,
                },
            )
            .unwrap()
    }

    async fn write_ledger(path: &Path, records: &[CycleRecord]) {
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record).unwrap());
            body.push('\n');
        }
        body.push_str("{not json\n");
        fs::write(path, body).await.unwrap();
    }

    #[tokio::test]
    async fn test_compaction_summarizes_ledger() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut chain_a = HashChain::new();
        let mut chain_b = HashChain::new();
        let records = vec![
            record(
                &mut chain_a,
                "repo-a",
                &[PatternType::Test, PatternType::Refactor],
                &[decision("adr-1", Priority::High), decision("adr-2", Priority::Low)],
            ),
            record(&mut chain_b, "repo-b", &[PatternType::Test], &[decision("adr-3", Priority::Critical)]),
            record(&mut chain_a, "repo-a", &[PatternType::Test, PatternType::Bugfix], &[]),
        ];
        write_ledger(&store.resolve(artifacts::LEDGER), &records).await;

        let state = LedgerCompactor::new(store.clone()).compact().await.unwrap();

        assert_eq!(state.total_cycles, 3);
        assert_eq!(state.total_repos, 2);
        assert_eq!(state.statistics.total_patterns, 5);
        assert_eq!(state.statistics.total_decisions, 3);
        assert_eq!(state.patterns[0].pattern_type, "test");
        assert_eq!(state.patterns[0].frequency, 3);
        assert_eq!(state.patterns[0].confidence, 1.0);
        assert_eq!(state.patterns[0].repos, vec!["repo-a".to_string(), "repo-b".to_string()]);
        let ids: Vec<&str> = state.decisions.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["adr-1", "adr-3"]);
        assert_eq!(state.statistics.avg_patterns_per_repo, 2.5);
        assert_eq!(state.digest.len(), 64);

        let persisted: Option<CompactedState> = store.read_json(artifacts::COMPACTED_STATE).await;
        assert_eq!(persisted.map(|s| s.digest), Some(state.digest));
    }

    #[tokio::test]
    async fn test_feedback_writes_metrics_and_meta_decisions() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut chain_a = HashChain::new();
        let mut chain_b = HashChain::new();
        let records = vec![
            record(
                &mut chain_a,
                "repo-a",
                &[PatternType::Test, PatternType::Refactor],
                &[decision("adr-1", Priority::High)],
            ),
            record(&mut chain_b, "repo-b", &[PatternType::Test], &[decision("adr-3", Priority::Critical)]),
            record(&mut chain_a, "repo-a", &[PatternType::Test, PatternType::Bugfix], &[]),
        ];
        write_ledger(&store.resolve(artifacts::LEDGER), &records).await;

        let outcome = FeedbackStep::new(store.clone(), FeedbackEngine::default())
            .evaluate()
            .await
            .unwrap();

        assert_eq!(outcome.report.global.total_cycles, 3);
        assert_eq!(outcome.report.by_repo.len(), 2);
        // No correlations or forecasts anywhere: both flagged high in every
        // scope. Entropy is low globally and in repo-b, exactly 1.5 bits in repo-a.
        let ids: Vec<&str> = outcome.meta_decisions.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "meta-adr-correlation_rate-global",
                "meta-adr-forecast_accuracy-global",
                "meta-adr-correlation_rate-repo-a",
                "meta-adr-forecast_accuracy-repo-a",
                "meta-adr-correlation_rate-repo-b",
                "meta-adr-forecast_accuracy-repo-b",
                "meta-adr-entropy-repo-b",
                "meta-adr-entropy-global",
            ]
        );
        assert!(outcome.meta_decisions.iter().all(|d| d.kind == DecisionKind::MetaAdr));

        let report: Option<MetricsReport> = store.read_json(artifacts::METRICS_REPORT).await;
        assert_eq!(report.map(|r| r.global.total_patterns), Some(5));
        let persisted: Option<Vec<DecisionRecord>> = store.read_json(artifacts::META_DECISIONS).await;
        assert_eq!(persisted.map(|d| d.len()), Some(8));

        let state = LedgerCompactor::new(store).compact().await.unwrap();
        assert_eq!(state.decisions.len(), 8);
        assert_eq!(state.decisions[0].kind, DecisionKind::Adr);
        assert_eq!(state.decisions[1].id, "adr-3");
        assert_eq!(state.decisions[2].id, "meta-adr-correlation_rate-global");
        assert_eq!(state.decisions[2].kind, DecisionKind::MetaAdr);
        assert_eq!(state.decisions[2].repo, "global");
    }

    #[tokio::test]
    async fn test_feedback_on_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let config = FeedbackConfig {
            min_severity: Severity::High,
            ..Default::default()
        };

        let outcome = FeedbackStep::new(store.clone(), FeedbackEngine::new(config))
            .evaluate()
            .await
            .unwrap();

        assert!(outcome.report.by_repo.is_empty());
        // Zero density, rate and accuracy are all far below their minimums
        assert_eq!(outcome.meta_decisions.len(), 3);
        assert!(outcome.meta_decisions.iter().all(|d| d.priority == Priority::High));
        assert!(store.resolve(artifacts::META_DECISIONS).exists());
    }

    #[tokio::test]
    async fn test_compaction_limits() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut chain = HashChain::new();
        let records = vec![record(
            &mut chain,
            "repo-a",
            &[PatternType::Test, PatternType::Refactor, PatternType::Bugfix],
            &[decision("adr-1", Priority::High), decision("adr-2", Priority::High)],
        )];
        write_ledger(&store.resolve(artifacts::LEDGER), &records).await;

        let state = LedgerCompactor::new(store).with_limits(2, 1).compact().await.unwrap();
        assert_eq!(state.patterns.len(), 2);
        assert_eq!(state.decisions.len(), 1);
    }

    #[tokio::test]
    async fn test_compaction_of_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let state = LedgerCompactor::new(ArtifactStore::new(dir.path())).compact().await.unwrap();
        assert_eq!(state.total_cycles, 0);
        assert!(state.patterns.is_empty());
        assert_eq!(state.statistics.avg_patterns_per_repo, 0.0);
    }

    fn rotator(dir: &TempDir, threshold: u64) -> ArchiveRotator {
        ArchiveRotator::new(
            dir.path(),
            dir.path().join("out/ledger"),
            dir.path().join("corpus"),
            dir.path().join("out/archives"),
            threshold,
        )
    }

    #[tokio::test]
    async fn test_rotation_below_threshold() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("out/ledger")).await.unwrap();
        fs::write(dir.path().join("out/ledger/cycles.jsonl"), "{}\n").await.unwrap();

        let rotated = rotator(&dir, 1_000_000).rotate_if_needed().await.unwrap();
        assert!(rotated.is_none());
        assert!(dir.path().join("out/ledger/cycles.jsonl").exists());
    }

    #[tokio::test]
    async fn test_rotation_archives_and_purges() {
        let dir = TempDir::new().unwrap();
        let ledger = dir.path().join("out/ledger");
        fs::create_dir_all(&ledger).await.unwrap();
        fs::write(ledger.join("cycles.2024-01-01T00-00-00-000Z.jsonl"), "{\"n\":1}\n")
            .await
            .unwrap();
        fs::write(ledger.join("cycles.jsonl"), "{\"n\":2}\n").await.unwrap();
        fs::create_dir_all(dir.path().join("corpus/repo-a")).await.unwrap();
        fs::write(dir.path().join("corpus/repo-a/commits.jsonl"), "{}\n").await.unwrap();

        let archive = rotator(&dir, 1).rotate_if_needed().await.unwrap().unwrap();

        let file_name = archive.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("ledger-dump-"));
        assert!(file_name.ends_with(".jsonl.gz"));

        let mut content = String::new();
        GzDecoder::new(std::fs::File::open(&archive).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "{\"n\":1}\n{\"n\":2}\n");

        assert!(ledger.exists());
        assert_eq!(std::fs::read_dir(&ledger).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(dir.path().join("corpus")).unwrap().count(), 0);
    }

    #[test]
    fn test_directory_size_excludes_archives() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("archives")).unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("archives/old.gz"), vec![0u8; 500]).unwrap();

        assert_eq!(directory_size(dir.path(), Some(&dir.path().join("archives"))), 100);
        assert_eq!(directory_size(dir.path(), None), 600);
    }
}
