// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-repository pipeline
//!
//! ```text
//! replay (optional) → load events + AST features → CycleRunner::run_cycle → close
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use causeway_cortex::application::{CycleOutcome, CycleRunner, KernelConfig, PatternClassifier};
use causeway_cortex::{AppendOnlyWriter, ArtifactStore, BridgeAdapter, EventBus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::CausewayConfig;
use crate::events::{repo_name, CommandReplayer, EventSource, HistoryReplayer};

/// Counts reported for one trained repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStats {
    pub events: usize,
    pub patterns: usize,
    pub sequences: usize,
    pub correlations: usize,
    pub chains: usize,
    pub forecasts: usize,
    pub decisions: usize,
    pub precision: f64,
    pub duration_ms: u64,
}

impl RepoStats {
    fn from_outcome(outcome: &CycleOutcome, duration_ms: u64) -> Self {
        Self {
            events: outcome.events,
            patterns: outcome.patterns,
            sequences: outcome.sequences,
            correlations: outcome.correlations,
            chains: outcome.chains,
            forecasts: outcome.forecasts,
            decisions: outcome.decisions,
            precision: outcome.precision,
            duration_ms,
        }
    }
}

/// One unit of batch work: a repo-list entry in, stats out
#[async_trait]
pub trait RepositoryPipeline: Send + Sync {
    async fn run(&self, entry: &str) -> anyhow::Result<RepoStats>;
}

/// Pipeline that drives a fresh [`CycleRunner`] per repository. Runners
/// share the ledger, so each repository gets its own hash chain inside it.
pub struct KernelPipeline {
    config: KernelConfig,
    bridges: BridgeAdapter,
    artifacts: ArtifactStore,
    ledger: Arc<AppendOnlyWriter>,
    event_bus: EventBus,
    source: EventSource,
    replayer: Option<Arc<dyn HistoryReplayer>>,
    classifier: Option<Arc<dyn PatternClassifier>>,
    skip_replay: bool,
}

impl KernelPipeline {
    pub fn new(
        config: KernelConfig,
        bridges: BridgeAdapter,
        artifacts: ArtifactStore,
        ledger: Arc<AppendOnlyWriter>,
        event_bus: EventBus,
        source: EventSource,
    ) -> Self {
        Self {
            config,
            bridges,
            artifacts,
            ledger,
            event_bus,
            source,
            replayer: None,
            classifier: None,
            skip_replay: false,
        }
    }

    /// Wires paths, bridges, thresholds and the replay command from `config`.
    pub fn from_config(config: &CausewayConfig, ledger: Arc<AppendOnlyWriter>, event_bus: EventBus) -> Self {
        let mut pipeline = Self::new(
            config.thresholds.kernel(),
            config.bridge_adapter(event_bus.clone()),
            ArtifactStore::new(&config.paths.output_dir),
            ledger,
            event_bus,
            EventSource::new(&config.paths.corpus_dir),
        )
        .with_skip_replay(config.batch.skip_replay);

        if let Some(command) = &config.batch.replay_command {
            let mut replayer = CommandReplayer::new(
                command.program.clone(),
                command.args.clone(),
                std::time::Duration::from_secs(config.batch.replay_timeout_secs),
            );
            if let Some(dir) = &command.working_dir {
                replayer = replayer.with_working_dir(dir);
            }
            pipeline = pipeline.with_replayer(Arc::new(replayer));
        }
        pipeline
    }

    pub fn with_replayer(mut self, replayer: Arc<dyn HistoryReplayer>) -> Self {
        self.replayer = Some(replayer);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn PatternClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_skip_replay(mut self, skip_replay: bool) -> Self {
        self.skip_replay = skip_replay;
        self
    }

    fn runner(&self) -> CycleRunner {
        let runner = CycleRunner::new(
            self.config.clone(),
            self.bridges.clone(),
            self.artifacts.clone(),
            self.ledger.clone(),
            self.event_bus.clone(),
        );
        match &self.classifier {
            Some(classifier) => runner.with_classifier(classifier.clone()),
            None => runner,
        }
    }
}

#[async_trait]
impl RepositoryPipeline for KernelPipeline {
    #[instrument(skip(self))]
    async fn run(&self, entry: &str) -> anyhow::Result<RepoStats> {
        let started = Instant::now();
        let repo = repo_name(entry);

        match (&self.replayer, self.skip_replay) {
            (_, true) => debug!(repo = %repo, "Skipping replay, using existing events"),
            (Some(replayer), false) => {
                replayer.replay(entry, &repo, &self.source.events_path(&repo)).await?;
            }
            (None, false) => debug!(repo = %repo, "No replayer configured, using existing events"),
        }

        let events = self.source.load_events(&repo).await?;
        let features = self.source.load_ast_features(&repo).await;
        info!(repo = %repo, events = events.len(), ast_features = features.len(), "Running cycle");

        let mut runner = self.runner();
        let outcome = runner
            .run_cycle(&repo, &events, &features)
            .await
            .with_context(|| format!("Cycle failed for {}", repo))?;
        runner.close().await?;

        let stats = RepoStats::from_outcome(&outcome, started.elapsed().as_millis() as u64);
        info!(
            repo = %repo,
            patterns = stats.patterns,
            decisions = stats.decisions,
            duration_ms = stats.duration_ms,
            "Training complete"
        );
        Ok(stats)
    }
}
