// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cycle Runner
//!
//! One [`CycleRunner`] is one pipeline instance. It owns the engines and the
//! producer side of a hash chain; every call to [`CycleRunner::run_cycle`]
//! drives a repository history through
//!
//! ```text
//! classify → sequences → correlations → forecasts → decisions
//!          → artifacts → seal → ledger append
//! ```
//!
//! Cycle records are appended strictly in cycle order because `run_cycle`
//! takes `&mut self` and awaits the ledger append before returning.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::classifier::{classify_events, KeywordClassifier, PatternClassifier};
use super::correlation_engine::{CorrelationConfig, CorrelationEngine};
use super::decision_generator::{DecisionConfig, DecisionGenerator};
use super::forecast_engine::{ForecastConfig, ForecastEngine, ForecastMetrics};
use super::sequence_extractor::{SequenceConfig, SequenceExtractor};
use crate::domain::{
    AstFeature, ChangeEvent, CycleMetadata, CyclePhases, CycleRecord, HashChain, KernelEvent, Pattern, PhaseOutput,
};
use crate::infrastructure::artifacts::{self, ArtifactError, ArtifactStore};
use crate::infrastructure::{AppendOnlyWriter, BridgeAdapter, EventBus, LedgerError};

/// Tunable weights and thresholds of every engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub sequences: SequenceConfig,
    pub correlations: CorrelationConfig,
    pub forecasts: ForecastConfig,
    pub decisions: DecisionConfig,
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Failed to hash cycle record: {0}")]
    Hash(#[from] serde_json::Error),
}

/// Per-cycle counts reported back to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub cycle_id: u64,
    pub hash: String,
    pub events: usize,
    pub patterns: usize,
    pub sequences: usize,
    pub correlations: usize,
    pub chains: usize,
    pub rules: usize,
    pub forecasts: usize,
    pub decisions: usize,
    pub precision: f64,
    pub duration_ms: u64,
}

pub struct CycleRunner {
    classifier: Arc<dyn PatternClassifier>,
    sequences: SequenceExtractor,
    correlations: CorrelationEngine,
    forecasts: ForecastEngine,
    decisions: DecisionGenerator,
    artifacts: ArtifactStore,
    ledger: Arc<AppendOnlyWriter>,
    chain: HashChain,
    event_bus: EventBus,
}

impl CycleRunner {
    pub fn new(
        config: KernelConfig,
        bridges: BridgeAdapter,
        artifacts: ArtifactStore,
        ledger: Arc<AppendOnlyWriter>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            classifier: Arc::new(KeywordClassifier::new()),
            sequences: SequenceExtractor::new(config.sequences, bridges.clone(), event_bus.clone()),
            correlations: CorrelationEngine::new(config.correlations, bridges.clone(), event_bus.clone()),
            forecasts: ForecastEngine::new(config.forecasts, bridges, event_bus.clone()),
            decisions: DecisionGenerator::new(config.decisions),
            artifacts,
            ledger,
            chain: HashChain::new(),
            event_bus,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn PatternClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn chain(&self) -> &HashChain {
        &self.chain
    }

    /// Ends this pipeline instance. Its buffered records are flushed; the
    /// ledger itself stays open for other pipelines sharing it.
    pub async fn close(self) -> Result<u64, KernelError> {
        self.ledger.flush().await?;
        debug!(
            chain_id = %self.chain.chain_id(),
            cycles = self.chain.entry_count(),
            "Cycle runner closed"
        );
        Ok(self.chain.entry_count())
    }

    #[instrument(skip(self, events, ast_features), fields(events = events.len()))]
    pub async fn run_cycle(
        &mut self,
        repo: &str,
        events: &[ChangeEvent],
        ast_features: &[AstFeature],
    ) -> Result<CycleOutcome, KernelError> {
        let started = Instant::now();
        self.event_bus.publish(KernelEvent::CycleStarted {
            repo: repo.to_string(),
            events: events.len(),
            timestamp: Utc::now(),
        });

        let classified = classify_events(self.classifier.as_ref(), repo, events, ast_features);
        let patterns: Vec<Pattern> = classified.iter().flat_map(|c| c.patterns.iter().cloned()).collect();

        let analysis = self.sequences.analyze(repo, &classified).await;
        let timeline = analysis.timeline;
        let sequences = analysis.sequences;

        let correlation = self
            .correlations
            .analyze(repo, &sequences, std::slice::from_ref(&timeline))
            .await;
        let forecast = self
            .forecasts
            .forecast(repo, &correlation.correlations, &correlation.chains, &timeline)
            .await;
        let decisions = self
            .decisions
            .generate(&forecast.forecasts, &correlation.correlations, &patterns);
        self.event_bus.publish(KernelEvent::DecisionsProposed {
            repo: repo.to_string(),
            count: decisions.len(),
            timestamp: Utc::now(),
        });

        let store = &self.artifacts;
        store.append_jsonl(artifacts::PATTERNS, &patterns).await?;
        store.append_jsonl(artifacts::SEQUENCES, &sequences).await?;
        store.append_jsonl(artifacts::CORRELATIONS, &correlation.correlations).await?;
        store.append_jsonl(artifacts::CHAINS, &correlation.chains).await?;
        store.append_jsonl(artifacts::RULES, &correlation.rules).await?;
        store.append_jsonl(artifacts::FORECASTS, &forecast.forecasts).await?;
        store.append_jsonl(artifacts::DECISIONS, &decisions).await?;
        store.append_jsonl(artifacts::REASONING_HISTORY, &forecast.reasoning).await?;
        store
            .write_json(artifacts::FORECAST_METRICS, &ForecastMetrics::from_report(&forecast))
            .await?;
        store.write_json(&artifacts::timeline_path(repo), &timeline).await?;

        let phases = CyclePhases {
            patterns: PhaseOutput::from_items(&patterns)?,
            sequences: PhaseOutput::from_items(&sequences)?,
            timeline: PhaseOutput::from_single(&timeline, timeline.len())?,
            correlations: PhaseOutput::from_items(&correlation.correlations)?,
            chains: PhaseOutput::from_items(&correlation.chains)?,
            rules: PhaseOutput::from_items(&correlation.rules)?,
            forecasts: PhaseOutput::from_items(&forecast.forecasts)?,
            decisions: PhaseOutput::from_items(&decisions)?,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let record: CycleRecord = self.chain.seal(
            Utc::now(),
            phases,
            CycleMetadata {
                repo: repo.to_string(),
                chain_id: self.chain.chain_id(),
                duration_ms,
                events_processed: events.len(),
                precision: forecast.precision,
            },
        )?;
        self.ledger.append(&record).await?;

        metrics::counter!("causeway_cycles_total").increment(1);
        metrics::histogram!("causeway_cycle_duration_ms").record(duration_ms as f64);
        self.event_bus.publish(KernelEvent::CycleSealed {
            repo: repo.to_string(),
            cycle_id: record.cycle_id,
            hash: record.hash.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
        info!(
            repo,
            cycle_id = record.cycle_id,
            patterns = patterns.len(),
            correlations = correlation.correlations.len(),
            forecasts = forecast.forecasts.len(),
            decisions = decisions.len(),
            duration_ms,
            "Cycle sealed"
        );

        Ok(CycleOutcome {
            cycle_id: record.cycle_id,
            hash: record.hash,
            events: events.len(),
            patterns: patterns.len(),
            sequences: sequences.len(),
            correlations: correlation.correlations.len(),
            chains: correlation.chains.len(),
            rules: correlation.rules.len(),
            forecasts: forecast.forecasts.len(),
            decisions: decisions.len(),
            precision: forecast.precision,
            duration_ms,
        })
    }
}
