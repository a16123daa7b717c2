// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cognitive Consolidation
//!
//! Recomputes the process-wide [`CognitiveState`] from every artifact written
//! so far. Sequences from all repositories are merged first, so correlations
//! derived here see true cross-repository universality.
//!
//! ```text
//! coherence = 0.3 * mean(sequence confidence)
//!           + 0.4 * mean(strength * confidence)
//!           + 0.3 * mean(forecast confidence)
//! precision = correct / resolved reasoning entries
//! ```
//!
//! Universal rules are consolidated correlations with strength >= 0.7 and
//! confidence >= 0.6. History that cannot be read counts as empty.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::correlation_engine::CorrelationEngine;
use super::kernel::{KernelConfig, KernelError};
use super::sequence_extractor::SequenceExtractor;
use crate::domain::{
    CausalCorrelation, KernelEvent, PatternSequence, PredictiveForecast, ReasoningEntry,
};
use crate::infrastructure::artifacts::{self, ArtifactStore};
use crate::infrastructure::ledger::read_ledger;
use crate::infrastructure::{BridgeAdapter, EventBus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub sequence_weight: f64,
    pub correlation_weight: f64,
    pub forecast_weight: f64,
    pub universal_strength: f64,
    pub universal_confidence: f64,
    pub goal_coherence: f64,
    pub goal_precision: f64,
    pub goal_universal_rules: usize,
    /// Layers between raw structure and forecast
    pub reasoning_depth: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            sequence_weight: 0.3,
            correlation_weight: 0.4,
            forecast_weight: 0.3,
            universal_strength: 0.7,
            universal_confidence: 0.6,
            goal_coherence: 0.9,
            goal_precision: 0.75,
            goal_universal_rules: 100,
            reasoning_depth: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CognitiveMetrics {
    pub total_repos: usize,
    pub total_patterns: usize,
    pub total_sequences: usize,
    pub total_correlations: usize,
    pub total_forecasts: usize,
    pub total_reasoning_entries: usize,
    pub total_cycles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveState {
    pub coherence_score: f64,
    pub forecast_precision: f64,
    pub universals: usize,
    pub reasoning_depth: u32,
    pub avg_correlation_strength: f64,
    pub metrics: CognitiveMetrics,
    pub goal_reached: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CognitiveState {
    pub fn empty(reasoning_depth: u32) -> Self {
        let now = Utc::now();
        Self {
            coherence_score: 0.0,
            forecast_precision: 0.0,
            universals: 0,
            reasoning_depth,
            avg_correlation_strength: 0.0,
            metrics: CognitiveMetrics::default(),
            goal_reached: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A correlation that holds across the consolidated history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalRule {
    pub id: String,
    pub rule: String,
    pub strength: f64,
    pub confidence: f64,
    pub validated_in_repos: usize,
    pub examples: Vec<String>,
}

pub struct CognitiveKernel {
    config: ConsolidationConfig,
    sequences: SequenceExtractor,
    correlations: CorrelationEngine,
    artifacts: ArtifactStore,
    ledger_path: PathBuf,
    event_bus: EventBus,
}

impl CognitiveKernel {
    pub fn new(config: KernelConfig, consolidation: ConsolidationConfig, artifacts: ArtifactStore, event_bus: EventBus) -> Self {
        // Consolidation is always native
        let bridges = BridgeAdapter::native(event_bus.clone());
        Self {
            config: consolidation,
            sequences: SequenceExtractor::new(config.sequences, bridges.clone(), event_bus.clone()),
            correlations: CorrelationEngine::new(config.correlations, bridges, event_bus.clone()),
            ledger_path: artifacts.resolve(artifacts::LEDGER),
            artifacts,
            event_bus,
        }
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Last persisted state, or an empty one.
    pub async fn load(&self) -> CognitiveState {
        match self.artifacts.read_json(artifacts::COGNITIVE_STATE).await {
            Some(state) => state,
            None => {
                warn!("No existing cognitive state found, starting empty");
                CognitiveState::empty(self.config.reasoning_depth)
            }
        }
    }

    pub async fn consolidate(&self) -> Result<CognitiveState, KernelError> {
        let previous = self.load().await;

        let raw_sequences: Vec<PatternSequence> = self.artifacts.read_jsonl(artifacts::SEQUENCES).await;
        let patterns: Vec<serde_json::Value> = self.artifacts.read_jsonl(artifacts::PATTERNS).await;
        let forecasts: Vec<PredictiveForecast> = self.artifacts.read_jsonl(artifacts::FORECASTS).await;
        let history: Vec<ReasoningEntry> = self.artifacts.read_jsonl(artifacts::REASONING_HISTORY).await;
        let cycles = match read_ledger::<serde_json::Value>(&self.ledger_path, false).await {
            Ok(records) => records.len(),
            Err(e) => {
                warn!(path = %self.ledger_path.display(), "Ledger unreadable, counting no cycles: {}", e);
                0
            }
        };

        let sequences = self.sequences.consolidate(&raw_sequences);
        let correlations = self.correlations.find_correlations(&sequences);
        let universals = self.universal_rules(&correlations, &sequences);

        let coherence = self.coherence(&sequences, &correlations, &forecasts);
        let precision = precision(&history);
        let repos: BTreeSet<&str> = sequences.iter().flat_map(|s| s.repos.iter().map(String::as_str)).collect();

        let mut state = CognitiveState {
            coherence_score: coherence,
            forecast_precision: precision,
            universals: universals.len(),
            reasoning_depth: self.config.reasoning_depth,
            avg_correlation_strength: mean(correlations.iter().map(|c| c.strength)),
            metrics: CognitiveMetrics {
                total_repos: repos.len(),
                total_patterns: patterns.len(),
                total_sequences: sequences.len(),
                total_correlations: correlations.len(),
                total_forecasts: forecasts.len(),
                total_reasoning_entries: history.len(),
                total_cycles: cycles,
            },
            goal_reached: false,
            created_at: previous.created_at,
            updated_at: Utc::now(),
        };
        state.goal_reached = self.is_goal_reached(&state);

        self.artifacts.write_json(artifacts::COGNITIVE_STATE, &state).await?;
        self.artifacts.write_json(artifacts::UNIVERSAL_RULES, &universals).await?;

        metrics::gauge!("causeway_coherence_score").set(state.coherence_score);
        metrics::gauge!("causeway_forecast_precision").set(state.forecast_precision);
        metrics::gauge!("causeway_universal_rules").set(state.universals as f64);
        self.event_bus.publish(KernelEvent::ConsolidationCompleted {
            coherence: state.coherence_score,
            precision: state.forecast_precision,
            universal_rules: state.universals,
            timestamp: Utc::now(),
        });
        info!(
            coherence = state.coherence_score,
            precision = state.forecast_precision,
            universals = state.universals,
            repos = state.metrics.total_repos,
            "Cognitive state consolidated"
        );
        Ok(state)
    }

    pub fn is_goal_reached(&self, state: &CognitiveState) -> bool {
        state.coherence_score > self.config.goal_coherence
            && state.forecast_precision > self.config.goal_precision
            && state.universals > self.config.goal_universal_rules
    }

    fn coherence(
        &self,
        sequences: &[PatternSequence],
        correlations: &[CausalCorrelation],
        forecasts: &[PredictiveForecast],
    ) -> f64 {
        if sequences.is_empty() {
            return 0.0;
        }
        let value = self.config.sequence_weight * mean(sequences.iter().map(|s| s.confidence))
            + self.config.correlation_weight * mean(correlations.iter().map(CausalCorrelation::weight))
            + self.config.forecast_weight * mean(forecasts.iter().map(|f| f.confidence));
        value.clamp(0.0, 1.0)
    }

    fn universal_rules(&self, correlations: &[CausalCorrelation], sequences: &[PatternSequence]) -> Vec<UniversalRule> {
        correlations
            .iter()
            .filter(|c| c.strength >= self.config.universal_strength && c.confidence >= self.config.universal_confidence)
            .map(|c| {
                let repos: BTreeSet<String> = sequences
                    .iter()
                    .filter(|s| s.sequence.windows(2).any(|w| w[0] == c.cause && w[1] == c.effect))
                    .flat_map(|s| s.repos.iter().cloned())
                    .collect();
                UniversalRule {
                    id: c.id.clone(),
                    rule: format!(
                        "{} → {} ({}% strength, lag: {})",
                        c.cause,
                        c.effect,
                        (c.strength * 100.0).round() as u32,
                        c.lag
                    ),
                    strength: c.strength,
                    confidence: c.confidence,
                    validated_in_repos: repos.len(),
                    examples: repos.into_iter().collect(),
                }
            })
            .collect()
    }
}

/// Share of resolved reasoning entries that were correct; 0 when none are.
pub fn precision(history: &[ReasoningEntry]) -> f64 {
    let resolved: Vec<bool> = history.iter().filter_map(|h| h.was_correct).collect();
    if resolved.is_empty() {
        return 0.0;
    }
    resolved.iter().filter(|c| **c).count() as f64 / resolved.len() as f64
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PatternType;
    use tempfile::TempDir;

    fn sequence(patterns: &[PatternType], repo: &str) -> PatternSequence {
        let mut s = PatternSequence::new(patterns.to_vec(), (0..patterns.len() as u64).collect(), repo);
        s.confidence = 0.6;
        s
    }

    fn kernel(dir: &TempDir) -> CognitiveKernel {
        CognitiveKernel::new(
            KernelConfig::default(),
            ConsolidationConfig::default(),
            ArtifactStore::new(dir.path()),
            EventBus::new(16),
        )
    }

    #[test]
    fn test_precision_counts_resolved_entries_only() {
        let mut correct = ReasoningEntry::new("h".into(), vec![], PatternType::Test, 0.5);
        correct.resolve(Some(PatternType::Test), true, Some(1.0), "Validated".into());
        let mut wrong = ReasoningEntry::new("h".into(), vec![], PatternType::Bugfix, 0.5);
        wrong.resolve(None, false, None, "Failed".into());
        let pending = ReasoningEntry::new("h".into(), vec![], PatternType::Bugfix, 0.5);

        assert_eq!(precision(&[correct, wrong, pending]), 0.5);
        assert_eq!(precision(&[]), 0.0);
    }

    #[tokio::test]
    async fn test_load_without_state_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = kernel(&dir).load().await;
        assert_eq!(state.coherence_score, 0.0);
        assert_eq!(state.reasoning_depth, 4);
    }

    #[tokio::test]
    async fn test_consolidate_merges_repositories() {
        use PatternType::*;
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let sequences: Vec<PatternSequence> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|repo| sequence(&[Refactor, Test], repo))
            .collect();
        store.append_jsonl(artifacts::SEQUENCES, &sequences).await.unwrap();

        let kernel = kernel(&dir);
        let state = kernel.consolidate().await.unwrap();

        assert_eq!(state.metrics.total_repos, 5);
        assert_eq!(state.metrics.total_sequences, 1);
        assert_eq!(state.metrics.total_cycles, 0);
        assert!(state.coherence_score > 0.0);
        assert!(!state.goal_reached);

        let universals: Vec<UniversalRule> = store.read_json(artifacts::UNIVERSAL_RULES).await.unwrap();
        assert_eq!(universals.len(), state.universals);

        let reloaded = kernel.load().await;
        assert_eq!(reloaded.metrics, state.metrics);
    }

    #[tokio::test]
    async fn test_consistent_pair_becomes_universal_rule() {
        use PatternType::*;
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        // refactor→test appears with lags 1, 2 and 1 in every repository
        let shapes: [(&[PatternType], &[u64]); 3] = [
            (&[Refactor, Test], &[0, 1]),
            (&[Feature, Refactor, Test], &[0, 1, 3]),
            (&[Bugfix, Refactor, Test], &[0, 2, 3]),
        ];
        let mut sequences = Vec::new();
        for repo in ["a", "b", "c", "d", "e"] {
            for (patterns, timeline) in shapes {
                sequences.push(PatternSequence::new(patterns.to_vec(), timeline.to_vec(), repo));
            }
        }
        store.append_jsonl(artifacts::SEQUENCES, &sequences).await.unwrap();

        let state = kernel(&dir).consolidate().await.unwrap();
        assert_eq!(state.universals, 1);

        let universals: Vec<UniversalRule> = store.read_json(artifacts::UNIVERSAL_RULES).await.unwrap();
        assert_eq!(universals.len(), 1);
        let rule = &universals[0];
        assert_eq!(rule.id, "refactor→test");
        assert!(rule.rule.starts_with("refactor → test (78% strength"));

        // 15 samples over 5 repositories, mean lag 4/3
        let strength = 0.3 * 0.6 + 0.4 * 0.8 + 0.3 * (1.0 - (4.0 / 3.0) / 20.0);
        let confidence = 0.6 * (1.0 - (2.0f64 / 9.0).sqrt() / 10.0) + 0.4;
        assert!((rule.strength - strength).abs() < 1e-9);
        assert!((rule.confidence - confidence).abs() < 1e-9);
        assert!(rule.strength >= 0.7 && rule.confidence >= 0.6);

        assert_eq!(rule.validated_in_repos, 5);
        assert_eq!(rule.examples, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_goal_thresholds_are_strict() {
        let dir = TempDir::new().unwrap();
        let kernel = kernel(&dir);
        let mut state = CognitiveState::empty(4);
        state.coherence_score = 0.95;
        state.forecast_precision = 0.8;
        state.universals = 100;
        assert!(!kernel.is_goal_reached(&state));
        state.universals = 101;
        assert!(kernel.is_goal_reached(&state));
    }
}
