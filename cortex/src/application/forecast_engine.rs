// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Forecast Engine
//!
//! Predicts the next likely patterns of a repository and keeps a reflective
//! record of why each prediction was made.
//!
//! ```text
//! HYPOTHESIS     every correlation whose cause is in the current state
//!                yields one forecast (confidence = strength * confidence)
//! TRAJECTORIES   top chains intersecting the current state project
//!                their remaining suffix
//! CONFRONTATION  each forecast is checked against the `horizon` most
//!                recent events (the whole timeline for horizon 0); its
//!                reasoning entry is resolved
//! ```
//!
//! Every candidate gets a reasoning entry, even the ones cut by
//! `max_forecasts`; those stay unresolved. Confrontation is the only place a
//! reasoning entry is mutated after creation. Precision is
//! `correct / evaluated`, 0 without forecasts.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::domain::{
    BridgeKind, BridgeRequest, CausalChain, CausalCorrelation, CausalTimeline, ForecastEnrichmentData,
    ForecastReport, KernelEvent, PatternType, PossibleFuture, PredictiveForecast, ReasoningEntry, Trajectory,
};
use crate::infrastructure::{BridgeAdapter, EventBus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Events that make up the current state
    pub recent_window: usize,
    pub max_forecasts: usize,
    pub max_chains: usize,
    /// Horizon given to enriched forecasts that do not carry one
    pub default_horizon: u64,
    // Forwarded to the enrichment bridge
    pub forecast_horizon: u64,
    pub min_confidence: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            recent_window: 5,
            max_forecasts: 20,
            max_chains: 10,
            default_horizon: 3,
            forecast_horizon: 5,
            min_confidence: 0.4,
        }
    }
}

/// Persisted precision snapshot of the most recent cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub forecast_precision: f64,
    pub total_forecasts: usize,
    pub correct_predictions: usize,
    pub updated_at: DateTime<Utc>,
}

impl ForecastMetrics {
    pub fn from_report(report: &ForecastReport) -> Self {
        Self {
            forecast_precision: report.precision,
            total_forecasts: report.evaluated,
            correct_predictions: report.correct,
            updated_at: Utc::now(),
        }
    }
}

/// Native forecasts plus the reasoning of every candidate behind them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub forecasts: Vec<PredictiveForecast>,
    pub reasoning: Vec<ReasoningEntry>,
}

pub struct ForecastEngine {
    config: ForecastConfig,
    bridges: BridgeAdapter,
    event_bus: EventBus,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig, bridges: BridgeAdapter, event_bus: EventBus) -> Self {
        Self {
            config,
            bridges,
            event_bus,
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub async fn forecast(
        &self,
        repo: &str,
        correlations: &[CausalCorrelation],
        chains: &[CausalChain],
        timeline: &CausalTimeline,
    ) -> ForecastReport {
        let current = timeline.recent_patterns(self.config.recent_window);
        let Prediction {
            forecasts: native,
            mut reasoning,
        } = self.predict(&current, correlations);

        let (mut forecasts, enriched) = match self.enrich(repo, &native, timeline).await {
            Some(enriched) if !enriched.is_empty() => (enriched, true),
            _ => (native, false),
        };
        track_reasoning(&mut reasoning, &forecasts);

        let trajectory = self.simulate_trajectories(&current, chains);
        let (correct, evaluated) = confront(&mut forecasts, timeline);
        track_reasoning(&mut reasoning, &forecasts);
        let precision = if evaluated == 0 {
            0.0
        } else {
            correct as f64 / evaluated as f64
        };

        info!(
            repo,
            forecasts = forecasts.len(),
            futures = trajectory.possible_futures.len(),
            precision,
            enriched,
            "Forecasts generated"
        );
        self.event_bus.publish(KernelEvent::ForecastsGenerated {
            repo: repo.to_string(),
            forecasts: forecasts.len(),
            precision,
            enriched,
            timestamp: Utc::now(),
        });

        debug!(repo, reasoning = reasoning.len(), "Reasoning recorded");
        ForecastReport {
            forecasts,
            trajectory,
            reasoning,
            precision,
            evaluated,
            correct,
        }
    }

    /// One forecast per correlation whose cause is currently present, best
    /// `max_forecasts` kept. Reasoning is kept for every candidate.
    pub fn predict(&self, current: &BTreeSet<PatternType>, correlations: &[CausalCorrelation]) -> Prediction {
        let mut reasoning = Vec::new();
        let mut forecasts: Vec<PredictiveForecast> = current
            .iter()
            .flat_map(|pattern| correlations.iter().filter(move |c| c.cause == *pattern))
            .map(|c| {
                let confidence = c.weight();
                let entry = ReasoningEntry::new(
                    format!("If {} is present, {} should follow", c.cause, c.effect),
                    vec![c.id.clone()],
                    c.effect,
                    confidence,
                );
                reasoning.push(entry.clone());
                // Fractional lags truncate; 0 checks the whole timeline
                PredictiveForecast::new(c.effect, vec![c.cause], confidence, c.lag as u64, entry)
            })
            .collect();

        sort_by_confidence(&mut forecasts);
        forecasts.truncate(self.config.max_forecasts);
        Prediction { forecasts, reasoning }
    }

    /// Remaining suffix of every top chain that the current state has entered.
    pub fn simulate_trajectories(&self, current: &BTreeSet<PatternType>, chains: &[CausalChain]) -> Trajectory {
        let possible_futures = chains
            .iter()
            .take(self.config.max_chains)
            .filter_map(|chain| {
                let entered = chain.links.iter().position(|l| current.contains(&l.pattern))?;
                if entered + 1 >= chain.len() {
                    return None;
                }
                Some(PossibleFuture {
                    sequence: chain.links[entered + 1..].iter().map(|l| l.pattern).collect(),
                    probability: chain.strength,
                    chain_id: chain.id.clone(),
                })
            })
            .collect();

        Trajectory {
            current_state: current.iter().copied().collect(),
            possible_futures,
        }
    }

    async fn enrich(
        &self,
        repo: &str,
        native: &[PredictiveForecast],
        timeline: &CausalTimeline,
    ) -> Option<Vec<PredictiveForecast>> {
        if !self.bridges.is_configured(BridgeKind::ForecastEnrichment) {
            return None;
        }

        let request = BridgeRequest {
            repo: repo.to_string(),
            payload: json!({
                "forecasts": native
                    .iter()
                    .map(|f| json!({
                        "predicted": f.predicted,
                        "confidence": f.confidence,
                        "horizon": f.horizon,
                    }))
                    .collect::<Vec<_>>(),
                "timeline": { "events": timeline.events },
            }),
            config: BTreeMap::from([
                ("forecast_horizon".to_string(), json!(self.config.forecast_horizon)),
                ("min_confidence".to_string(), json!(self.config.min_confidence)),
            ]),
        };

        let data: ForecastEnrichmentData = self.bridges.refine(BridgeKind::ForecastEnrichment, &request).await?;

        let mut enriched: Vec<PredictiveForecast> = data
            .enriched_forecasts
            .into_iter()
            .map(|ef| {
                let horizon = if ef.horizon == 0 { self.config.default_horizon } else { ef.horizon };
                match native.iter().find(|f| f.predicted == ef.predicted) {
                    Some(original) => {
                        let mut forecast = original.clone();
                        forecast.confidence = ef.confidence;
                        forecast.horizon = horizon;
                        forecast.timestamp = Utc::now();
                        forecast
                    }
                    None => {
                        let reasoning = ReasoningEntry::new(
                            format!("ML-enhanced forecast for {}", ef.predicted),
                            vec!["ML model".to_string()],
                            ef.predicted,
                            ef.confidence,
                        );
                        PredictiveForecast::new(ef.predicted, Vec::new(), ef.confidence, horizon, reasoning)
                    }
                }
            })
            .collect();

        sort_by_confidence(&mut enriched);
        enriched.truncate(self.config.max_forecasts);
        debug!(repo, enriched = enriched.len(), "Forecasts enriched by bridge");
        Some(enriched)
    }
}

/// Resolves every forecast's reasoning entry against the timeline.
/// Returns `(correct, evaluated)`.
pub fn confront(forecasts: &mut [PredictiveForecast], timeline: &CausalTimeline) -> (usize, usize) {
    let mut correct = 0usize;
    let mut evaluated = 0usize;

    for forecast in forecasts.iter_mut() {
        let window = match forecast.horizon {
            0 => timeline.events.as_slice(),
            horizon => timeline.recent_events(horizon as usize),
        };
        let observed: Vec<PatternType> = window.iter().flat_map(|e| e.patterns.iter().copied()).collect();

        if observed.contains(&forecast.predicted) {
            correct += 1;
            let coherence = correct as f64 / (evaluated + 1) as f64;
            let basis = forecast
                .based_on
                .iter()
                .map(PatternType::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            let learning = format!("Validated: {} → {}", basis, forecast.predicted);
            forecast
                .reasoning
                .resolve(Some(forecast.predicted), true, Some(coherence), learning);
        } else {
            let found = observed.iter().map(PatternType::as_str).collect::<Vec<_>>().join(", ");
            let learning = format!("Failed: Expected {}, found {}", forecast.predicted, found);
            forecast.reasoning.resolve(None, false, None, learning);
        }
        evaluated += 1;
    }

    (correct, evaluated)
}

/// Mirrors each forecast's reasoning into the history: entries already
/// recorded are replaced by the forecast's copy, unknown ones are appended.
fn track_reasoning(history: &mut Vec<ReasoningEntry>, forecasts: &[PredictiveForecast]) {
    for forecast in forecasts {
        match history.iter_mut().find(|entry| entry.id == forecast.reasoning.id) {
            Some(entry) => *entry = forecast.reasoning.clone(),
            None => history.push(forecast.reasoning.clone()),
        }
    }
}

fn sort_by_confidence(forecasts: &mut [PredictiveForecast]) {
    forecasts.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.predicted.cmp(&b.predicted))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AstSummary, ChainLink, TimelineEvent};
    use crate::infrastructure::{BridgeCommand, ProcessRefiner};
    use std::sync::Arc;
    use std::time::Duration;

    fn timeline(patterns: &[&[PatternType]]) -> CausalTimeline {
        CausalTimeline {
            repo: "r".to_string(),
            events: patterns
                .iter()
                .enumerate()
                .map(|(t, p)| TimelineEvent {
                    t: t as u64,
                    patterns: p.to_vec(),
                    ast: AstSummary::default(),
                    commit: format!("c{}", t),
                    timestamp: Utc::now(),
                })
                .collect(),
            total_commits: patterns.len() as u64,
        }
    }

    fn correlation(cause: PatternType, effect: PatternType, strength: f64, confidence: f64, lag: f64) -> CausalCorrelation {
        CausalCorrelation::new(cause, effect, strength, lag, 4, confidence)
    }

    fn chain(patterns: &[PatternType], strength: f64) -> CausalChain {
        CausalChain {
            id: crate::domain::sequence_key(patterns),
            links: patterns
                .iter()
                .enumerate()
                .map(|(i, p)| ChainLink {
                    pattern: *p,
                    position: i as u64,
                })
                .collect(),
            strength,
            avg_lag: 1.0,
            repos: vec!["r".into()],
            frequency: 1,
        }
    }

    fn engine(bridges: BridgeAdapter) -> ForecastEngine {
        ForecastEngine::new(ForecastConfig::default(), bridges, EventBus::new(16))
    }

    fn native_engine() -> ForecastEngine {
        engine(BridgeAdapter::native(EventBus::new(16)))
    }

    fn shell(script: &str) -> Arc<ProcessRefiner> {
        Arc::new(ProcessRefiner::new(
            "test",
            BridgeCommand::new("sh", vec!["-c".to_string(), script.to_string()]),
            Duration::from_secs(10),
        ))
    }

    /// Comparable view that ignores generated ids and timestamps
    fn summary(report: &ForecastReport) -> Vec<(PatternType, f64, u64, Option<bool>)> {
        report
            .forecasts
            .iter()
            .map(|f| (f.predicted, f.confidence, f.horizon, f.reasoning.was_correct))
            .collect()
    }

    #[test]
    fn test_predict_uses_current_causes() {
        use PatternType::*;
        let current: BTreeSet<PatternType> = [Refactor].into_iter().collect();
        let correlations = vec![
            correlation(Refactor, Test, 0.8, 0.5, 2.0),
            correlation(Feature, Bugfix, 0.9, 0.9, 1.0),
        ];

        let forecasts = native_engine().predict(&current, &correlations).forecasts;
        assert_eq!(forecasts.len(), 1);
        assert_eq!(forecasts[0].predicted, Test);
        assert!((forecasts[0].confidence - 0.4).abs() < 1e-9);
        assert_eq!(forecasts[0].horizon, 2);
        assert_eq!(forecasts[0].reasoning.hypothesis, "If refactor is present, test should follow");
        assert_eq!(forecasts[0].reasoning.based_on, vec!["refactor→test".to_string()]);
    }

    fn every_pair(strength: f64) -> Vec<CausalCorrelation> {
        let mut correlations = Vec::new();
        for cause in PatternType::ALL {
            for effect in PatternType::ALL {
                correlations.push(correlation(cause, effect, strength, 0.5, 1.0));
            }
        }
        correlations
    }

    #[test]
    fn test_predict_keeps_top_twenty_with_all_reasoning() {
        let current: BTreeSet<PatternType> = PatternType::ALL.into_iter().collect();
        let correlations = every_pair(0.5);

        let prediction = native_engine().predict(&current, &correlations);
        assert_eq!(prediction.forecasts.len(), 20);
        assert_eq!(prediction.reasoning.len(), correlations.len());
    }

    #[tokio::test]
    async fn test_report_records_reasoning_for_every_candidate() {
        let history = timeline(&[PatternType::ALL.as_slice()]);
        let correlations = every_pair(0.5);

        let report = native_engine().forecast("r", &correlations, &[], &history).await;
        assert_eq!(report.forecasts.len(), 20);
        assert_eq!(report.reasoning_entries().count(), correlations.len());

        let resolved: Vec<&ReasoningEntry> = report.reasoning_entries().filter(|e| e.is_resolved()).collect();
        assert_eq!(resolved.len(), 20);
        for forecast in &report.forecasts {
            let entry = report
                .reasoning_entries()
                .find(|e| e.id == forecast.reasoning.id)
                .unwrap();
            assert_eq!(entry, &forecast.reasoning);
            assert_eq!(entry.was_correct, Some(true));
        }
    }

    #[tokio::test]
    async fn test_zero_lag_checks_whole_timeline() {
        use PatternType::*;
        let history = timeline(&[&[Security], &[Feature], &[Refactor], &[Refactor], &[Refactor]]);
        let correlations = vec![correlation(Refactor, Security, 0.8, 0.8, 0.0)];

        let report = native_engine().forecast("r", &correlations, &[], &history).await;
        assert_eq!(report.forecasts[0].horizon, 0);
        assert_eq!(report.correct, 1);
        assert_eq!(report.forecasts[0].reasoning.was_correct, Some(true));
    }

    #[test]
    fn test_trajectory_projects_chain_suffix() {
        use PatternType::*;
        let current: BTreeSet<PatternType> = [Refactor].into_iter().collect();
        let chains = vec![
            chain(&[Feature, Refactor, Test, Documentation], 0.8),
            chain(&[Bugfix, Test, Refactor], 0.7),
        ];

        let trajectory = native_engine().simulate_trajectories(&current, &chains);
        assert_eq!(trajectory.current_state, vec![Refactor]);
        assert_eq!(trajectory.possible_futures.len(), 1);
        assert_eq!(trajectory.possible_futures[0].sequence, vec![Test, Documentation]);
        assert_eq!(trajectory.possible_futures[0].probability, 0.8);
    }

    #[tokio::test]
    async fn test_confrontation_measures_precision() {
        use PatternType::*;
        let history = timeline(&[&[Feature], &[Refactor], &[Test], &[Refactor], &[Test]]);
        let correlations = vec![
            correlation(Refactor, Test, 0.8, 0.8, 1.0),
            correlation(Refactor, Security, 0.6, 0.6, 1.0),
        ];

        let report = native_engine().forecast("r", &correlations, &[], &history).await;
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.correct, 1);
        assert_eq!(report.precision, 0.5);

        let hit = report.forecasts.iter().find(|f| f.predicted == Test).unwrap();
        assert_eq!(hit.reasoning.was_correct, Some(true));
        assert_eq!(hit.reasoning.actual_outcome, Some(Test));
        assert_eq!(hit.reasoning.learning.as_deref(), Some("Validated: refactor → test"));

        let miss = report.forecasts.iter().find(|f| f.predicted == Security).unwrap();
        assert_eq!(miss.reasoning.was_correct, Some(false));
        assert_eq!(miss.reasoning.learning.as_deref(), Some("Failed: Expected security, found test"));
    }

    #[tokio::test]
    async fn test_no_forecasts_means_zero_precision() {
        let report = native_engine()
            .forecast("r", &[], &[], &CausalTimeline::empty("r"))
            .await;
        assert!(report.forecasts.is_empty());
        assert_eq!(report.precision, 0.0);
    }

    #[tokio::test]
    async fn test_bridge_failure_matches_native_output() {
        use PatternType::*;
        let history = timeline(&[&[Refactor], &[Test]]);
        let correlations = vec![correlation(Refactor, Test, 0.8, 0.8, 1.0)];

        let failing = BridgeAdapter::native(EventBus::new(16))
            .with_refiner(BridgeKind::ForecastEnrichment, shell("cat > /dev/null; exit 3"));
        let refined = engine(failing).forecast("r", &correlations, &[], &history).await;
        let native = native_engine().forecast("r", &correlations, &[], &history).await;

        assert_eq!(summary(&refined), summary(&native));
        assert_eq!(refined.precision, native.precision);
    }

    #[tokio::test]
    async fn test_enrichment_keeps_original_reasoning() {
        use PatternType::*;
        let history = timeline(&[&[Refactor], &[Test]]);
        let correlations = vec![correlation(Refactor, Test, 0.8, 0.8, 1.0)];
        let script = r#"cat > /dev/null; echo '{"success": true, "data": {"enriched_forecasts": [{"predicted": "test", "likelihood": 0.95, "horizon": 2}, {"predicted": "documentation", "confidence": 0.5, "horizon": 0}]}, "metadata": {"duration_ms": 4}}'"#;
        let bridges = BridgeAdapter::native(EventBus::new(16)).with_refiner(BridgeKind::ForecastEnrichment, shell(script));

        let report = engine(bridges).forecast("r", &correlations, &[], &history).await;
        assert_eq!(report.forecasts.len(), 2);

        let test = &report.forecasts[0];
        assert_eq!(test.predicted, Test);
        assert_eq!(test.confidence, 0.95);
        assert_eq!(test.reasoning.hypothesis, "If refactor is present, test should follow");

        let docs = &report.forecasts[1];
        assert_eq!(docs.horizon, 3);
        assert_eq!(docs.reasoning.based_on, vec!["ML model".to_string()]);
        assert_eq!(docs.reasoning.was_correct, Some(false));

        // The bridge-only forecast's reasoning joins the history
        assert_eq!(report.reasoning_entries().count(), 2);
        assert!(report.reasoning_entries().any(|e| e.id == docs.reasoning.id && e.was_correct == Some(false)));
    }

    #[test]
    fn test_metrics_from_report() {
        let report = ForecastReport {
            precision: 0.75,
            evaluated: 4,
            correct: 3,
            ..Default::default()
        };
        let metrics = ForecastMetrics::from_report(&report);
        assert_eq!(metrics.total_forecasts, 4);
        assert_eq!(metrics.correct_predictions, 3);
    }
}
