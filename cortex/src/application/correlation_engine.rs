// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Correlation Engine
//!
//! Turns pattern sequences into directed cause→effect correlations, causal
//! chains and context-conditioned rules.
//!
//! ## Aggregation
//!
//! Every adjacent pair inside every sequence is folded into one accumulator
//! per `cause→effect` key. An observation counts `frequency` times, so a
//! sequence seen in eight places contributes eight samples. Each sequence
//! contributes one lag sample: the position difference of the pair, or the
//! sequence's average lag when positions were not recorded.
//!
//! ```text
//! occurrence   = min(0.6, 0.2 + 0.05 * (samples - 1))
//! universality = min(0.8, 0.2 + 0.15 * (repos - 1))
//! proximity    = avg_lag > 0 ? max(0.4, 1 - avg_lag / 20) : 0.5
//! strength     = 0.3 * occurrence + 0.4 * universality + 0.3 * proximity
//!
//! consistency  = max(0, 1 - stddev(lags) / 10)
//! sample_size  = min(1, samples / 10)
//! confidence   = 0.6 * consistency + 0.4 * sample_size   (0.5 with < 2 lags)
//! ```
//!
//! Pairs below `min_strength` are dropped. When the refinement bridge
//! returns a non-empty list it replaces the native correlations outright.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::domain::{
    correlation_id, ActivityBucket, BridgeKind, BridgeRequest, CausalChain, CausalCorrelation,
    CausalTimeline, ChainLink, ContextCondition, ContextualRule, CorrelationRefinementData, CorrelationReport,
    KernelEvent, PatternSequence, PatternType, RepoContext, RepoKind, SizeBucket,
};
use crate::infrastructure::{BridgeAdapter, EventBus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Correlations weaker than this are discarded
    pub min_strength: f64,
    /// Contextualized correlations at or above this become rules
    pub rule_strength: f64,
    pub min_chain_length: usize,
    pub occurrence_weight: f64,
    pub universality_weight: f64,
    pub proximity_weight: f64,
    pub consistency_weight: f64,
    pub sample_weight: f64,
    // Forwarded to the refinement bridge
    pub causal_threshold: f64,
    pub anomaly_detection: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_strength: 0.3,
            rule_strength: 0.6,
            min_chain_length: 3,
            occurrence_weight: 0.3,
            universality_weight: 0.4,
            proximity_weight: 0.3,
            consistency_weight: 0.6,
            sample_weight: 0.4,
            causal_threshold: 0.5,
            anomaly_detection: true,
        }
    }
}

struct PairAccumulator {
    cause: PatternType,
    effect: PatternType,
    samples: u64,
    lags: Vec<f64>,
    repos: BTreeSet<String>,
}

impl PairAccumulator {
    fn avg_lag(&self) -> f64 {
        if self.lags.is_empty() {
            0.0
        } else {
            self.lags.iter().sum::<f64>() / self.lags.len() as f64
        }
    }
}

pub struct CorrelationEngine {
    config: CorrelationConfig,
    bridges: BridgeAdapter,
    event_bus: EventBus,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig, bridges: BridgeAdapter, event_bus: EventBus) -> Self {
        Self {
            config,
            bridges,
            event_bus,
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Full analysis pass: native correlations, optional refinement,
    /// context enrichment, chains and rules.
    pub async fn analyze(&self, repo: &str, sequences: &[PatternSequence], timelines: &[CausalTimeline]) -> CorrelationReport {
        let native = self.find_correlations(sequences);
        let native_count = native.len();

        let (correlations, refined) = match self.refine(repo, &native, timelines).await {
            Some(refined) if !refined.is_empty() => (refined, true),
            _ => (native, false),
        };

        let contexts: Vec<(String, RepoContext)> = timelines
            .iter()
            .map(|t| (t.repo.clone(), detect_context(t)))
            .collect();
        let correlations = attach_dominant_context(correlations, &contexts);
        let chains = self.build_chains(sequences);
        let rules = self.learn_rules(&correlations, &contexts);

        info!(
            repo,
            native = native_count,
            correlations = correlations.len(),
            chains = chains.len(),
            rules = rules.len(),
            refined,
            "Correlation analysis complete"
        );
        self.event_bus.publish(KernelEvent::CorrelationsDiscovered {
            repo: repo.to_string(),
            correlations: correlations.len(),
            chains: chains.len(),
            rules: rules.len(),
            refined,
            timestamp: Utc::now(),
        });

        CorrelationReport {
            correlations,
            chains,
            rules,
        }
    }

    /// Native aggregation over adjacent pairs. Sorted by strength, then id.
    pub fn find_correlations(&self, sequences: &[PatternSequence]) -> Vec<CausalCorrelation> {
        let mut order: Vec<String> = Vec::new();
        let mut index: HashMap<String, PairAccumulator> = HashMap::new();

        for sequence in sequences {
            let weight = u64::from(sequence.frequency.max(1));
            for (i, pair) in sequence.sequence.windows(2).enumerate() {
                let (cause, effect) = (pair[0], pair[1]);
                let lag = match (sequence.timeline.get(i), sequence.timeline.get(i + 1)) {
                    (Some(from), Some(to)) => to.saturating_sub(*from) as f64,
                    _ => sequence.avg_lag,
                };

                let key = correlation_id(cause, effect);
                let acc = index.entry(key.clone()).or_insert_with(|| {
                    order.push(key);
                    PairAccumulator {
                        cause,
                        effect,
                        samples: 0,
                        lags: Vec::new(),
                        repos: BTreeSet::new(),
                    }
                });
                acc.samples += weight;
                acc.lags.push(lag);
                acc.repos.extend(sequence.repos.iter().cloned());
            }
        }

        let mut correlations: Vec<CausalCorrelation> = order
            .iter()
            .filter_map(|key| index.get(key))
            .map(|acc| {
                let avg_lag = acc.avg_lag();
                CausalCorrelation::new(
                    acc.cause,
                    acc.effect,
                    self.strength(acc.samples, acc.repos.len(), avg_lag),
                    avg_lag,
                    acc.samples,
                    self.confidence(acc.samples, &acc.lags),
                )
            })
            .filter(|c| c.strength >= self.config.min_strength)
            .collect();

        sort_by_strength(&mut correlations);
        debug!(pairs = index.len(), kept = correlations.len(), "Native correlations aggregated");
        correlations
    }

    pub fn strength(&self, samples: u64, repos: usize, avg_lag: f64) -> f64 {
        let occurrence = (0.2 + samples.saturating_sub(1) as f64 * 0.05).min(0.6);
        let universality = (0.2 + repos.saturating_sub(1) as f64 * 0.15).min(0.8);
        let proximity = if avg_lag > 0.0 {
            (1.0 - avg_lag / 20.0).max(0.4)
        } else {
            0.5
        };

        self.config.occurrence_weight * occurrence
            + self.config.universality_weight * universality
            + self.config.proximity_weight * proximity
    }

    pub fn confidence(&self, samples: u64, lags: &[f64]) -> f64 {
        if lags.len() < 2 {
            return 0.5;
        }
        let n = lags.len() as f64;
        let mean = lags.iter().sum::<f64>() / n;
        let variance = lags.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;

        let consistency = (1.0 - variance.sqrt() / 10.0).max(0.0);
        let sample_size = (samples as f64 / 10.0).min(1.0);
        self.config.consistency_weight * consistency + self.config.sample_weight * sample_size
    }

    /// One chain per sequence of at least `min_chain_length` patterns.
    pub fn build_chains(&self, sequences: &[PatternSequence]) -> Vec<CausalChain> {
        let mut chains: Vec<CausalChain> = sequences
            .iter()
            .filter(|s| s.len() >= self.config.min_chain_length)
            .map(|s| CausalChain {
                id: s.id.clone(),
                links: s
                    .sequence
                    .iter()
                    .enumerate()
                    .map(|(position, pattern)| ChainLink {
                        pattern: *pattern,
                        position: position as u64,
                    })
                    .collect(),
                strength: s.confidence,
                avg_lag: s.avg_lag,
                repos: s.repos.clone(),
                frequency: s.frequency,
            })
            .collect();

        chains.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        chains
    }

    /// Rules for contextualized correlations at or above `rule_strength`.
    /// Examples are the repositories whose detected kind matches.
    pub fn learn_rules(
        &self,
        correlations: &[CausalCorrelation],
        contexts: &[(String, RepoContext)],
    ) -> Vec<ContextualRule> {
        correlations
            .iter()
            .filter(|c| c.strength >= self.config.rule_strength)
            .filter_map(|c| {
                let context = c.context.as_ref()?;
                let kind = kind_label(context.kind);
                Some(ContextualRule {
                    id: format!("rule-{}-{}", kind, c.id),
                    rule: format!(
                        "In {} repos: {} → {} ({}%)",
                        kind,
                        c.cause,
                        c.effect,
                        (c.strength * 100.0).round() as u32
                    ),
                    condition: ContextCondition {
                        kind: Some(context.kind),
                        ..Default::default()
                    },
                    based_on: c.id.clone(),
                    confidence: c.confidence,
                    examples: contexts
                        .iter()
                        .filter(|(_, ctx)| ctx.kind == context.kind)
                        .map(|(repo, _)| repo.clone())
                        .collect(),
                })
            })
            .collect()
    }

    async fn refine(
        &self,
        repo: &str,
        native: &[CausalCorrelation],
        timelines: &[CausalTimeline],
    ) -> Option<Vec<CausalCorrelation>> {
        if !self.bridges.is_configured(BridgeKind::CorrelationRefinement) {
            return None;
        }

        let timeline = timelines
            .iter()
            .find(|t| t.repo == repo)
            .or_else(|| timelines.first())
            .cloned()
            .unwrap_or_else(|| CausalTimeline::empty(repo));
        let request = BridgeRequest {
            repo: repo.to_string(),
            payload: json!({
                "correlations": native
                    .iter()
                    .map(|c| json!({
                        "cause": c.cause,
                        "effect": c.effect,
                        "strength": c.strength,
                        "lag": c.lag,
                    }))
                    .collect::<Vec<_>>(),
                "timeline": timeline,
            }),
            config: BTreeMap::from([
                ("causal_threshold".to_string(), json!(self.config.causal_threshold)),
                ("anomaly_detection".to_string(), json!(self.config.anomaly_detection)),
            ]),
        };

        let data: CorrelationRefinementData = self
            .bridges
            .refine(BridgeKind::CorrelationRefinement, &request)
            .await?;

        let mut refined: Vec<CausalCorrelation> = data
            .refined_correlations
            .into_iter()
            .map(|r| {
                let samples = native
                    .iter()
                    .find(|c| c.cause == r.cause && c.effect == r.effect)
                    .map(|c| c.samples)
                    .unwrap_or(1);
                CausalCorrelation::new(r.cause, r.effect, r.strength, r.lag, samples, r.confidence)
            })
            .collect();
        sort_by_strength(&mut refined);
        Some(refined)
    }
}

/// Behavioral profile of a repository from its timeline.
pub fn detect_context(timeline: &CausalTimeline) -> RepoContext {
    let total = timeline.total_patterns() as f64;
    let tests = timeline.pattern_count(PatternType::Test) as f64;
    let features = timeline.pattern_count(PatternType::Feature) as f64;

    let kind = if tests > total * 0.3 {
        RepoKind::Library
    } else if features > total * 0.4 {
        RepoKind::Fullstack
    } else {
        RepoKind::Other
    };

    let avg_functions = if timeline.is_empty() {
        0.0
    } else {
        timeline.events.iter().map(|e| f64::from(e.ast.functions)).sum::<f64>() / timeline.len() as f64
    };
    let size = if avg_functions > 20.0 {
        SizeBucket::Large
    } else if avg_functions > 10.0 {
        SizeBucket::Medium
    } else {
        SizeBucket::Small
    };

    let activity = if timeline.total_commits > 100 {
        ActivityBucket::High
    } else if timeline.total_commits > 50 {
        ActivityBucket::Medium
    } else {
        ActivityBucket::Low
    };

    let has_tests = timeline
        .events
        .iter()
        .any(|e| e.ast.functions > 0 && e.patterns.contains(&PatternType::Test));

    RepoContext {
        kind,
        size,
        activity,
        has_tests,
    }
}

/// Most common kind among the contexts; ties go to the kind seen first.
pub fn dominant_context(contexts: &[(String, RepoContext)]) -> Option<&RepoContext> {
    let mut counts: Vec<(RepoKind, usize)> = Vec::new();
    for (_, context) in contexts {
        match counts.iter_mut().find(|(kind, _)| *kind == context.kind) {
            Some((_, count)) => *count += 1,
            None => counts.push((context.kind, 1)),
        }
    }

    let mut best: Option<(RepoKind, usize)> = None;
    for (kind, count) in counts {
        if best.is_none_or(|(_, max)| count > max) {
            best = Some((kind, count));
        }
    }
    let (kind, _) = best?;
    contexts.iter().map(|(_, c)| c).find(|c| c.kind == kind)
}

fn attach_dominant_context(
    mut correlations: Vec<CausalCorrelation>,
    contexts: &[(String, RepoContext)],
) -> Vec<CausalCorrelation> {
    if let Some(context) = dominant_context(contexts) {
        for correlation in &mut correlations {
            correlation.context = Some(context.clone());
        }
    }
    correlations
}

fn kind_label(kind: RepoKind) -> &'static str {
    match kind {
        RepoKind::Library => "library",
        RepoKind::Fullstack => "fullstack",
        RepoKind::Other => "other",
    }
}

fn sort_by_strength(correlations: &mut [CausalCorrelation]) {
    correlations.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AstSummary, TimelineEvent};
    use crate::infrastructure::{BridgeCommand, ProcessRefiner};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn sequence(patterns: &[PatternType], frequency: u32, confidence: f64, repos: &[&str]) -> PatternSequence {
        let timeline: Vec<u64> = (0..patterns.len() as u64).collect();
        let mut s = PatternSequence::new(patterns.to_vec(), timeline, repos[0]);
        s.repos = repos.iter().map(|r| r.to_string()).collect();
        s.frequency = frequency;
        s.confidence = confidence;
        s
    }

    fn scenario() -> Vec<PatternSequence> {
        use PatternType::*;
        vec![
            sequence(&[Feature, Refactor, Test], 5, 0.85, &["r1", "r2"]),
            sequence(&[Feature, Test, Bugfix], 3, 0.75, &["r3"]),
            sequence(&[Refactor, Test], 8, 0.90, &["r1", "r2", "r3", "r4"]),
        ]
    }

    fn timeline(repo: &str, patterns: &[&[PatternType]], functions: u32) -> CausalTimeline {
        CausalTimeline {
            repo: repo.to_string(),
            events: patterns
                .iter()
                .enumerate()
                .map(|(t, p)| TimelineEvent {
                    t: t as u64,
                    patterns: p.to_vec(),
                    ast: AstSummary {
                        functions,
                        ..Default::default()
                    },
                    commit: format!("c{}", t),
                    timestamp: Utc::now(),
                })
                .collect(),
            total_commits: patterns.len() as u64,
        }
    }

    fn engine(bridges: BridgeAdapter) -> CorrelationEngine {
        CorrelationEngine::new(CorrelationConfig::default(), bridges, EventBus::new(16))
    }

    fn native_engine() -> CorrelationEngine {
        engine(BridgeAdapter::native(EventBus::new(16)))
    }

    fn shell(script: &str) -> Arc<ProcessRefiner> {
        Arc::new(ProcessRefiner::new(
            "test",
            BridgeCommand::new("sh", vec!["-c".to_string(), script.to_string()]),
            Duration::from_secs(10),
        ))
    }

    #[tokio::test]
    async fn test_sequence_to_correlation_scenario() {
        let report = native_engine().analyze("r1", &scenario(), &[]).await;

        let refactor_test = report
            .correlations
            .iter()
            .find(|c| c.id == "refactor→test")
            .expect("refactor→test correlation");
        assert!(refactor_test.samples >= 8);
        assert!(refactor_test.strength >= 0.3);
        assert!(report.chains.iter().any(|c| c.len() >= 3));
    }

    #[test]
    fn test_correlations_sorted_by_strength() {
        let correlations = native_engine().find_correlations(&scenario());
        assert!(correlations.windows(2).all(|w| w[0].strength >= w[1].strength));
        // refactor→test is observed in four repositories and 13 times
        assert_eq!(correlations[0].id, "refactor→test");
        assert_eq!(correlations[0].samples, 13);
    }

    #[test]
    fn test_confidence_defaults_with_single_lag() {
        let engine = native_engine();
        assert_eq!(engine.confidence(4, &[2.0]), 0.5);
        // Identical lags: full consistency, 4 samples
        let expected = 0.6 * 1.0 + 0.4 * 0.4;
        assert!((engine.confidence(4, &[1.0, 1.0]) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_chains_take_sequence_confidence() {
        let chains = native_engine().build_chains(&scenario());
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].id, "feature>refactor>test");
        assert_eq!(chains[0].strength, 0.85);
        assert_eq!(chains[0].links[2].position, 2);
    }

    #[test]
    fn test_detect_context_buckets() {
        use PatternType::*;
        let library = timeline("lib", &[&[Test], &[Test], &[Feature]], 12);
        let context = detect_context(&library);
        assert_eq!(context.kind, RepoKind::Library);
        assert_eq!(context.size, SizeBucket::Medium);
        assert_eq!(context.activity, ActivityBucket::Low);
        assert!(context.has_tests);

        let app = timeline("app", &[&[Feature], &[Feature], &[Bugfix]], 0);
        let context = detect_context(&app);
        assert_eq!(context.kind, RepoKind::Fullstack);
        assert!(!context.has_tests);

        let empty = detect_context(&CausalTimeline::empty("none"));
        assert_eq!(empty.kind, RepoKind::Other);
        assert_eq!(empty.size, SizeBucket::Small);
    }

    #[tokio::test]
    async fn test_rules_follow_dominant_context() {
        use PatternType::*;
        let timelines = vec![
            timeline("a", &[&[Test], &[Test]], 1),
            timeline("b", &[&[Test], &[Refactor], &[Test]], 1),
            timeline("c", &[&[Feature], &[Feature]], 1),
        ];
        let engine = CorrelationEngine::new(
            CorrelationConfig {
                rule_strength: 0.0,
                ..Default::default()
            },
            BridgeAdapter::native(EventBus::new(16)),
            EventBus::new(16),
        );

        let report = engine.analyze("a", &scenario(), &timelines).await;
        assert!(!report.rules.is_empty());
        let rule = report.rules.iter().find(|r| r.based_on == "refactor→test").unwrap();
        assert_eq!(rule.id, "rule-library-refactor→test");
        assert!(rule.rule.starts_with("In library repos: refactor → test ("));
        assert_eq!(rule.examples, vec!["a".to_string(), "b".to_string()]);
        assert!(report
            .correlations
            .iter()
            .all(|c| c.context.as_ref().map(|ctx| ctx.kind) == Some(RepoKind::Library)));
    }

    #[tokio::test]
    async fn test_bridge_failure_matches_native_output() {
        let bus = EventBus::new(16);
        let failing = BridgeAdapter::native(bus.clone())
            .with_refiner(BridgeKind::CorrelationRefinement, shell("cat > /dev/null; exit 3"));

        let refined = engine(failing).analyze("r1", &scenario(), &[]).await;
        let native = native_engine().analyze("r1", &scenario(), &[]).await;
        assert_eq!(refined, native);
    }

    #[tokio::test]
    async fn test_refined_correlations_replace_native() {
        let script = r#"cat > /dev/null; echo '{"success": true, "data": {"refined_correlations": [{"cause": "refactor", "effect": "test", "causal_score": 0.91, "lag": 1.4, "confidence": 0.8}]}, "metadata": {"duration_ms": 12}}'"#;
        let bridges = BridgeAdapter::native(EventBus::new(16)).with_refiner(BridgeKind::CorrelationRefinement, shell(script));

        let report = engine(bridges).analyze("r1", &scenario(), &[]).await;
        assert_eq!(report.correlations.len(), 1);
        let only = &report.correlations[0];
        assert_eq!(only.strength, 0.91);
        assert_eq!(only.lag, 1);
        assert_eq!(only.samples, 13);
    }

    fn arb_pattern() -> impl Strategy<Value = PatternType> {
        proptest::sample::select(PatternType::ALL.to_vec())
    }

    fn arb_sequence() -> impl Strategy<Value = PatternSequence> {
        (
            proptest::collection::vec(arb_pattern(), 2..6),
            proptest::collection::vec(0u64..500, 0..6),
            0u32..40,
            proptest::collection::vec("[a-e]", 1..4),
            0.0f64..50.0,
        )
            .prop_map(|(patterns, mut positions, frequency, repos, avg_lag)| {
                positions.sort_unstable();
                PatternSequence {
                    id: crate::domain::sequence_key(&patterns),
                    sequence: patterns,
                    timeline: positions,
                    frequency,
                    repos,
                    confidence: 0.5,
                    avg_lag,
                }
            })
    }

    proptest! {
        #[test]
        fn prop_correlation_fields_stay_in_bounds(sequences in proptest::collection::vec(arb_sequence(), 0..20)) {
            let correlations = native_engine().find_correlations(&sequences);
            for c in correlations {
                prop_assert!((0.0..=1.0).contains(&c.strength));
                prop_assert!((0.0..=1.0).contains(&c.confidence));
                prop_assert!(c.samples >= 1);
                prop_assert!(c.strength >= 0.3);
            }
        }
    }
}
