// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Meta decision records: recommendations about the reasoning pipeline
//! itself, derived from [`MetricsInsight`]s on its own cycle metrics.
//!
//! Insights below the configured minimum severity are dropped. Records are
//! ordered by descending priority, insight order breaking ties.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cycle_metrics::{MetricKind, MetricsInsight, MetricsReport, MetricsThresholds, Severity};
use crate::domain::{
    normalize_title, DecisionBasis, DecisionKind, DecisionRecord, DecisionStatus, MetricObservation, Priority,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub min_severity: Severity,
    pub thresholds: MetricsThresholds,
}

pub struct FeedbackEngine {
    config: FeedbackConfig,
}

impl FeedbackEngine {
    pub fn new(config: FeedbackConfig) -> Self {
        Self { config }
    }

    pub fn thresholds(&self) -> &MetricsThresholds {
        &self.config.thresholds
    }

    pub fn generate(&self, report: &MetricsReport) -> Vec<DecisionRecord> {
        let insights = report.insights(&self.config.thresholds);
        let total = insights.len();

        let mut records: Vec<DecisionRecord> = insights
            .iter()
            .filter(|insight| insight.severity >= self.config.min_severity)
            .map(meta_record)
            .collect();
        records.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(insights = total, meta_decisions = records.len(), "Meta decision records generated");
        records
    }
}

impl Default for FeedbackEngine {
    fn default() -> Self {
        Self::new(FeedbackConfig::default())
    }
}

fn priority(severity: Severity) -> Priority {
    match severity {
        Severity::Low => Priority::Low,
        Severity::Medium => Priority::Medium,
        Severity::High => Priority::High,
    }
}

struct Guidance {
    title: String,
    context: String,
    recommendation: &'static str,
    consequences: &'static [&'static str],
    improvement: String,
}

fn guidance(insight: &MetricsInsight) -> Guidance {
    let observed = insight.observed;
    let threshold = insight.threshold;
    let shift = (insight.deviation * 100.0).abs();

    match insight.metric {
        MetricKind::PatternDensity => Guidance {
            title: "Improve pattern detection".to_string(),
            context: format!(
                "Pattern density ({:.2}) is below the minimum ({}). The classifier is missing significant patterns.",
                observed, threshold
            ),
            recommendation: "Extend the classifier heuristics: more commit message keywords, changed file \
                             extensions and addition/deletion ratios.",
            consequences: &["More events classified", "Richer sequences", "Risk of noisier patterns"],
            improvement: format!("Expected {:.0}% increase in pattern density", shift),
        },
        MetricKind::CorrelationRate => Guidance {
            title: "Improve correlation between patterns".to_string(),
            context: format!(
                "The correlation rate ({:.2}) is low: few patterns are linked to one another. The sequence \
                 window may be too narrow or the correlation criteria too strict.",
                observed
            ),
            recommendation: "Widen the sequence window, lower the strength floor and correlate across \
                             repositories sharing similar file patterns.",
            consequences: &["More causal links", "Longer chains", "Weaker individual correlations"],
            improvement: format!("Estimated {:.0}% improvement in correlation rate", shift),
        },
        MetricKind::ForecastAccuracy => Guidance {
            title: "Calibrate forecast predictions".to_string(),
            context: format!(
                "Forecast precision ({:.2}) is below expectations. Predictions are not confirmed by later events.",
                observed
            ),
            recommendation: "Recalibrate correlation weights, confront forecasts against a longer history \
                             and enrich the context used for predictions.",
            consequences: &["More reliable forecasts", "Fewer spurious decision records", "Fewer forecasts"],
            improvement: format!("Expected {:.0}% precision gain", shift),
        },
        MetricKind::AdrUsefulness => Guidance {
            title: "Refine decision record generation".to_string(),
            context: format!(
                "Decision record usefulness ({:.2}) suggests many records are generic or poorly targeted.",
                observed
            ),
            recommendation: "Make decision templates more specific, score relevance against repository \
                             context and filter redundant records.",
            consequences: &["Actionable records", "Less noise", "Fewer records overall"],
            improvement: format!("Expected {:.0}% fewer irrelevant records", shift),
        },
        MetricKind::CycleTimeMs => Guidance {
            title: "Optimize cycle performance".to_string(),
            context: format!(
                "Mean cycle time ({:.0}ms) exceeds the maximum ({}ms), limiting how many repositories a \
                 batch can process.",
                observed, threshold
            ),
            recommendation: "Index and cache pattern detection, run independent phases concurrently and \
                             batch ledger writes more aggressively.",
            consequences: &["Faster batches", "Higher memory use", "More complex pipeline"],
            improvement: format!("Estimated {:.0}% reduction in processing time", shift),
        },
        MetricKind::Entropy => Guidance {
            title: "Increase pattern diversity".to_string(),
            context: format!(
                "Pattern entropy ({:.2} bits) is low: the classifier keeps detecting the same few pattern types.",
                observed
            ),
            recommendation: "Broaden classification beyond refactor, bugfix, feature and test, improve \
                             granularity and detect compound patterns.",
            consequences: &["Finer-grained sequences", "More distinct correlations", "Classifier upkeep"],
            improvement: format!("Expected {:.0}% increase in diversity", shift),
        },
    }
}

fn meta_record(insight: &MetricsInsight) -> DecisionRecord {
    let guidance = guidance(insight);
    let scope = insight.repos_affected.join("-");
    DecisionRecord {
        id: format!("meta-adr-{}-{}", insight.metric, normalize_title(&scope)),
        kind: DecisionKind::MetaAdr,
        title: guidance.title,
        context: guidance.context,
        decision: guidance.recommendation.to_string(),
        consequences: guidance.consequences.join("; "),
        estimated_improvement: Some(guidance.improvement),
        priority: priority(insight.severity),
        status: DecisionStatus::Proposed,
        based_on: DecisionBasis::default(),
        observation: Some(MetricObservation {
            metric: insight.metric.to_string(),
            observed: insight.observed,
            threshold: insight.threshold,
            repos_affected: insight.repos_affected.clone(),
        }),
        timestamp: Utc::now(),
    }
}
