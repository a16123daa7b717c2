// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cycle Metrics
//!
//! Health indicators of the reasoning pipeline, computed from ledger cycle
//! records globally and per repository:
//!
//! ```text
//! pattern_density   = patterns / events processed
//! correlation_rate  = correlations / patterns
//! forecast_accuracy = mean precision of cycles that forecast
//! adr_usefulness    = min(forecasts / decisions, 1) * 0.6
//! cycle_time_ms     = mean cycle duration
//! entropy           = Shannon entropy (bits) of the pattern type distribution
//! ```
//!
//! A reading on the wrong side of its threshold becomes a [`MetricsInsight`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CycleRecord, Pattern};

/// Scope name of the ledger-wide reading
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    PatternDensity,
    CorrelationRate,
    ForecastAccuracy,
    AdrUsefulness,
    CycleTimeMs,
    Entropy,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::PatternDensity => "pattern_density",
            MetricKind::CorrelationRate => "correlation_rate",
            MetricKind::ForecastAccuracy => "forecast_accuracy",
            MetricKind::AdrUsefulness => "adr_usefulness",
            MetricKind::CycleTimeMs => "cycle_time_ms",
            MetricKind::Entropy => "entropy",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub pattern_density: f64,
    pub correlation_rate: f64,
    pub forecast_accuracy: f64,
    pub adr_usefulness: f64,
    pub cycle_time_ms: f64,
    pub entropy: f64,
    pub total_events: u64,
    pub total_patterns: u64,
    pub total_correlations: u64,
    pub total_forecasts: u64,
    pub total_decisions: u64,
    pub total_cycles: u64,
}

impl CycleMetrics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CycleRecord>) -> Self {
        let mut metrics = CycleMetrics::default();
        let mut duration_ms = 0u64;
        let mut precision_sum = 0.0;
        let mut forecasting_cycles = 0u64;
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();

        for record in records {
            let phases = &record.phases;
            metrics.total_cycles += 1;
            metrics.total_events += record.metadata.events_processed as u64;
            metrics.total_patterns += phases.patterns.count as u64;
            metrics.total_correlations += phases.correlations.count as u64;
            metrics.total_forecasts += phases.forecasts.count as u64;
            metrics.total_decisions += phases.decisions.count as u64;
            duration_ms += record.metadata.duration_ms;

            if phases.forecasts.count > 0 {
                precision_sum += record.metadata.precision;
                forecasting_cycles += 1;
            }

            if let Some(items) = phases.patterns.items.as_array() {
                for pattern in items.iter().filter_map(|v| serde_json::from_value::<Pattern>(v.clone()).ok()) {
                    *by_type.entry(pattern.pattern_type.as_str().to_string()).or_default() += 1;
                }
            }
        }

        metrics.pattern_density = ratio(metrics.total_patterns, metrics.total_events);
        metrics.correlation_rate = ratio(metrics.total_correlations, metrics.total_patterns);
        if forecasting_cycles > 0 {
            metrics.forecast_accuracy = precision_sum / forecasting_cycles as f64;
        }
        if metrics.total_decisions > 0 {
            metrics.adr_usefulness = ratio(metrics.total_forecasts, metrics.total_decisions).min(1.0) * 0.6;
        }
        metrics.cycle_time_ms = ratio(duration_ms, metrics.total_cycles);
        metrics.entropy = entropy(by_type.values().copied());
        metrics
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Shannon entropy in bits of a count distribution
pub fn entropy(counts: impl IntoIterator<Item = u64>) -> f64 {
    let counts: Vec<u64> = counts.into_iter().filter(|c| *c > 0).collect();
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .map(|c| {
            let p = *c as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

/// Snapshot written to `metrics/stats.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub global: CycleMetrics,
    pub by_repo: BTreeMap<String, CycleMetrics>,
    pub generated_at: DateTime<Utc>,
}

impl MetricsReport {
    pub fn compute(records: &[CycleRecord], generated_at: DateTime<Utc>) -> Self {
        let mut grouped: BTreeMap<&str, Vec<&CycleRecord>> = BTreeMap::new();
        for record in records {
            grouped.entry(record.metadata.repo.as_str()).or_default().push(record);
        }

        let by_repo = grouped
            .into_iter()
            .map(|(repo, cycles)| (repo.to_string(), CycleMetrics::from_records(cycles)))
            .collect::<BTreeMap<_, _>>();
        let global = CycleMetrics::from_records(records);
        debug!(cycles = global.total_cycles, repos = by_repo.len(), "Cycle metrics computed");

        Self {
            global,
            by_repo,
            generated_at,
        }
    }

    /// Insights for the global reading first, then each repository in name order
    pub fn insights(&self, thresholds: &MetricsThresholds) -> Vec<MetricsInsight> {
        let mut insights = thresholds.detect(&self.global, GLOBAL_SCOPE);
        for (repo, metrics) in &self.by_repo {
            insights.extend(thresholds.detect(metrics, repo));
        }
        insights
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsThresholds {
    pub pattern_density_min: f64,
    pub correlation_rate_min: f64,
    pub forecast_accuracy_min: f64,
    pub cycle_time_max_ms: f64,
    /// Bits
    pub entropy_min: f64,
}

impl Default for MetricsThresholds {
    fn default() -> Self {
        Self {
            pattern_density_min: 0.3,
            correlation_rate_min: 0.5,
            forecast_accuracy_min: 0.4,
            cycle_time_max_ms: 3000.0,
            entropy_min: 1.5,
        }
    }
}

/// A metric reading outside its threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsInsight {
    pub metric: MetricKind,
    pub observed: f64,
    pub threshold: f64,
    /// Relative distance from the threshold, `(observed - threshold) / threshold`
    pub deviation: f64,
    pub severity: Severity,
    pub repos_affected: Vec<String>,
}

impl MetricsThresholds {
    /// Checks one reading. Minimums flag values strictly below, the cycle
    /// time maximum flags values strictly above.
    pub fn detect(&self, metrics: &CycleMetrics, scope: &str) -> Vec<MetricsInsight> {
        let insight = |metric, observed: f64, threshold: f64, severity| MetricsInsight {
            metric,
            observed,
            threshold,
            deviation: if threshold == 0.0 { 0.0 } else { (observed - threshold) / threshold },
            severity,
            repos_affected: vec![scope.to_string()],
        };
        let below = |observed: f64, threshold: f64, high_under: f64| {
            if observed < threshold * high_under {
                Severity::High
            } else {
                Severity::Medium
            }
        };

        let mut insights = Vec::new();
        if metrics.pattern_density < self.pattern_density_min {
            insights.push(insight(
                MetricKind::PatternDensity,
                metrics.pattern_density,
                self.pattern_density_min,
                below(metrics.pattern_density, self.pattern_density_min, 0.5),
            ));
        }
        if metrics.correlation_rate < self.correlation_rate_min {
            insights.push(insight(
                MetricKind::CorrelationRate,
                metrics.correlation_rate,
                self.correlation_rate_min,
                below(metrics.correlation_rate, self.correlation_rate_min, 0.6),
            ));
        }
        if metrics.forecast_accuracy < self.forecast_accuracy_min {
            insights.push(insight(
                MetricKind::ForecastAccuracy,
                metrics.forecast_accuracy,
                self.forecast_accuracy_min,
                below(metrics.forecast_accuracy, self.forecast_accuracy_min, 0.7),
            ));
        }
        if metrics.cycle_time_ms > self.cycle_time_max_ms {
            let severity = if metrics.cycle_time_ms > self.cycle_time_max_ms * 1.5 {
                Severity::High
            } else {
                Severity::Medium
            };
            insights.push(insight(
                MetricKind::CycleTimeMs,
                metrics.cycle_time_ms,
                self.cycle_time_max_ms,
                severity,
            ));
        }
        if metrics.entropy < self.entropy_min {
            // Low diversity is never more than a medium concern
            let severity = if metrics.entropy < self.entropy_min * 0.5 {
                Severity::Medium
            } else {
                Severity::Low
            };
            insights.push(insight(MetricKind::Entropy, metrics.entropy, self.entropy_min, severity));
        }
        insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangeEvent, CycleMetadata, CyclePhases, HashChain, PatternType, PhaseOutput};
    use uuid::Uuid;

    fn phase(count: usize) -> PhaseOutput {
        PhaseOutput {
            count,
            items: serde_json::Value::Array(vec![]),
        }
    }

    fn record(
        chain: &mut HashChain,
        repo: &str,
        events: usize,
        types: &[PatternType],
        correlations: usize,
        forecasts: usize,
        precision: f64,
        duration_ms: u64,
    ) -> CycleRecord {
        let event = ChangeEvent {
            hash: "c1".to_string(),
            message: String::new(),
            author: String::new(),
            timestamp: Utc::now(),
            files: vec![],
        };
        let patterns: Vec<Pattern> = types.iter().map(|t| Pattern::new(*t, 0.8, &event, repo, &[])).collect();
        let phases = CyclePhases {
            patterns: PhaseOutput::from_items(&patterns).unwrap(),
            sequences: phase(0),
            timeline: phase(0),
            correlations: phase(correlations),
            chains: phase(0),
            rules: phase(0),
            forecasts: phase(forecasts),
            decisions: phase(2),
        };
        let metadata = CycleMetadata {
            repo: repo.to_string(),
            chain_id: Uuid::nil(),
            duration_ms,
            events_processed: events,
            precision,
        };
        chain.seal(Utc::now(), phases, metadata).unwrap()
    }

    #[test]
    fn test_entropy_of_distributions() {
        assert_eq!(entropy([]), 0.0);
        assert_eq!(entropy([7]), 0.0);
        assert!((entropy([1, 1]) - 1.0).abs() < 1e-12);
        assert!((entropy([2, 2, 2, 2]) - 2.0).abs() < 1e-12);
        assert_eq!(entropy([0, 3]), 0.0);
    }

    #[test]
    fn test_report_aggregates_globally_and_per_repo() {
        use PatternType::*;
        let mut chain = HashChain::new();
        let records = vec![
            record(&mut chain, "repo-a", 10, &[Refactor, Test], 1, 1, 0.5, 1000),
            record(&mut chain, "repo-a", 10, &[Bugfix, Feature], 3, 0, 0.0, 3000),
            record(&mut chain, "repo-b", 4, &[Test, Test], 0, 2, 1.0, 2000),
        ];

        let report = MetricsReport::compute(&records, Utc::now());

        let global = &report.global;
        assert_eq!(global.total_cycles, 3);
        assert_eq!(global.total_events, 24);
        assert_eq!(global.total_patterns, 6);
        assert_eq!(global.total_correlations, 4);
        assert_eq!(global.total_decisions, 6);
        assert!((global.pattern_density - 0.25).abs() < 1e-12);
        assert!((global.correlation_rate - 4.0 / 6.0).abs() < 1e-12);
        // Cycles without forecasts do not dilute accuracy
        assert!((global.forecast_accuracy - 0.75).abs() < 1e-12);
        assert!((global.adr_usefulness - 0.3).abs() < 1e-12);
        assert_eq!(global.cycle_time_ms, 2000.0);
        // refactor 1, test 3, bugfix 1, feature 1
        assert!((global.entropy - entropy([1, 3, 1, 1])).abs() < 1e-12);

        assert_eq!(report.by_repo.len(), 2);
        let repo_a = &report.by_repo["repo-a"];
        assert_eq!(repo_a.total_cycles, 2);
        assert!((repo_a.pattern_density - 0.2).abs() < 1e-12);
        assert_eq!(repo_a.forecast_accuracy, 0.5);
        assert_eq!(repo_a.entropy, 2.0);
        assert_eq!(report.by_repo["repo-b"].entropy, 0.0);
    }

    #[test]
    fn test_empty_ledger_reads_as_zero() {
        let report = MetricsReport::compute(&[], Utc::now());
        assert_eq!(report.global, CycleMetrics::default());
        assert!(report.by_repo.is_empty());
    }

    #[test]
    fn test_detect_flags_readings_outside_thresholds() {
        let thresholds = MetricsThresholds::default();
        let metrics = CycleMetrics {
            pattern_density: 0.1,
            correlation_rate: 0.45,
            forecast_accuracy: 0.4,
            adr_usefulness: 0.0,
            cycle_time_ms: 5000.0,
            entropy: 1.0,
            ..Default::default()
        };

        let insights = thresholds.detect(&metrics, "repo-a");
        let found: Vec<(MetricKind, Severity)> = insights.iter().map(|i| (i.metric, i.severity)).collect();
        assert_eq!(
            found,
            vec![
                (MetricKind::PatternDensity, Severity::High),
                (MetricKind::CorrelationRate, Severity::Medium),
                (MetricKind::CycleTimeMs, Severity::High),
                (MetricKind::Entropy, Severity::Low),
            ]
        );
        assert!((insights[0].deviation - (0.1 - 0.3) / 0.3).abs() < 1e-12);
        assert_eq!(insights[0].repos_affected, vec!["repo-a".to_string()]);
        assert!((insights[2].deviation - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_healthy_reading_has_no_insights() {
        let metrics = CycleMetrics {
            pattern_density: 0.8,
            correlation_rate: 0.9,
            forecast_accuracy: 0.6,
            adr_usefulness: 0.6,
            cycle_time_ms: 120.0,
            entropy: 2.5,
            ..Default::default()
        };
        assert!(MetricsThresholds::default().detect(&metrics, GLOBAL_SCOPE).is_empty());
    }

    #[test]
    fn test_report_insights_are_scoped() {
        use PatternType::*;
        let mut chain = HashChain::new();
        let records = vec![
            record(&mut chain, "repo-a", 2, &[Refactor, Test, Bugfix, Feature], 4, 1, 0.9, 10),
            record(&mut chain, "repo-b", 20, &[Test], 1, 1, 0.9, 10),
        ];

        let insights = MetricsReport::compute(&records, Utc::now()).insights(&MetricsThresholds::default());
        let density: Vec<String> = insights
            .iter()
            .filter(|i| i.metric == MetricKind::PatternDensity)
            .flat_map(|i| i.repos_affected.clone())
            .collect();
        // 5 patterns over 22 events globally, 1 over 20 in repo-b
        assert_eq!(density, vec![GLOBAL_SCOPE.to_string(), "repo-b".to_string()]);
    }
}
