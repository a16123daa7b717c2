// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Decision record generation from forecasts, correlations and patterns.
//!
//! Three sources feed the candidate list: confident forecasts (looked up in
//! a table keyed by the predicted pattern), recent features without tests,
//! and cause types with several strong correlations. Candidates are
//! deduplicated by normalized title, keeping the higher priority.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    CausalCorrelation, DecisionBasis, DecisionKind, DecisionRecord, DecisionStatus, Pattern, PatternType,
    PredictiveForecast, Priority,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub min_forecast_confidence: f64,
    pub strong_correlation: f64,
    /// Strong correlations sharing a cause needed for a grouped record
    pub min_group_size: usize,
    /// Trailing patterns inspected for untested features
    pub recent_patterns: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_forecast_confidence: 0.6,
            strong_correlation: 0.7,
            min_group_size: 2,
            recent_patterns: 20,
        }
    }
}

struct Template {
    title: &'static str,
    decision: &'static str,
    consequences: &'static [&'static str],
}

fn template(pattern: PatternType) -> Option<Template> {
    let template = match pattern {
        PatternType::Test => Template {
            title: "Add coverage tests",
            decision: "Write unit and integration tests before continuing work on new features.",
            consequences: &[
                "Fewer bugs reach production",
                "Refactors can be made with confidence",
                "Slightly longer initial development",
            ],
        },
        PatternType::Bugfix => Template {
            title: "Anticipate and prevent likely bugs",
            decision: "Run an in-depth code review and add regression tests before the next release.",
            consequences: &[
                "Bugs are caught earlier",
                "Shorter time to fix",
                "Higher review overhead",
            ],
        },
        PatternType::Refactor => Template {
            title: "Plan a code refactoring",
            decision: "Set aside time for a targeted refactoring of the affected modules, with tests before and after.",
            consequences: &[
                "More maintainable code",
                "Reduced technical debt",
                "Regression risk if done carelessly",
            ],
        },
        PatternType::Documentation => Template {
            title: "Improve documentation",
            decision: "Update technical documentation and code comments for recently changed modules.",
            consequences: &["Easier onboarding", "Simpler maintenance", "Time spent writing"],
        },
        PatternType::Performance => Template {
            title: "Optimize performance",
            decision: "Profile the system and optimize the identified hot spots.",
            consequences: &[
                "Better response times",
                "Possibly more complex code",
                "Requires benchmarks",
            ],
        },
        PatternType::Security => Template {
            title: "Strengthen security",
            decision: "Run a security audit and apply the required fixes immediately.",
            consequences: &[
                "Fewer vulnerabilities",
                "Improved compliance",
                "Development time impacted",
            ],
        },
        PatternType::Feature | PatternType::Dependency | PatternType::Other => return None,
    };
    Some(template)
}

fn forecast_priority(pattern: PatternType, confidence: f64) -> Priority {
    match pattern {
        PatternType::Test if confidence > 0.7 => Priority::High,
        PatternType::Bugfix if confidence > 0.6 => Priority::High,
        PatternType::Documentation => Priority::Low,
        PatternType::Security => Priority::Critical,
        _ => Priority::Medium,
    }
}

pub struct DecisionGenerator {
    config: DecisionConfig,
}

impl DecisionGenerator {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn generate(
        &self,
        forecasts: &[PredictiveForecast],
        correlations: &[CausalCorrelation],
        patterns: &[Pattern],
    ) -> Vec<DecisionRecord> {
        let mut candidates: Vec<DecisionRecord> = forecasts
            .iter()
            .filter(|f| f.confidence >= self.config.min_forecast_confidence)
            .filter_map(from_forecast)
            .collect();
        candidates.extend(self.untested_features(patterns));
        candidates.extend(self.cause_groups(correlations));

        let total = candidates.len();
        let decisions = deduplicate(candidates);
        debug!(candidates = total, decisions = decisions.len(), "Decision records generated");
        decisions
    }

    fn untested_features(&self, patterns: &[Pattern]) -> Option<DecisionRecord> {
        let recent = &patterns[patterns.len().saturating_sub(self.config.recent_patterns)..];
        let has_features = recent.iter().any(|p| p.pattern_type == PatternType::Feature);
        let has_tests = recent.iter().any(|p| p.pattern_type == PatternType::Test);
        if !has_features || has_tests {
            return None;
        }

        let untested: Vec<String> = recent
            .iter()
            .filter(|p| p.pattern_type == PatternType::Feature)
            .map(|p| p.commit.clone())
            .collect();
        Some(record(
            "adr-pattern-notests".to_string(),
            "Require tests for new features",
            "Recent features were developed without accompanying tests.".to_string(),
            "Adopt a no-merge-without-tests policy for every new feature.",
            &["Better test coverage", "Bugs detected earlier", "Slightly longer development cycle"],
            format!("Brings {} untested feature change(s) under test", untested.len()),
            Priority::High,
            DecisionBasis {
                patterns: untested,
                ..Default::default()
            },
        ))
    }

    fn cause_groups(&self, correlations: &[CausalCorrelation]) -> Vec<DecisionRecord> {
        let mut order: Vec<PatternType> = Vec::new();
        let mut groups: HashMap<PatternType, Vec<&CausalCorrelation>> = HashMap::new();
        for correlation in correlations.iter().filter(|c| c.strength >= self.config.strong_correlation) {
            groups
                .entry(correlation.cause)
                .or_insert_with(|| {
                    order.push(correlation.cause);
                    Vec::new()
                })
                .push(correlation);
        }

        order
            .into_iter()
            .filter_map(|cause| {
                let group = groups.get(&cause)?;
                if group.len() < self.config.min_group_size {
                    return None;
                }
                let effects = group.iter().map(|c| c.effect.as_str()).collect::<Vec<_>>().join(", ");
                Some(record(
                    format!("adr-causal-{}", cause),
                    &format!("Manage impacts of {}", cause),
                    format!("Strong causal correlations detected: {} frequently leads to {}.", cause, effects),
                    &format!("When a {} change lands, plan the associated changes identified by the analysis.", cause),
                    &["Better planning", "Fewer surprises", "Requires team discipline"],
                    format!(
                        "Anticipates {} follow-up change type(s) after each {} change",
                        group.len(),
                        cause
                    ),
                    Priority::Medium,
                    DecisionBasis {
                        correlations: group.iter().map(|c| c.id.clone()).collect(),
                        ..Default::default()
                    },
                ))
            })
            .collect()
    }
}

impl Default for DecisionGenerator {
    fn default() -> Self {
        Self::new(DecisionConfig::default())
    }
}

fn from_forecast(forecast: &PredictiveForecast) -> Option<DecisionRecord> {
    let template = template(forecast.predicted)?;
    let context = format!(
        "Prediction: {} expected within {} commits ({:.0}% confidence). {}",
        forecast.predicted,
        forecast.horizon,
        forecast.confidence * 100.0,
        forecast.reasoning.hypothesis
    );
    let improvement = format!(
        "Acting now addresses a {:.0}% likely {} change",
        forecast.confidence * 100.0,
        forecast.predicted
    );
    Some(record(
        format!("adr-forecast-{}", forecast.id),
        template.title,
        context,
        template.decision,
        template.consequences,
        improvement,
        forecast_priority(forecast.predicted, forecast.confidence),
        DecisionBasis {
            forecasts: vec![forecast.id.clone()],
            correlations: forecast.reasoning.based_on.clone(),
            ..Default::default()
        },
    ))
}

fn record(
    id: String,
    title: &str,
    context: String,
    decision: &str,
    consequences: &[&str],
    estimated_improvement: String,
    priority: Priority,
    based_on: DecisionBasis,
) -> DecisionRecord {
    DecisionRecord {
        id,
        kind: DecisionKind::Adr,
        title: title.to_string(),
        context,
        decision: decision.to_string(),
        consequences: consequences.join("; "),
        estimated_improvement: Some(estimated_improvement),
        priority,
        status: DecisionStatus::Proposed,
        based_on,
        observation: None,
        timestamp: Utc::now(),
    }
}

/// Keeps the highest-priority record per normalized title (first one on a
/// tie) and orders the survivors by descending priority.
pub fn deduplicate(candidates: Vec<DecisionRecord>) -> Vec<DecisionRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut unique: HashMap<String, DecisionRecord> = HashMap::new();

    for candidate in candidates {
        let key = candidate.normalized_title();
        match unique.get(&key) {
            Some(existing) if existing.priority.score() >= candidate.priority.score() => {}
            Some(_) => {
                unique.insert(key, candidate);
            }
            None => {
                order.push(key.clone());
                unique.insert(key, candidate);
            }
        }
    }

    let mut decisions: Vec<DecisionRecord> = order.into_iter().filter_map(|k| unique.remove(&k)).collect();
    decisions.sort_by(|a, b| b.priority.score().cmp(&a.priority.score()));
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangeEvent, ReasoningEntry};

    fn forecast(predicted: PatternType, confidence: f64) -> PredictiveForecast {
        let reasoning = ReasoningEntry::new(
            format!("If refactor is present, {} should follow", predicted),
            vec![format!("refactor→{}", predicted)],
            predicted,
            confidence,
        );
        PredictiveForecast::new(predicted, vec![PatternType::Refactor], confidence, 2, reasoning)
    }

    fn pattern(pattern_type: PatternType, commit: &str) -> Pattern {
        let event = ChangeEvent {
            hash: commit.to_string(),
            message: String::new(),
            author: String::new(),
            timestamp: Utc::now(),
            files: vec![],
        };
        Pattern::new(pattern_type, 0.8, &event, "r", &[])
    }

    #[test]
    fn test_dedup_keeps_higher_priority() {
        let low = record(
            "a".into(),
            "Improve   Documentation",
            String::new(),
            "",
            &[],
            String::new(),
            Priority::Low,
            DecisionBasis::default(),
        );
        let high = record(
            "b".into(),
            "improve documentation",
            String::new(),
            "",
            &[],
            String::new(),
            Priority::High,
            DecisionBasis::default(),
        );

        let decisions = deduplicate(vec![low, high]);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].id, "b");
    }

    #[test]
    fn test_forecast_table_and_threshold() {
        let generator = DecisionGenerator::default();
        let forecasts = vec![
            forecast(PatternType::Security, 0.65),
            forecast(PatternType::Test, 0.75),
            forecast(PatternType::Documentation, 0.59),
            forecast(PatternType::Feature, 0.9),
        ];

        let decisions = generator.generate(&forecasts, &[], &[]);
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].priority, Priority::Critical);
        assert_eq!(decisions[0].title, "Strengthen security");
        assert_eq!(decisions[1].priority, Priority::High);
        assert_eq!(decisions[1].based_on.forecasts, vec![forecasts[1].id.clone()]);
        assert_eq!(decisions[1].based_on.correlations, vec!["refactor→test".to_string()]);
    }

    #[test]
    fn test_untested_features_in_recent_window() {
        let generator = DecisionGenerator::default();
        let patterns = vec![pattern(PatternType::Feature, "c1"), pattern(PatternType::Bugfix, "c2")];

        let decisions = generator.generate(&[], &[], &patterns);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].id, "adr-pattern-notests");
        assert_eq!(decisions[0].based_on.patterns, vec!["c1".to_string()]);

        // An older test outside the trailing window does not count
        let mut patterns = vec![pattern(PatternType::Test, "old")];
        patterns.extend((0..20).map(|i| pattern(PatternType::Feature, &format!("f{}", i))));
        assert_eq!(generator.generate(&[], &[], &patterns).len(), 1);

        let covered = vec![pattern(PatternType::Feature, "c1"), pattern(PatternType::Test, "c2")];
        assert!(generator.generate(&[], &[], &covered).is_empty());
    }

    #[test]
    fn test_cause_groups_need_two_strong_correlations() {
        use PatternType::*;
        let generator = DecisionGenerator::default();
        let correlations = vec![
            CausalCorrelation::new(Refactor, Test, 0.8, 1.0, 5, 0.7),
            CausalCorrelation::new(Refactor, Bugfix, 0.75, 2.0, 5, 0.7),
            CausalCorrelation::new(Feature, Test, 0.9, 1.0, 5, 0.7),
            CausalCorrelation::new(Feature, Bugfix, 0.5, 1.0, 5, 0.7),
        ];

        let decisions = generator.generate(&[], &correlations, &[]);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].title, "Manage impacts of refactor");
        assert_eq!(
            decisions[0].based_on.correlations,
            vec!["refactor→test".to_string(), "refactor→bugfix".to_string()]
        );
    }

    #[test]
    fn test_every_generated_record_estimates_improvement() {
        use PatternType::*;
        let generator = DecisionGenerator::default();
        let forecasts = vec![forecast(Bugfix, 0.8)];
        let correlations = vec![
            CausalCorrelation::new(Refactor, Test, 0.8, 1.0, 5, 0.7),
            CausalCorrelation::new(Refactor, Bugfix, 0.75, 2.0, 5, 0.7),
        ];
        let patterns = vec![pattern(Feature, "c1"), pattern(Feature, "c2")];

        let decisions = generator.generate(&forecasts, &correlations, &patterns);
        assert_eq!(decisions.len(), 3);
        for decision in &decisions {
            assert_eq!(decision.kind, DecisionKind::Adr);
            assert!(decision.observation.is_none());
            assert!(decision.estimated_improvement.is_some(), "{} has no estimate", decision.id);
        }

        let untested = decisions.iter().find(|d| d.id == "adr-pattern-notests").unwrap();
        assert_eq!(
            untested.estimated_improvement.as_deref(),
            Some("Brings 2 untested feature change(s) under test")
        );
        let grouped = decisions.iter().find(|d| d.id == "adr-causal-refactor").unwrap();
        assert_eq!(
            grouped.estimated_improvement.as_deref(),
            Some("Anticipates 2 follow-up change type(s) after each refactor change")
        );
    }
}
