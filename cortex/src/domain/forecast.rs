// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Forecasts and the reflective reasoning log that backs them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pattern::PatternType;

/// Audit entry explaining why a forecast was made.
///
/// One entry exists per forecast candidate, including candidates that do
/// not make the final cut. The outcome fields are written exactly once, by
/// [`ReasoningEntry::resolve`] during confrontation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEntry {
    #[serde(default)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub hypothesis: String,
    pub based_on: Vec<String>,
    pub prediction: PatternType,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_outcome: Option<PatternType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_after: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning: Option<String>,
}

impl ReasoningEntry {
    pub fn new(hypothesis: String, based_on: Vec<String>, prediction: PatternType, confidence: f64) -> Self {
        Self {
            id: format!("reasoning-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            hypothesis,
            based_on,
            prediction,
            confidence,
            actual_outcome: None,
            was_correct: None,
            coherence_after: None,
            learning: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.was_correct.is_some()
    }

    /// Records the confrontation outcome. A second call is ignored.
    pub fn resolve(
        &mut self,
        actual_outcome: Option<PatternType>,
        was_correct: bool,
        coherence_after: Option<f64>,
        learning: String,
    ) {
        if self.is_resolved() {
            return;
        }
        self.actual_outcome = actual_outcome;
        self.was_correct = Some(was_correct);
        self.coherence_after = coherence_after;
        self.learning = Some(learning);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveForecast {
    pub id: String,
    pub predicted: PatternType,
    pub based_on: Vec<PatternType>,
    pub confidence: f64,
    /// Commits within which the prediction is expected to materialise
    pub horizon: u64,
    pub reasoning: ReasoningEntry,
    pub timestamp: DateTime<Utc>,
}

impl PredictiveForecast {
    pub fn new(
        predicted: PatternType,
        based_on: Vec<PatternType>,
        confidence: f64,
        horizon: u64,
        reasoning: ReasoningEntry,
    ) -> Self {
        Self {
            id: format!("forecast-{}", Uuid::new_v4()),
            predicted,
            based_on,
            confidence,
            horizon,
            reasoning,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PossibleFuture {
    pub sequence: Vec<PatternType>,
    pub probability: f64,
    pub chain_id: String,
}

/// Possible futures projected from the repository's current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub current_state: Vec<PatternType>,
    pub possible_futures: Vec<PossibleFuture>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub forecasts: Vec<PredictiveForecast>,
    pub trajectory: Trajectory,
    /// Every candidate's reasoning, in creation order
    pub reasoning: Vec<ReasoningEntry>,
    pub precision: f64,
    pub evaluated: usize,
    pub correct: usize,
}

impl ForecastReport {
    pub fn reasoning_entries(&self) -> impl Iterator<Item = &ReasoningEntry> {
        self.reasoning.iter()
    }
}
