// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prioritized recommendation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn score(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Proposed,
    Accepted,
    Rejected,
    Implemented,
}

/// What a record recommends changes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// The analysed repository
    #[default]
    Adr,
    /// The reasoning pipeline itself, derived from its own cycle metrics
    MetaAdr,
}

/// Metric reading behind a meta decision record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub metric: String,
    pub observed: f64,
    pub threshold: f64,
    /// Repositories the reading covers; `global` for the whole ledger
    pub repos_affected: Vec<String>,
}

/// Ids of the records a decision was derived from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionBasis {
    #[serde(default)]
    pub forecasts: Vec<String>,
    #[serde(default)]
    pub correlations: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    #[serde(default)]
    pub kind: DecisionKind,
    pub title: String,
    pub context: String,
    pub decision: String,
    pub consequences: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_improvement: Option<String>,
    pub priority: Priority,
    pub status: DecisionStatus,
    pub based_on: DecisionBasis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<MetricObservation>,
    pub timestamp: DateTime<Utc>,
}

impl DecisionRecord {
    /// Dedup key: lowercase title with whitespace runs collapsed to `-`.
    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }
}

pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
