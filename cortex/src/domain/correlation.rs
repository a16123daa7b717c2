// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Causal correlations, chains and context-conditioned rules
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Output records of the correlation engine

use serde::{Deserialize, Serialize};

use super::pattern::PatternType;

pub fn correlation_id(cause: PatternType, effect: PatternType) -> String {
    format!("{}→{}", cause, effect)
}

/// Directed cause→effect relationship between two pattern types.
///
/// `strength` and `confidence` are always within [0, 1] and `samples` is at
/// least 1; constructors go through [`CausalCorrelation::new`] which clamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalCorrelation {
    pub id: String,
    pub cause: PatternType,
    pub effect: PatternType,
    pub strength: f64,
    /// Typical distance in commits between cause and effect
    pub lag: u64,
    pub samples: u64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RepoContext>,
}

impl CausalCorrelation {
    pub fn new(
        cause: PatternType,
        effect: PatternType,
        strength: f64,
        lag: f64,
        samples: u64,
        confidence: f64,
    ) -> Self {
        Self {
            id: correlation_id(cause, effect),
            cause,
            effect,
            strength: clamp_unit(strength),
            lag: if lag.is_finite() && lag > 0.0 { lag.round() as u64 } else { 0 },
            samples: samples.max(1),
            confidence: clamp_unit(confidence),
            context: None,
        }
    }

    /// Product used when ranking forecasts and measuring coherence
    pub fn weight(&self) -> f64 {
        self.strength * self.confidence
    }
}

/// Clamps to [0, 1]; NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub pattern: PatternType,
    pub position: u64,
}

/// Multi-step causal path derived from a sequence of length >= 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalChain {
    pub id: String,
    pub links: Vec<ChainLink>,
    pub strength: f64,
    pub avg_lag: f64,
    pub repos: Vec<String>,
    pub frequency: u32,
}

impl CausalChain {
    pub fn patterns(&self) -> impl Iterator<Item = PatternType> + '_ {
        self.links.iter().map(|l| l.pattern)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoKind {
    Library,
    Fullstack,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBucket {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityBucket {
    Low,
    Medium,
    High,
}

/// Behavioral profile of a repository, derived from its timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoContext {
    pub kind: RepoKind,
    pub size: SizeBucket,
    pub activity: ActivityBucket,
    pub has_tests: bool,
}

/// Partial predicate over a [`RepoContext`]; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RepoKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_tests: Option<bool>,
}

impl ContextCondition {
    pub fn matches(&self, context: &RepoContext) -> bool {
        self.kind.is_none_or(|k| k == context.kind)
            && self.size.is_none_or(|s| s == context.size)
            && self.activity.is_none_or(|a| a == context.activity)
            && self.has_tests.is_none_or(|t| t == context.has_tests)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualRule {
    pub id: String,
    pub rule: String,
    pub condition: ContextCondition,
    pub based_on: String,
    pub confidence: f64,
    pub examples: Vec<String>,
}

/// Result of one correlation analysis pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub correlations: Vec<CausalCorrelation>,
    pub chains: Vec<CausalChain>,
    pub rules: Vec<ContextualRule>,
}
