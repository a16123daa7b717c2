// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pattern sequences and per-repository causal timelines

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pattern::{AstSummary, PatternType};

/// Builds the `>`-joined key used as a sequence id.
pub fn sequence_key(patterns: &[PatternType]) -> String {
    patterns
        .iter()
        .map(PatternType::as_str)
        .collect::<Vec<_>>()
        .join(">")
}

/// Ordered, deduplicated pattern list observed inside one analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSequence {
    pub id: String,
    pub sequence: Vec<PatternType>,
    /// Relative positions (commit index) of the window the sequence came from
    pub timeline: Vec<u64>,
    /// Number of distinct repositories the sequence was observed in
    pub frequency: u32,
    pub repos: Vec<String>,
    pub confidence: f64,
    pub avg_lag: f64,
}

impl PatternSequence {
    pub fn new(sequence: Vec<PatternType>, timeline: Vec<u64>, repo: &str) -> Self {
        let avg_lag = average_lag(&timeline);
        Self {
            id: sequence_key(&sequence),
            sequence,
            timeline,
            frequency: 1,
            repos: vec![repo.to_string()],
            confidence: 0.0,
            avg_lag,
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Registers an observation in `repo`; returns true when the repo was new.
    pub fn observe_repo(&mut self, repo: &str) -> bool {
        if self.repos.iter().any(|r| r == repo) {
            return false;
        }
        self.repos.push(repo.to_string());
        self.frequency = self.repos.len() as u32;
        true
    }
}

/// Mean distance between consecutive positions; 0 for fewer than two.
pub fn average_lag(positions: &[u64]) -> f64 {
    match (positions.first(), positions.last()) {
        (Some(first), Some(last)) if positions.len() > 1 => {
            last.saturating_sub(*first) as f64 / (positions.len() - 1) as f64
        }
        _ => 0.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub t: u64,
    pub patterns: Vec<PatternType>,
    pub ast: AstSummary,
    pub commit: String,
    pub timestamp: DateTime<Utc>,
}

/// Time-ordered view of one repository's classified history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalTimeline {
    pub repo: String,
    pub events: Vec<TimelineEvent>,
    pub total_commits: u64,
}

impl CausalTimeline {
    pub fn empty(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            events: Vec::new(),
            total_commits: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct pattern types seen in the `n` most recent events.
    pub fn recent_patterns(&self, n: usize) -> BTreeSet<PatternType> {
        self.recent_events(n)
            .iter()
            .flat_map(|e| e.patterns.iter().copied())
            .collect()
    }

    pub fn recent_events(&self, n: usize) -> &[TimelineEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }

    /// Count of each pattern type over the whole timeline
    pub fn pattern_count(&self, pattern: PatternType) -> usize {
        self.events
            .iter()
            .flat_map(|e| e.patterns.iter())
            .filter(|p| **p == pattern)
            .count()
    }

    pub fn total_patterns(&self) -> usize {
        self.events.iter().map(|e| e.patterns.len()).sum()
    }
}
