// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Change events and the behavioral patterns classified from them.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value types shared by every analysis engine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

/// Behavioral category attached to a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Refactor,
    Bugfix,
    Feature,
    Test,
    Documentation,
    Performance,
    Security,
    Dependency,
    Other,
}

impl PatternType {
    pub const ALL: [PatternType; 9] = [
        PatternType::Refactor,
        PatternType::Bugfix,
        PatternType::Feature,
        PatternType::Test,
        PatternType::Documentation,
        PatternType::Performance,
        PatternType::Security,
        PatternType::Dependency,
        PatternType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Refactor => "refactor",
            PatternType::Bugfix => "bugfix",
            PatternType::Feature => "feature",
            PatternType::Test => "test",
            PatternType::Documentation => "documentation",
            PatternType::Performance => "performance",
            PatternType::Security => "security",
            PatternType::Dependency => "dependency",
            PatternType::Other => "other",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown pattern type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub status: FileStatus,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

/// One normalized commit from a repository history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub hash: String,
    pub message: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileChange>,
}

impl ChangeEvent {
    pub fn total_additions(&self) -> u64 {
        self.files.iter().map(|f| f.additions).sum()
    }

    pub fn total_deletions(&self) -> u64 {
        self.files.iter().map(|f| f.deletions).sum()
    }

    pub fn added_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Added)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AstFeatureKind {
    Function,
    Class,
    Dependency,
    Call,
}

/// A structural feature reported by the AST extractor for one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstFeature {
    pub commit: String,
    pub kind: AstFeatureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_tested: Option<bool>,
}

/// Per-commit structural summary carried on timeline events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstSummary {
    pub functions: u32,
    pub classes: u32,
    pub dependencies: u32,
    pub calls: u32,
    pub untested: u32,
}

impl AstSummary {
    pub fn from_features<'a>(features: impl IntoIterator<Item = &'a AstFeature>) -> Self {
        let mut summary = Self::default();
        for feature in features {
            match feature.kind {
                AstFeatureKind::Function => {
                    summary.functions += 1;
                    if feature.is_tested == Some(false) {
                        summary.untested += 1;
                    }
                }
                AstFeatureKind::Class => summary.classes += 1,
                AstFeatureKind::Dependency => summary.dependencies += 1,
                AstFeatureKind::Call => summary.calls += 1,
            }
        }
        summary
    }
}

/// A classified pattern. Immutable once produced by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    pub confidence: f64,
    pub commit: String,
    pub repo: String,
    pub indicators: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Pattern {
    pub fn new(
        pattern_type: PatternType,
        confidence: f64,
        event: &ChangeEvent,
        repo: &str,
        indicators: &[&str],
    ) -> Self {
        Self {
            id: PatternId::new(),
            pattern_type,
            confidence: confidence.clamp(0.0, 1.0),
            commit: event.hash.clone(),
            repo: repo.to_string(),
            indicators: indicators.iter().map(|s| s.to_string()).collect(),
            timestamp: event.timestamp,
        }
    }
}

/// An event together with the patterns found on it and its AST summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub event: ChangeEvent,
    pub patterns: Vec<Pattern>,
    pub ast: AstSummary,
}

impl ClassifiedEvent {
    pub fn pattern_types(&self) -> impl Iterator<Item = PatternType> + '_ {
        self.patterns.iter().map(|p| p.pattern_type)
    }
}
