// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pattern classification of single change events.
//!
//! Classification proper is an external concern; [`KeywordClassifier`] is the
//! default adapter so the pipeline can run on raw commit histories. It scores
//! each pattern type from commit-message keywords and touched paths and emits
//! every type whose score exceeds the threshold, or `other` when none does.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{AstFeature, AstSummary, ChangeEvent, ClassifiedEvent, Pattern, PatternType};

pub trait PatternClassifier: Send + Sync {
    fn classify(&self, repo: &str, event: &ChangeEvent) -> Vec<Pattern>;
}

static ISSUE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(fix|close|resolve)s?\s*#\d+").expect("Invalid issue reference regex")
});

static TEST_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\.(test|spec)\.(ts|js|tsx|jsx)$)|(__tests__/)|((^|/)tests?/)|(_test\.(go|py|rs)$)|((^|/)test_[^/]+\.py$)",
    )
    .expect("Invalid test path regex")
});

const REFACTOR_KEYWORDS: &[&str] = &["refactor", "restructure", "reorganize", "cleanup", "simplify", "improve", "optimize"];
const BUGFIX_KEYWORDS: &[&str] = &["fix", "bug", "issue", "error", "crash", "broken", "repair", "resolve", "patch"];
const FEATURE_KEYWORDS: &[&str] = &["add", "feature", "implement", "new", "create", "introduce"];
const TEST_KEYWORDS: &[&str] = &["test", "spec", "unit", "integration", "e2e"];
const DOC_KEYWORDS: &[&str] = &["doc", "documentation", "readme", "comment", "jsdoc"];
const PERFORMANCE_KEYWORDS: &[&str] = &["performance", "optimize", "speed", "faster", "cache", "efficiency", "benchmark"];
const SECURITY_KEYWORDS: &[&str] = &[
    "security", "vulnerability", "exploit", "cve", "auth", "authentication", "authorization", "xss",
    "sql injection",
];
const DEPENDENCY_KEYWORDS: &[&str] = &["dependency", "dependencies", "upgrade", "update", "bump", "package"];
const DOC_EXTENSIONS: &[&str] = &[".md", ".rst", ".txt", ".adoc"];
const MANIFEST_FILES: &[&str] = &[
    "package.json", "package-lock.json", "yarn.lock", "pom.xml", "requirements.txt", "Gemfile", "go.mod",
    "Cargo.toml", "Cargo.lock", "pyproject.toml",
];

fn mentions(message: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| message.contains(k))
}

pub struct KeywordClassifier {
    threshold: f64,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self { threshold: 0.5 }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn score(&self, pattern: PatternType, message: &str, event: &ChangeEvent) -> f64 {
        let paths = || event.files.iter().map(|f| f.path.as_str());
        let score: f64 = match pattern {
            PatternType::Refactor => {
                let mut score = if mentions(message, REFACTOR_KEYWORDS) { 0.3 } else { 0.0 };
                // Rewrites of existing files without net growth
                if !event.files.is_empty()
                    && event.added_files() == 0
                    && event.total_deletions() >= event.total_additions()
                    && event.total_deletions() > 0
                {
                    score += 0.3;
                }
                score
            }
            PatternType::Bugfix => {
                let mut score = if mentions(message, BUGFIX_KEYWORDS) { 0.4 } else { 0.0 };
                if ISSUE_REFERENCE.is_match(message) {
                    score += 0.3;
                }
                score
            }
            PatternType::Feature => {
                let mut score = if mentions(message, FEATURE_KEYWORDS) { 0.3 } else { 0.0 };
                if event.added_files() > 2 {
                    score += 0.2;
                }
                if event.total_additions() > 100 {
                    score += 0.2;
                }
                score
            }
            PatternType::Test => {
                let mut score = if mentions(message, TEST_KEYWORDS) { 0.3 } else { 0.0 };
                if paths().any(|p| TEST_PATH.is_match(p)) {
                    score += 0.4;
                }
                score
            }
            PatternType::Documentation => {
                let mut score = if mentions(message, DOC_KEYWORDS) { 0.3 } else { 0.0 };
                if paths().any(|p| DOC_EXTENSIONS.iter().any(|ext| p.ends_with(ext))) {
                    score += 0.4;
                }
                score
            }
            PatternType::Performance => {
                if mentions(message, PERFORMANCE_KEYWORDS) { 0.7 } else { 0.0 }
            }
            PatternType::Security => {
                if mentions(message, SECURITY_KEYWORDS) { 0.8 } else { 0.0 }
            }
            PatternType::Dependency => {
                let mut score = if mentions(message, DEPENDENCY_KEYWORDS) { 0.3 } else { 0.0 };
                let is_manifest = |p: &str| {
                    let name = p.rsplit('/').next().unwrap_or(p);
                    MANIFEST_FILES.contains(&name)
                };
                if paths().any(is_manifest) {
                    score += 0.4;
                }
                score
            }
            PatternType::Other => 0.0,
        };
        score.min(1.0)
    }

    fn indicators(pattern: PatternType) -> &'static [&'static str] {
        match pattern {
            PatternType::Refactor => &["commit message", "file patterns"],
            PatternType::Bugfix => &["commit message", "keywords"],
            PatternType::Feature => &["commit message", "file additions"],
            PatternType::Test => &["file paths", "test keywords"],
            PatternType::Documentation => &["file extensions", "keywords"],
            PatternType::Performance | PatternType::Security => &["commit message"],
            PatternType::Dependency => &["files", "message"],
            PatternType::Other => &["default"],
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternClassifier for KeywordClassifier {
    fn classify(&self, repo: &str, event: &ChangeEvent) -> Vec<Pattern> {
        let message = event.message.to_lowercase();

        let mut patterns: Vec<Pattern> = PatternType::ALL
            .iter()
            .copied()
            .filter(|t| *t != PatternType::Other)
            .filter_map(|t| {
                let score = self.score(t, &message, event);
                (score > self.threshold).then(|| Pattern::new(t, score, event, repo, Self::indicators(t)))
            })
            .collect();

        if patterns.is_empty() {
            patterns.push(Pattern::new(
                PatternType::Other,
                0.3,
                event,
                repo,
                Self::indicators(PatternType::Other),
            ));
        }
        patterns
    }
}

/// Classifies a whole history and attaches AST summaries by commit hash.
pub fn classify_events(
    classifier: &dyn PatternClassifier,
    repo: &str,
    events: &[ChangeEvent],
    ast_features: &[AstFeature],
) -> Vec<ClassifiedEvent> {
    let mut by_commit: HashMap<&str, Vec<&AstFeature>> = HashMap::new();
    for feature in ast_features {
        by_commit.entry(feature.commit.as_str()).or_default().push(feature);
    }

    events
        .iter()
        .map(|event| ClassifiedEvent {
            patterns: classifier.classify(repo, event),
            ast: by_commit
                .get(event.hash.as_str())
                .map(|features| AstSummary::from_features(features.iter().copied()))
                .unwrap_or_default(),
            event: event.clone(),
        })
        .collect()
}
