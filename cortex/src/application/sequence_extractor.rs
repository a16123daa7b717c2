// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sequence Extractor
//!
//! Slides a fixed window over a repository's classified events. Inside each
//! window the pattern types are flattened in event order and deduplicated
//! (first occurrence wins); candidates shorter than `min_length` are dropped.
//! Each pattern keeps the commit position of its first occurrence, which is
//! what later lag measurements are taken from.
//!
//! ## Confidence
//!
//! ```text
//! length     = min(0.7, 0.3 + 0.1 * (len - 2))
//! recurrence = min(0.8, 0.2 + 0.1 * (repos - 1))
//! regularity = avg_lag > 0 ? max(0.5, 1 - avg_lag / 10) : 0.5
//! confidence = 0.3 * length + 0.4 * recurrence + 0.3 * regularity
//! ```
//!
//! Extraction is deterministic: the same events always yield the same ids,
//! confidences and ordering.
//!
//! A sequence-mining bridge may contribute extra sequences. Timelines longer
//! than `large_timeline_threshold` go to the large-input miner. Mined and
//! native sequences are merged by id, keeping the higher confidence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{
    clamp_unit, sequence_key, BridgeKind, BridgeRequest, CausalTimeline, ClassifiedEvent,
    KernelEvent, MinedSequence, PatternSequence, PatternType, TimelineEvent,
};
use crate::infrastructure::{BridgeAdapter, EventBus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub window_size: usize,
    pub min_length: usize,
    pub length_weight: f64,
    pub recurrence_weight: f64,
    pub regularity_weight: f64,
    /// Timelines with more events than this use the large-input miner
    pub large_timeline_threshold: usize,
    pub min_support: f64,
    pub min_confidence: f64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            min_length: 2,
            length_weight: 0.3,
            recurrence_weight: 0.4,
            regularity_weight: 0.3,
            large_timeline_threshold: 10_000,
            min_support: 0.3,
            min_confidence: 0.5,
        }
    }
}

/// Output of one repository's sequence analysis
#[derive(Debug, Clone)]
pub struct SequenceAnalysis {
    pub sequences: Vec<PatternSequence>,
    pub timeline: CausalTimeline,
    pub native: usize,
    pub mined: usize,
}

pub struct SequenceExtractor {
    config: SequenceConfig,
    bridges: BridgeAdapter,
    event_bus: EventBus,
}

impl SequenceExtractor {
    pub fn new(config: SequenceConfig, bridges: BridgeAdapter, event_bus: EventBus) -> Self {
        Self {
            config,
            bridges,
            event_bus,
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Timeline, native extraction, optional mining and merge.
    pub async fn analyze(&self, repo: &str, events: &[ClassifiedEvent]) -> SequenceAnalysis {
        let timeline = build_timeline(repo, events);
        let native = self.extract(repo, events);
        let mined = self.mine(repo, &timeline).await;
        let (native_count, mined_count) = (native.len(), mined.len());
        let sequences = self.merge(native, mined);

        info!(
            repo,
            native = native_count,
            mined = mined_count,
            merged = sequences.len(),
            timeline_events = timeline.len(),
            "Sequence extraction complete"
        );
        self.event_bus.publish(KernelEvent::SequencesExtracted {
            repo: repo.to_string(),
            native: native_count,
            mined: mined_count,
            merged: sequences.len(),
            timestamp: Utc::now(),
        });

        SequenceAnalysis {
            sequences,
            timeline,
            native: native_count,
            mined: mined_count,
        }
    }

    /// Native sliding-window extraction for one repository.
    pub fn extract(&self, repo: &str, events: &[ClassifiedEvent]) -> Vec<PatternSequence> {
        let window = self.config.window_size.max(1);
        let mut found: Vec<PatternSequence> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        // Histories shorter than a window are treated as one window
        let starts = if events.len() >= window {
            0..=events.len() - window
        } else if events.is_empty() {
            return Vec::new();
        } else {
            0..=0
        };

        for start in starts {
            let end = (start + window).min(events.len());
            let mut sequence: Vec<PatternType> = Vec::new();
            let mut positions: Vec<u64> = Vec::new();

            for (offset, event) in events[start..end].iter().enumerate() {
                for pattern in event.pattern_types() {
                    if !sequence.contains(&pattern) {
                        sequence.push(pattern);
                        positions.push((start + offset) as u64);
                    }
                }
            }

            if sequence.len() < self.config.min_length {
                continue;
            }

            let key = sequence_key(&sequence);
            match index.get(&key) {
                Some(&i) => {
                    found[i].observe_repo(repo);
                }
                None => {
                    index.insert(key, found.len());
                    found.push(PatternSequence::new(sequence, positions, repo));
                }
            }
        }

        for sequence in &mut found {
            sequence.confidence = self.score(sequence);
        }
        sort_sequences(&mut found);

        debug!(repo, windows = events.len(), sequences = found.len(), "Native sequences extracted");
        found
    }

    pub fn score(&self, sequence: &PatternSequence) -> f64 {
        let len = sequence.len() as f64;
        let repos = sequence.repos.len().max(1) as f64;

        let length = (0.3 + (len - 2.0) * 0.1).min(0.7);
        let recurrence = (0.2 + (repos - 1.0) * 0.1).min(0.8);
        let regularity = if sequence.avg_lag > 0.0 {
            (1.0 - sequence.avg_lag / 10.0).max(0.5)
        } else {
            0.5
        };

        clamp_unit(
            self.config.length_weight * length
                + self.config.recurrence_weight * recurrence
                + self.config.regularity_weight * regularity,
        )
    }

    /// Asks the mining bridge for frequent sequences. Empty on fallback.
    pub async fn mine(&self, repo: &str, timeline: &CausalTimeline) -> Vec<PatternSequence> {
        let kind = if timeline.len() > self.config.large_timeline_threshold {
            BridgeKind::LargeSequenceMining
        } else {
            BridgeKind::SequenceMining
        };
        if !self.bridges.is_configured(kind) {
            return Vec::new();
        }

        let request = BridgeRequest {
            repo: repo.to_string(),
            payload: serde_json::json!({ "timeline": timeline }),
            config: BTreeMap::from([
                ("min_support".to_string(), serde_json::json!(self.config.min_support)),
                ("min_confidence".to_string(), serde_json::json!(self.config.min_confidence)),
            ]),
        };

        let mined: Vec<MinedSequence> = self.bridges.refine(kind, &request).await.unwrap_or_default();
        mined
            .into_iter()
            .filter(|m| m.sequence.len() >= self.config.min_length)
            .map(|m| PatternSequence {
                id: sequence_key(&m.sequence),
                sequence: m.sequence,
                timeline: Vec::new(),
                frequency: m.frequency.max(1),
                repos: vec![repo.to_string()],
                confidence: clamp_unit(m.confidence),
                avg_lag: 1.0,
            })
            .collect()
    }

    /// Merges by id. A mined sequence only replaces the native confidence
    /// when it is higher; frequency keeps the larger value.
    pub fn merge(&self, native: Vec<PatternSequence>, mined: Vec<PatternSequence>) -> Vec<PatternSequence> {
        let mut merged: Vec<PatternSequence> = native;
        let mut index: HashMap<String, usize> = merged
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        for candidate in mined {
            match index.get(&candidate.id) {
                Some(&i) => {
                    let existing = &mut merged[i];
                    if candidate.confidence > existing.confidence {
                        existing.confidence = candidate.confidence;
                    }
                    existing.frequency = existing.frequency.max(candidate.frequency);
                }
                None => {
                    index.insert(candidate.id.clone(), merged.len());
                    merged.push(candidate);
                }
            }
        }

        sort_sequences(&mut merged);
        merged
    }

    /// Cross-repository consolidation of previously persisted sequences:
    /// repositories are unioned, frequency becomes the repository count, the
    /// average lag is averaged and confidence recomputed.
    pub fn consolidate(&self, records: &[PatternSequence]) -> Vec<PatternSequence> {
        struct Accumulator {
            sequence: PatternSequence,
            lag_sum: f64,
            observations: usize,
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Accumulator> = HashMap::new();

        for record in records {
            match groups.get_mut(&record.id) {
                Some(acc) => {
                    for repo in &record.repos {
                        acc.sequence.observe_repo(repo);
                    }
                    acc.lag_sum += record.avg_lag;
                    acc.observations += 1;
                }
                None => {
                    order.push(record.id.clone());
                    groups.insert(
                        record.id.clone(),
                        Accumulator {
                            sequence: record.clone(),
                            lag_sum: record.avg_lag,
                            observations: 1,
                        },
                    );
                }
            }
        }

        let mut consolidated: Vec<PatternSequence> = order
            .into_iter()
            .filter_map(|id| groups.remove(&id))
            .map(|acc| {
                let mut sequence = acc.sequence;
                sequence.repos.sort();
                sequence.frequency = sequence.repos.len() as u32;
                sequence.avg_lag = acc.lag_sum / acc.observations as f64;
                sequence.confidence = self.score(&sequence);
                sequence
            })
            .collect();
        sort_sequences(&mut consolidated);
        consolidated
    }
}

/// Builds the causal timeline; `t` is the event's index in the history.
pub fn build_timeline(repo: &str, events: &[ClassifiedEvent]) -> CausalTimeline {
    CausalTimeline {
        repo: repo.to_string(),
        events: events
            .iter()
            .enumerate()
            .map(|(t, e)| TimelineEvent {
                t: t as u64,
                patterns: e.pattern_types().collect(),
                ast: e.ast,
                commit: e.event.hash.clone(),
                timestamp: e.event.timestamp,
            })
            .collect(),
        total_commits: events.len() as u64,
    }
}

fn sort_sequences(sequences: &mut [PatternSequence]) {
    sequences.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
