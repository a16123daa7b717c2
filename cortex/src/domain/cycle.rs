// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cycle Records & Hash Chain
//!
//! Every pipeline run produces one [`CycleRecord`]. Records emitted by the same
//! pipeline instance form a singly linked hash chain:
//!
//! ```text
//! hash(n) = sha256(canonical_json(record_n without `hash`, prev_hash = hash(n-1)))
//! ```
//!
//! The first record of a chain links to [`GENESIS_HASH`]. Canonical JSON is
//! `serde_json::Value` output, whose object keys serialize in sorted order.
//!
//! Storage is hash-agnostic: the ledger writer never looks at these fields.
//! [`HashChain`] seals records on the producer side and [`ChainVerifier`]
//! re-derives them from whatever was read back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Previous-hash sentinel of the first record in a chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub count: usize,
    pub items: Value,
}

impl PhaseOutput {
    pub fn from_items<T: Serialize>(items: &[T]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            count: items.len(),
            items: serde_json::to_value(items)?,
        })
    }

    pub fn from_single<T: Serialize>(item: &T, count: usize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            count,
            items: serde_json::to_value(item)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclePhases {
    pub patterns: PhaseOutput,
    pub sequences: PhaseOutput,
    pub timeline: PhaseOutput,
    pub correlations: PhaseOutput,
    pub chains: PhaseOutput,
    pub rules: PhaseOutput,
    pub forecasts: PhaseOutput,
    pub decisions: PhaseOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMetadata {
    pub repo: String,
    /// Identifies the pipeline instance whose chain this record belongs to
    pub chain_id: Uuid,
    pub duration_ms: u64,
    pub events_processed: usize,
    /// Forecast precision measured during the cycle
    pub precision: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    pub phases: CyclePhases,
    pub hash: String,
    pub prev_hash: String,
    pub metadata: CycleMetadata,
}

impl CycleRecord {
    /// Recomputes the digest over every field except `hash`.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        canonical_hash(value)
    }
}

/// SHA-256 over the canonical serialization of `value` with any top-level
/// `hash` key removed.
pub fn canonical_hash(mut value: Value) -> Result<String, serde_json::Error> {
    if let Value::Object(map) = &mut value {
        map.remove("hash");
    }
    let canonical = serde_json::to_string(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Producer-side state of one pipeline instance's chain.
#[derive(Debug)]
pub struct HashChain {
    chain_id: Uuid,
    last_hash: String,
    entry_count: u64,
}

impl HashChain {
    pub fn new() -> Self {
        Self {
            chain_id: Uuid::new_v4(),
            last_hash: GENESIS_HASH.to_string(),
            entry_count: 0,
        }
    }

    pub fn chain_id(&self) -> Uuid {
        self.chain_id
    }

    pub fn previous_hash(&self) -> &str {
        &self.last_hash
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Links, hashes and numbers a new record. The chain only advances
    /// when hashing succeeds.
    pub fn seal(
        &mut self,
        timestamp: DateTime<Utc>,
        phases: CyclePhases,
        mut metadata: CycleMetadata,
    ) -> Result<CycleRecord, serde_json::Error> {
        metadata.chain_id = self.chain_id;
        let mut record = CycleRecord {
            cycle_id: self.entry_count + 1,
            timestamp,
            phases,
            hash: String::new(),
            prev_hash: self.last_hash.clone(),
            metadata,
        };
        record.hash = record.compute_hash()?;

        self.last_hash = record.hash.clone();
        self.entry_count += 1;
        Ok(record)
    }
}

impl Default for HashChain {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerificationResult {
    pub valid: bool,
    pub total_entries: usize,
    pub verified_entries: usize,
    pub first_invalid_index: Option<usize>,
    pub error_message: Option<String>,
}

impl ChainVerificationResult {
    fn valid(total_entries: usize) -> Self {
        Self {
            valid: true,
            total_entries,
            verified_entries: total_entries,
            first_invalid_index: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TamperStatus {
    Intact,
    ContentTampered { computed_hash: String, stored_hash: String },
    Unhashable(String),
}

pub struct ChainVerifier;

impl ChainVerifier {
    pub fn detect_tampering(record: &CycleRecord) -> TamperStatus {
        match record.compute_hash() {
            Ok(computed) if computed == record.hash => TamperStatus::Intact,
            Ok(computed) => TamperStatus::ContentTampered {
                computed_hash: computed,
                stored_hash: record.hash.clone(),
            },
            Err(e) => TamperStatus::Unhashable(e.to_string()),
        }
    }

    /// Verifies one chain, in append order, starting from the genesis sentinel.
    pub fn verify_chain(records: &[CycleRecord]) -> ChainVerificationResult {
        let mut expected_prev = GENESIS_HASH.to_string();

        for (i, record) in records.iter().enumerate() {
            let failure = |message: String| ChainVerificationResult {
                valid: false,
                total_entries: records.len(),
                verified_entries: i,
                first_invalid_index: Some(i),
                error_message: Some(message),
            };

            if record.prev_hash != expected_prev {
                return failure(format!(
                    "cycle {} of {} has broken chain link (expected prev {}, got {})",
                    record.cycle_id, record.metadata.repo, expected_prev, record.prev_hash
                ));
            }

            match Self::detect_tampering(record) {
                TamperStatus::Intact => {}
                TamperStatus::ContentTampered { computed_hash, .. } => {
                    return failure(format!(
                        "cycle {} of {} has invalid hash (computed {})",
                        record.cycle_id, record.metadata.repo, computed_hash
                    ));
                }
                TamperStatus::Unhashable(e) => {
                    return failure(format!("cycle {} cannot be hashed: {}", record.cycle_id, e));
                }
            }

            expected_prev = record.hash.clone();
        }

        ChainVerificationResult::valid(records.len())
    }

    /// Splits interleaved ledger records by chain id, preserving append order,
    /// and verifies each chain independently.
    pub fn verify_ledger(records: &[CycleRecord]) -> Vec<(Uuid, ChainVerificationResult)> {
        let mut order: Vec<Uuid> = Vec::new();
        let mut chains: HashMap<Uuid, Vec<CycleRecord>> = HashMap::new();

        for record in records {
            let chain_id = record.metadata.chain_id;
            chains
                .entry(chain_id)
                .or_insert_with(|| {
                    order.push(chain_id);
                    Vec::new()
                })
                .push(record.clone());
        }

        order
            .into_iter()
            .map(|id| {
                let chain = chains.remove(&id).unwrap_or_default();
                (id, Self::verify_chain(&chain))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_phase() -> PhaseOutput {
        PhaseOutput { count: 0, items: Value::Array(vec![]) }
    }

    fn phases(count: usize) -> CyclePhases {
        CyclePhases {
            patterns: PhaseOutput { count, items: serde_json::json!([{"type": "feature", "confidence": 0.7}]) },
            sequences: empty_phase(),
            timeline: empty_phase(),
            correlations: empty_phase(),
            chains: empty_phase(),
            rules: empty_phase(),
            forecasts: empty_phase(),
            decisions: empty_phase(),
        }
    }

    fn metadata(repo: &str) -> CycleMetadata {
        CycleMetadata {
            repo: repo.to_string(),
            chain_id: Uuid::nil(),
            duration_ms: 12,
            events_processed: 40,
            precision: 0.25,
        }
    }

    fn build_chain(n: usize) -> Vec<CycleRecord> {
        let mut chain = HashChain::new();
        (0..n)
            .map(|i| chain.seal(Utc::now(), phases(i), metadata("repo-a")).unwrap())
            .collect()
    }

    #[test]
    fn test_chain_links_records() {
        let records = build_chain(5);

        assert_eq!(records[0].prev_hash, GENESIS_HASH);
        for i in 1..records.len() {
            assert_eq!(records[i].prev_hash, records[i - 1].hash);
            assert_eq!(records[i].cycle_id, records[i - 1].cycle_id + 1);
        }
        for record in &records {
            assert_eq!(record.compute_hash().unwrap(), record.hash);
            assert_eq!(record.hash.len(), 64);
        }

        let result = ChainVerifier::verify_chain(&records);
        assert!(result.valid);
        assert_eq!(result.verified_entries, 5);
    }

    #[test]
    fn test_mutation_invalidates_hash() {
        let mut records = build_chain(3);
        records[1].metadata.events_processed += 1;

        assert!(matches!(
            ChainVerifier::detect_tampering(&records[1]),
            TamperStatus::ContentTampered { .. }
        ));
        let result = ChainVerifier::verify_chain(&records);
        assert!(!result.valid);
        assert_eq!(result.first_invalid_index, Some(1));
    }

    #[test]
    fn test_payload_mutation_invalidates_hash() {
        let mut records = build_chain(2);
        records[0].phases.patterns.items = serde_json::json!([{"type": "bugfix", "confidence": 0.7}]);
        assert!(!ChainVerifier::verify_chain(&records).valid);
    }

    #[test]
    fn test_broken_link_detected() {
        let mut records = build_chain(3);
        records.remove(1);
        let result = ChainVerifier::verify_chain(&records);
        assert!(!result.valid);
        assert_eq!(result.first_invalid_index, Some(1));
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let records = build_chain(2);
        for record in &records {
            let line = serde_json::to_string(record).unwrap();
            let parsed: CycleRecord = serde_json::from_str(&line).unwrap();
            assert_eq!(parsed.compute_hash().unwrap(), record.hash);
        }
    }

    #[test]
    fn test_verify_ledger_separates_interleaved_chains() {
        let mut a = HashChain::new();
        let mut b = HashChain::new();
        let records = vec![
            a.seal(Utc::now(), phases(1), metadata("a")).unwrap(),
            b.seal(Utc::now(), phases(1), metadata("b")).unwrap(),
            a.seal(Utc::now(), phases(2), metadata("a")).unwrap(),
            b.seal(Utc::now(), phases(2), metadata("b")).unwrap(),
        ];

        let results = ChainVerifier::verify_ledger(&records);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.valid && r.total_entries == 2));
    }
}
