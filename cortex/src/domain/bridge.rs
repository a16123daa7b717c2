// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Wire contract between native engines and external analytic bridges.
//!
//! A bridge receives one JSON request on stdin and answers with one JSON
//! response on stdout:
//!
//! ```json
//! {"success": true, "data": ..., "metadata": {"duration_ms": 12}, "error": null}
//! ```
//!
//! The `data` shape depends on [`BridgeKind`]; anything that does not
//! deserialize into the kind's payload type is a schema failure.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::pattern::PatternType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    /// Frequent sequence mining for ordinary timelines
    SequenceMining,
    /// Frequent sequence mining tuned for very long timelines
    LargeSequenceMining,
    CorrelationRefinement,
    ForecastEnrichment,
}

impl BridgeKind {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeKind::SequenceMining => "sequence_mining",
            BridgeKind::LargeSequenceMining => "large_sequence_mining",
            BridgeKind::CorrelationRefinement => "correlation_refinement",
            BridgeKind::ForecastEnrichment => "forecast_enrichment",
        }
    }
}

/// Request envelope. `payload` is flattened so each kind contributes its own
/// top-level field (`timeline`, `correlations` or `forecasts`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub repo: String,
    #[serde(flatten)]
    pub payload: Value,
    pub config: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeMetadata {
    pub duration_ms: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    pub metadata: BridgeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One frequent sequence returned by a mining bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinedSequence {
    pub sequence: Vec<PatternType>,
    pub frequency: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedCorrelation {
    pub cause: PatternType,
    pub effect: PatternType,
    #[serde(alias = "causal_score")]
    pub strength: f64,
    pub lag: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRefinementData {
    pub refined_correlations: Vec<RefinedCorrelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedForecast {
    pub predicted: PatternType,
    #[serde(alias = "likelihood")]
    pub confidence: f64,
    pub horizon: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEnrichmentData {
    pub enriched_forecasts: Vec<EnrichedForecast>,
}

/// Why a refinement attempt produced nothing usable
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("No bridge configured for {0}")]
    NotConfigured(&'static str),

    #[error("Failed to spawn bridge process: {0}")]
    Spawn(String),

    #[error("Bridge timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bridge exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("Bridge output is not valid JSON: {0}")]
    Parse(String),

    #[error("Bridge reported failure: {0}")]
    Rejected(String),

    #[error("Bridge response does not match schema: {0}")]
    Schema(String),

    #[error("Bridge I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RefineError {
    /// Whether the failure should be written to the bridge error log.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, RefineError::NotConfigured(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flattens_payload() {
        let request = BridgeRequest {
            repo: "r".into(),
            payload: serde_json::json!({"timeline": {"events": []}}),
            config: BTreeMap::from([("min_support".to_string(), serde_json::json!(0.3))]),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["repo"], "r");
        assert!(json["timeline"]["events"].is_array());
        assert_eq!(json["config"]["min_support"], 0.3);
    }

    #[test]
    fn test_refined_correlation_accepts_causal_score() {
        let data: CorrelationRefinementData = serde_json::from_value(serde_json::json!({
            "refined_correlations": [
                {"cause": "refactor", "effect": "test", "causal_score": 0.8, "lag": 2, "confidence": 0.7}
            ]
        }))
        .unwrap();
        assert_eq!(data.refined_correlations[0].strength, 0.8);
    }

    #[test]
    fn test_response_metadata_keeps_extra_fields() {
        let response: BridgeResponse = serde_json::from_str(
            r#"{"success": true, "data": [], "metadata": {"duration_ms": 4, "algorithm": "prefixspan"}}"#,
        )
        .unwrap();
        assert_eq!(response.metadata.duration_ms, 4.0);
        assert_eq!(response.metadata.extra["algorithm"], "prefixspan");
    }
}
