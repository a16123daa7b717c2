// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the causal reasoning pipeline
//! Published to the EventBus for observability and integration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kernel domain events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    // Pipeline events

    /// A repository cycle began
    CycleStarted {
        repo: String,
        events: usize,
        timestamp: DateTime<Utc>,
    },

    /// Sequence extraction finished (native plus bridge-mined)
    SequencesExtracted {
        repo: String,
        native: usize,
        mined: usize,
        merged: usize,
        timestamp: DateTime<Utc>,
    },

    /// Correlation analysis finished
    CorrelationsDiscovered {
        repo: String,
        correlations: usize,
        chains: usize,
        rules: usize,
        refined: bool,
        timestamp: DateTime<Utc>,
    },

    /// Forecasts were generated and confronted
    ForecastsGenerated {
        repo: String,
        forecasts: usize,
        precision: f64,
        enriched: bool,
        timestamp: DateTime<Utc>,
    },

    /// Decision records were proposed
    DecisionsProposed {
        repo: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A cycle record was hashed and handed to the ledger
    CycleSealed {
        repo: String,
        cycle_id: u64,
        hash: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    // Infrastructure events

    /// A bridge call failed and native results were used
    BridgeFallback {
        bridge: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The ledger file reached its size limit and was rotated
    LedgerRotated {
        path: String,
        rotated_to: String,
        timestamp: DateTime<Utc>,
    },

    /// Cognitive state consolidation completed
    ConsolidationCompleted {
        coherence: f64,
        precision: f64,
        universal_rules: usize,
        timestamp: DateTime<Utc>,
    },
}

impl KernelEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            KernelEvent::CycleStarted { timestamp, .. } => *timestamp,
            KernelEvent::SequencesExtracted { timestamp, .. } => *timestamp,
            KernelEvent::CorrelationsDiscovered { timestamp, .. } => *timestamp,
            KernelEvent::ForecastsGenerated { timestamp, .. } => *timestamp,
            KernelEvent::DecisionsProposed { timestamp, .. } => *timestamp,
            KernelEvent::CycleSealed { timestamp, .. } => *timestamp,
            KernelEvent::BridgeFallback { timestamp, .. } => *timestamp,
            KernelEvent::LedgerRotated { timestamp, .. } => *timestamp,
            KernelEvent::ConsolidationCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            KernelEvent::CycleStarted { .. } => "cycle_started",
            KernelEvent::SequencesExtracted { .. } => "sequences_extracted",
            KernelEvent::CorrelationsDiscovered { .. } => "correlations_discovered",
            KernelEvent::ForecastsGenerated { .. } => "forecasts_generated",
            KernelEvent::DecisionsProposed { .. } => "decisions_proposed",
            KernelEvent::CycleSealed { .. } => "cycle_sealed",
            KernelEvent::BridgeFallback { .. } => "bridge_fallback",
            KernelEvent::LedgerRotated { .. } => "ledger_rotated",
            KernelEvent::ConsolidationCompleted { .. } => "consolidation_completed",
        }
    }
}
