// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Analysis engines and the cycle runner that chains them

pub mod classifier;
pub mod consolidation;
pub mod correlation_engine;
pub mod cycle_metrics;
pub mod decision_generator;
pub mod feedback;
pub mod forecast_engine;
pub mod kernel;
pub mod sequence_extractor;

pub use classifier::{classify_events, KeywordClassifier, PatternClassifier};
pub use consolidation::{CognitiveKernel, CognitiveMetrics, CognitiveState, ConsolidationConfig, UniversalRule};
pub use correlation_engine::{CorrelationConfig, CorrelationEngine};
pub use cycle_metrics::{CycleMetrics, MetricKind, MetricsInsight, MetricsReport, MetricsThresholds, Severity};
pub use decision_generator::{DecisionConfig, DecisionGenerator};
pub use feedback::{FeedbackConfig, FeedbackEngine};
pub use forecast_engine::{ForecastConfig, ForecastEngine, ForecastMetrics};
pub use kernel::{CycleOutcome, CycleRunner, KernelConfig, KernelError};
pub use sequence_extractor::{SequenceAnalysis, SequenceConfig, SequenceExtractor};
