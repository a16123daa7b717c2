// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Causeway orchestrator core
//!
//! Drives the cortex cycle runner over a fleet of repositories.
//!
//! # Architecture
//!
//! - **Layer:** Orchestration Layer
//! - **Purpose:** Configuration, corpus access, batch training and ledger maintenance

pub mod batch;
pub mod config;
pub mod events;
pub mod maintenance;
pub mod pipeline;

pub use batch::{BatchSummary, BatchTrainer, RepoResult};
pub use config::{CausewayConfig, ConfigError};
pub use events::{load_repo_list, repo_name, CommandReplayer, EventSource, HistoryReplayer, ReplayOutcome};
pub use maintenance::{
    ArchiveRotator, CompactedState, ConsolidationStep, FeedbackOutcome, FeedbackStep, LedgerCompactor,
    MaintenanceStep,
};
pub use pipeline::{KernelPipeline, RepoStats, RepositoryPipeline};
