// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Causeway cortex
//!
//! Mines classified change events into pattern sequences, derives causal
//! correlations and chains, forecasts the next patterns, proposes decision
//! records and seals every cycle into a hash-chained ledger.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Reasoning Layer
//! - **Purpose:** Per-repository analysis pipeline and its storage

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
pub use infrastructure::*;
