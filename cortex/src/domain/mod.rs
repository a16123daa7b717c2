// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model of the causal reasoning pipeline
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value types, hash chain and domain events

pub mod bridge;
pub mod correlation;
pub mod cycle;
pub mod decision;
pub mod events;
pub mod forecast;
pub mod pattern;
pub mod sequence;

pub use bridge::*;
pub use correlation::*;
pub use cycle::*;
pub use decision::*;
pub use events::*;
pub use forecast::*;
pub use pattern::*;
pub use sequence::*;
