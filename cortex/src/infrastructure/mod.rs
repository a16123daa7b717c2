// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Ledger storage, artifact files, bridge processes and event bus

pub mod artifacts;
pub mod event_bus;
pub mod ledger;
pub mod refiner;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use ledger::{AppendOnlyWriter, LedgerConfig, LedgerError};
pub use refiner::{BridgeAdapter, BridgeCommand, NativeRefiner, ProcessRefiner, Refiner};
