// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the causeway CLI

pub mod compact;
pub mod config;
pub mod consolidate;
pub mod feedback;
pub mod train;
pub mod verify;

pub use self::config::ConfigCommand;
pub use self::feedback::FeedbackArgs;
pub use self::train::TrainArgs;
pub use self::verify::VerifyArgs;
