// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `causeway compact` - summarize the ledger into `kernel/state.json`

use std::path::PathBuf;

use anyhow::Result;
use causeway_core::{CausewayConfig, LedgerCompactor};
use colored::Colorize;

pub async fn handle(config_path: Option<PathBuf>) -> Result<()> {
    let config = CausewayConfig::load_or_default(config_path)?;
    config.validate()?;

    let state = LedgerCompactor::from_config(&config).compact().await?;

    println!("{}", "✓ Ledger compacted".green());
    println!("  Repositories: {}", state.total_repos);
    println!("  Cycles:       {}", state.total_cycles);
    println!("  Patterns:     {}", state.patterns.len());
    println!("  Decisions:    {}", state.decisions.len());
    println!("  Digest:       {}", state.digest);
    for pattern in state.patterns.iter().take(5) {
        println!(
            "    {:<24} {:>6}  ({:.2}/cycle)",
            pattern.pattern_type, pattern.frequency, pattern.confidence
        );
    }
    Ok(())
}
