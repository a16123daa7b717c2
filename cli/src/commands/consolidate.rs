// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `causeway consolidate` - rebuild the cognitive state from the ledger and artifacts

use std::path::PathBuf;

use anyhow::Result;
use causeway_cortex::application::{CognitiveKernel, CognitiveState};
use causeway_cortex::{ArtifactStore, EventBus};
use causeway_core::CausewayConfig;
use colored::Colorize;

pub async fn handle(config_path: Option<PathBuf>) -> Result<()> {
    let config = CausewayConfig::load_or_default(config_path)?;
    config.validate()?;

    let kernel = CognitiveKernel::new(
        config.thresholds.kernel(),
        config.thresholds.consolidation.clone(),
        ArtifactStore::new(&config.paths.output_dir),
        EventBus::with_default_capacity(),
    );
    let state = kernel.consolidate().await?;
    print_state(&state);
    Ok(())
}

fn print_state(state: &CognitiveState) {
    println!("{}", "Cognitive state".bold());
    println!("  Coherence:          {:.3}", state.coherence_score);
    println!("  Forecast precision: {:.3}", state.forecast_precision);
    println!("  Universal rules:    {}", state.universals);
    println!("  Avg correlation:    {:.3}", state.avg_correlation_strength);
    println!("  Reasoning depth:    {}", state.reasoning_depth);
    println!(
        "  Repos / cycles:     {} / {}",
        state.metrics.total_repos, state.metrics.total_cycles
    );
    if state.goal_reached {
        println!("{}", "✓ Cognitive goals reached".green());
    } else {
        println!("{}", "Cognitive goals not yet reached".yellow());
    }
}
