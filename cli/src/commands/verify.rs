// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `causeway verify` - check every hash chain in the ledger

use std::path::PathBuf;

use anyhow::{Context, Result};
use causeway_cortex::ledger::read_ledger;
use causeway_cortex::{artifacts, ArtifactStore, ChainVerifier, CycleRecord};
use causeway_core::CausewayConfig;
use clap::Args;
use colored::Colorize;

#[derive(Debug, Clone, Default, Args)]
pub struct VerifyArgs {
    /// Ledger file to verify (defaults to the configured output directory)
    #[arg(long, value_name = "FILE")]
    pub ledger: Option<PathBuf>,
}

pub async fn handle(args: VerifyArgs, config_path: Option<PathBuf>) -> Result<()> {
    let path = match args.ledger {
        Some(path) => path,
        None => {
            let config = CausewayConfig::load_or_default(config_path)?;
            ArtifactStore::new(&config.paths.output_dir).resolve(artifacts::LEDGER)
        }
    };

    let records: Vec<CycleRecord> = read_ledger(&path, true)
        .await
        .with_context(|| format!("Failed to read ledger {}", path.display()))?;
    if records.is_empty() {
        println!("{}", format!("Ledger {} is empty", path.display()).yellow());
        return Ok(());
    }

    let results = ChainVerifier::verify_ledger(&records);
    let mut invalid = 0;
    for (chain_id, result) in &results {
        let repo = records
            .iter()
            .find(|r| r.metadata.chain_id == *chain_id)
            .map(|r| r.metadata.repo.as_str())
            .unwrap_or("?");
        if result.valid {
            println!("{} {} ({}): {} cycles", "✓".green(), chain_id, repo, result.total_entries);
        } else {
            invalid += 1;
            println!(
                "{} {} ({}): {}",
                "✗".red(),
                chain_id,
                repo,
                result.error_message.as_deref().unwrap_or("invalid chain")
            );
        }
    }

    println!();
    println!("{} records, {} chains, {} invalid", records.len(), results.len(), invalid);
    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}
