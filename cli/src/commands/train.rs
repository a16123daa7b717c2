// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `causeway train` - batch training over the repository list

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use causeway_cortex::application::CognitiveKernel;
use causeway_cortex::{artifacts, AppendOnlyWriter, ArtifactStore, EventBus};
use causeway_core::{
    load_repo_list, ArchiveRotator, BatchSummary, BatchTrainer, CausewayConfig, ConsolidationStep, FeedbackStep,
    KernelPipeline, LedgerCompactor,
};
use clap::Args;
use colored::Colorize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Args)]
pub struct TrainArgs {
    /// Only train the first N repositories of the list
    #[arg(long)]
    pub max_repos: Option<usize>,

    /// Repositories trained in parallel
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Reuse histories already present in the corpus
    #[arg(long)]
    pub skip_replay: bool,

    /// Repository list (overrides paths.repo_list)
    #[arg(long, value_name = "FILE")]
    pub repo_list: Option<PathBuf>,
}

impl TrainArgs {
    fn apply(&self, config: &mut CausewayConfig) {
        if let Some(max_repos) = self.max_repos {
            config.batch.max_repos = Some(max_repos);
        }
        if let Some(concurrency) = self.concurrency {
            config.batch.concurrency = concurrency;
        }
        if self.skip_replay {
            config.batch.skip_replay = true;
        }
        if let Some(path) = &self.repo_list {
            config.paths.repo_list = path.clone();
        }
    }
}

pub async fn handle(args: TrainArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = CausewayConfig::load_or_default(config_path)?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let mut repos = load_repo_list(&config.paths.repo_list).await?;
    if let Some(max) = config.batch.max_repos {
        repos.truncate(max);
    }
    if repos.is_empty() {
        println!("{}", "No repositories to train".yellow());
        return Ok(());
    }

    info!(
        repos = repos.len(),
        concurrency = config.batch.concurrency,
        skip_replay = config.batch.skip_replay,
        "Starting batch training"
    );

    let event_bus = EventBus::with_default_capacity();
    let store = ArtifactStore::new(&config.paths.output_dir);
    let ledger = Arc::new(
        AppendOnlyWriter::new(store.resolve(artifacts::LEDGER), config.ledger_config())
            .with_event_bus(event_bus.clone()),
    );
    let _flush_timer = ledger.spawn_flush_timer();

    let trainer = build_trainer(&config, ledger.clone(), event_bus);

    let summary = tokio::select! {
        summary = trainer.run_all(repos) => summary,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing ledger");
            if let Err(e) = ledger.close().await {
                warn!("Failed to close ledger: {}", e);
            }
            println!("{}", "Training interrupted".yellow());
            std::process::exit(130);
        }
    };

    print_summary(&summary);

    if summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

fn build_trainer(config: &CausewayConfig, ledger: Arc<AppendOnlyWriter>, event_bus: EventBus) -> BatchTrainer {
    let pipeline = KernelPipeline::from_config(config, ledger.clone(), event_bus.clone());
    let mut trainer = BatchTrainer::new(Arc::new(pipeline), config.batch.concurrency)
        .with_ledger(ledger)
        .with_summary_dir(&config.paths.output_dir);

    if config.maintenance.consolidate {
        let kernel = CognitiveKernel::new(
            config.thresholds.kernel(),
            config.thresholds.consolidation.clone(),
            ArtifactStore::new(&config.paths.output_dir),
            event_bus,
        );
        trainer = trainer.with_maintenance(Arc::new(ConsolidationStep::new(kernel)));
    }
    if config.maintenance.feedback {
        trainer = trainer.with_maintenance(Arc::new(FeedbackStep::from_config(config)));
    }
    if config.maintenance.compact {
        trainer = trainer.with_maintenance(Arc::new(LedgerCompactor::from_config(config)));
    }
    if config.maintenance.archive {
        trainer = trainer.with_maintenance(Arc::new(ArchiveRotator::from_config(config)));
    }
    trainer
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!("{}", "=".repeat(60));
    println!("{}", "BATCH TRAINING SUMMARY".bold());
    println!("{}", "=".repeat(60));
    println!("Total repositories: {}", summary.total_repos);
    println!("Successful:         {}", summary.successful.to_string().green());
    if summary.failed > 0 {
        println!("Failed:             {}", summary.failed.to_string().red());
    } else {
        println!("Failed:             {}", summary.failed);
    }
    println!("Duration:           {:.1}s", summary.total_duration_ms as f64 / 1000.0);

    let failures: Vec<_> = summary.results.iter().filter(|r| !r.success).collect();
    if !failures.is_empty() {
        println!();
        println!("{}", "Failed repositories:".red().bold());
        for result in failures {
            println!(
                "  {} {}: {}",
                "✗".red(),
                result.repo,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!("{}", "=".repeat(60));
}
