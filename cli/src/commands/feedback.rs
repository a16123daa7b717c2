// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `causeway feedback` - cycle metrics and meta decision records

use std::path::PathBuf;

use anyhow::Result;
use causeway_cortex::application::{CycleMetrics, Severity};
use causeway_cortex::Priority;
use causeway_core::{CausewayConfig, FeedbackOutcome, FeedbackStep};
use clap::{Args, ValueEnum};
use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MinSeverity {
    Low,
    Medium,
    High,
}

impl From<MinSeverity> for Severity {
    fn from(value: MinSeverity) -> Self {
        match value {
            MinSeverity::Low => Severity::Low,
            MinSeverity::Medium => Severity::Medium,
            MinSeverity::High => Severity::High,
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct FeedbackArgs {
    /// Skip insights below this severity (defaults to the configured value)
    #[arg(long, value_enum)]
    pub min_severity: Option<MinSeverity>,
}

pub async fn handle(args: FeedbackArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = CausewayConfig::load_or_default(config_path)?;
    if let Some(min_severity) = args.min_severity {
        config.maintenance.feedback_min_severity = min_severity.into();
    }
    config.validate()?;

    let outcome = FeedbackStep::from_config(&config).evaluate().await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &FeedbackOutcome) {
    println!("{}", "Cycle metrics".bold());
    print_metrics(&outcome.report.global, "  ");
    for (repo, metrics) in &outcome.report.by_repo {
        println!("  {}", repo.bold());
        print_metrics(metrics, "    ");
    }

    if outcome.meta_decisions.is_empty() {
        println!("{}", "✓ All metrics within thresholds".green());
        return;
    }

    println!();
    println!("{} ({})", "Meta decision records".bold(), outcome.meta_decisions.len());
    for decision in &outcome.meta_decisions {
        let label = format!("[{:?}]", decision.priority).to_uppercase();
        let label = match decision.priority {
            Priority::Critical | Priority::High => label.red(),
            Priority::Medium => label.yellow(),
            Priority::Low => label.green(),
        };
        println!("  {} {}", label, decision.title);
        if let Some(observation) = &decision.observation {
            println!(
                "      {} = {:.3} (threshold {:.3}) in {}",
                observation.metric,
                observation.observed,
                observation.threshold,
                observation.repos_affected.join(", ")
            );
        }
        if let Some(improvement) = &decision.estimated_improvement {
            println!("      {}", improvement);
        }
    }
}

fn print_metrics(metrics: &CycleMetrics, indent: &str) {
    println!("{}Pattern density:   {:.3}", indent, metrics.pattern_density);
    println!("{}Correlation rate:  {:.3}", indent, metrics.correlation_rate);
    println!("{}Forecast accuracy: {:.3}", indent, metrics.forecast_accuracy);
    println!("{}ADR usefulness:    {:.3}", indent, metrics.adr_usefulness);
    println!("{}Cycle time:        {:.0}ms", indent, metrics.cycle_time_ms);
    println!("{}Entropy:           {:.3} bits", indent, metrics.entropy);
    println!(
        "{}Cycles / events:   {} / {}",
        indent, metrics.total_cycles, metrics.total_events
    );
}
