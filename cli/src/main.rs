// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Causeway CLI
//!
//! Trains the causal reasoning kernel over a fleet of repositories and
//! maintains the resulting ledger.
//!
//! ## Usage
//!
//! ```bash
//! # Train over the configured repository list
//! causeway train --concurrency 8
//!
//! # Reuse histories already in the corpus
//! causeway train --skip-replay --max-repos 50
//!
//! # Ledger maintenance
//! causeway verify
//! causeway compact
//! causeway feedback --min-severity medium
//! causeway consolidate
//!
//! # Configuration
//! causeway config generate
//! causeway config validate
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use causeway_cli::commands::{self, ConfigCommand, FeedbackArgs, TrainArgs, VerifyArgs};
use causeway_cli::logging::{init_logging, LogFormat};

#[derive(Parser)]
#[command(name = "causeway")]
#[command(about = "Causal reasoning over repository histories", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, env = "CAUSEWAY_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "CAUSEWAY_LOG_LEVEL")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "CAUSEWAY_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay and train every repository in the list
    Train(TrainArgs),

    /// Rebuild the cognitive state from accumulated artifacts
    Consolidate,

    /// Summarize the ledger into kernel/state.json
    Compact,

    /// Measure the pipeline from its ledger and propose meta decision records
    Feedback(FeedbackArgs),

    /// Verify the hash chains stored in the ledger
    Verify(VerifyArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command {
        Commands::Train(args) => commands::train::handle(args, cli.config).await,
        Commands::Consolidate => commands::consolidate::handle(cli.config).await,
        Commands::Compact => commands::compact::handle(cli.config).await,
        Commands::Feedback(args) => commands::feedback::handle(args, cli.config).await,
        Commands::Verify(args) => commands::verify::handle(args, cli.config).await,
        Commands::Config(command) => commands::config::handle_command(command, cli.config).await,
    }
}
