// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use causeway_core::CausewayConfig;
use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show which config file would be used
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (uses discovery if not provided)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write a configuration file populated with the defaults
    Generate {
        /// Output path
        #[arg(short, long, default_value = "causeway.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_path, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_path)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_path: Option<PathBuf>, paths: bool) -> Result<()> {
    if paths {
        match config_path.clone().or_else(CausewayConfig::discover_config) {
            Some(path) => println!("Config file: {}", path.display()),
            None => println!("Config file: {}", "none (using defaults)".yellow()),
        }
        return Ok(());
    }

    let config = CausewayConfig::load_or_default(config_path)?;
    let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
    println!("{}", yaml);
    Ok(())
}

fn validate(path: Option<PathBuf>) -> Result<()> {
    let config = CausewayConfig::load_or_default(path)?;
    config.validate()?;
    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    CausewayConfig::default().to_yaml_file(&output)?;
    println!("{} {}", "✓ Configuration written to".green(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_writes_loadable_config() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("causeway.yaml");

        generate(output.clone(), false).unwrap();
        let loaded = CausewayConfig::from_yaml_file(&output).unwrap();
        assert_eq!(loaded, CausewayConfig::default());
    }

    #[test]
    fn test_generate_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("causeway.yaml");
        std::fs::write(&output, "batch:\n  concurrency: 2\n").unwrap();

        assert!(generate(output.clone(), false).is_err());
        assert!(generate(output, true).is_ok());
    }
}
