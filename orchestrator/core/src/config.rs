// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Causeway Configuration
//
// Defines the YAML configuration for a training host:
// - Workspace paths (output, corpus, logs, repository list)
// - Batch settings (concurrency, repository limit, history replay)
// - Integrity ledger buffering and rotation
// - External bridge commands and their timeout
// - Engine weights and thresholds
// - Post-batch maintenance (feedback, compaction, archival rotation)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use causeway_cortex::application::{
    ConsolidationConfig, CorrelationConfig, DecisionConfig, ForecastConfig, KernelConfig, MetricsThresholds,
    SequenceConfig, Severity,
};
use causeway_cortex::{BridgeAdapter, BridgeCommand, BridgeKind, EventBus, LedgerConfig, ProcessRefiner};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "CAUSEWAY_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CausewayConfig {
    pub paths: PathsConfig,
    pub batch: BatchConfig,
    pub ledger: LedgerSettings,
    pub bridges: BridgesConfig,
    pub thresholds: ThresholdsConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of every derived artifact, the ledger and the archives
    pub output_dir: PathBuf,

    /// Per-repository replayed histories (`<repo>/commits.jsonl`)
    pub corpus_dir: PathBuf,

    /// Bridge fallback logs land in `<log_dir>/bridges/`
    pub log_dir: PathBuf,

    /// One repository per line; blank lines and `#` comments are ignored
    pub repo_list: PathBuf,

    /// Directory measured by archival rotation
    pub workspace_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(".causeway"),
            corpus_dir: PathBuf::from("datasets/corpus"),
            log_dir: PathBuf::from("logs"),
            repo_list: PathBuf::from("datasets/repo-list.txt"),
            workspace_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Repository pipelines allowed to run at once
    pub concurrency: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_repos: Option<usize>,

    /// Use existing corpus files instead of replaying histories
    pub skip_replay: bool,

    /// External history replayer. Without one, replay is skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_command: Option<CommandConfig>,

    pub replay_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_repos: None,
            skip_replay: false,
            replay_command: None,
            replay_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub buffer_size: usize,
    pub flush_interval_secs: u64,
    pub max_file_size_mb: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        let defaults = LedgerConfig::default();
        Self {
            buffer_size: defaults.buffer_size,
            flush_interval_secs: defaults.flush_interval.as_secs(),
            max_file_size_mb: defaults.max_file_size / (1024 * 1024),
        }
    }
}

/// Command line of an external process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandConfig {
    pub fn to_bridge_command(&self) -> BridgeCommand {
        let mut command = BridgeCommand::new(self.program.clone(), self.args.clone());
        command.working_dir = self.working_dir.clone();
        command
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgesConfig {
    /// Hard limit per bridge call; the child is killed when it expires
    pub timeout_secs: u64,

    /// Bridge command per kind. Kinds without a command run natively.
    pub commands: BTreeMap<BridgeKind, CommandConfig>,
}

impl Default for BridgesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            commands: BTreeMap::new(),
        }
    }
}

/// Every engine weight and threshold
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub sequences: SequenceConfig,
    pub correlations: CorrelationConfig,
    pub forecasts: ForecastConfig,
    pub decisions: DecisionConfig,
    pub consolidation: ConsolidationConfig,
    /// Pipeline health limits checked by the feedback step
    pub metrics: MetricsThresholds,
}

impl ThresholdsConfig {
    pub fn kernel(&self) -> KernelConfig {
        KernelConfig {
            sequences: self.sequences.clone(),
            correlations: self.correlations.clone(),
            forecasts: self.forecasts.clone(),
            decisions: self.decisions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub consolidate: bool,
    pub feedback: bool,
    pub compact: bool,
    pub archive: bool,

    /// Metric insights below this severity produce no meta decision record
    pub feedback_min_severity: Severity,

    /// Workspace size that triggers archival rotation
    pub max_workspace_gb: f64,

    pub top_patterns: usize,
    pub top_decisions: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            consolidate: true,
            feedback: true,
            compact: true,
            archive: true,
            feedback_min_severity: Severity::Low,
            max_workspace_gb: 9.5,
            top_patterns: 50,
            top_decisions: 20,
        }
    }
}

impl MaintenanceConfig {
    pub fn max_workspace_bytes(&self) -> u64 {
        (self.max_workspace_gb * 1_000_000_000.0) as u64
    }
}

impl CausewayConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Discover configuration file using precedence order
    /// 1. CAUSEWAY_CONFIG_PATH environment variable
    /// 2. ./causeway.yaml (working directory)
    /// 3. ~/.causeway/config.yaml (user home)
    /// 4. /etc/causeway/config.yaml (system, Unix) or C:\ProgramData\Causeway\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./causeway.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".causeway").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/causeway/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Causeway\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CAUSEWAY_OUTPUT_DIR") {
            tracing::info!("Environment override: CAUSEWAY_OUTPUT_DIR={}", val);
            self.paths.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("REPO_LIST_PATH") {
            tracing::info!("Environment override: REPO_LIST_PATH={}", val);
            self.paths.repo_list = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CAUSEWAY_CONCURRENCY") {
            match val.trim().parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: CAUSEWAY_CONCURRENCY={}", n);
                    self.batch.concurrency = n;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for CAUSEWAY_CONCURRENCY: '{}'. Expected a positive integer. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("CAUSEWAY_BRIDGE_TIMEOUT_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: CAUSEWAY_BRIDGE_TIMEOUT_SECS={}", secs);
                    self.bridges.timeout_secs = secs;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for CAUSEWAY_BRIDGE_TIMEOUT_SECS: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch.concurrency == 0 {
            anyhow::bail!("batch.concurrency must be at least 1");
        }
        if self.batch.max_repos == Some(0) {
            anyhow::bail!("batch.max_repos must be at least 1 when set");
        }
        if self.ledger.buffer_size == 0 {
            anyhow::bail!("ledger.buffer_size must be at least 1");
        }
        if self.ledger.flush_interval_secs == 0 {
            anyhow::bail!("ledger.flush_interval_secs must be at least 1");
        }
        if self.ledger.max_file_size_mb == 0 {
            anyhow::bail!("ledger.max_file_size_mb must be at least 1");
        }
        if self.bridges.timeout_secs == 0 {
            anyhow::bail!("bridges.timeout_secs must be at least 1");
        }
        for (kind, command) in &self.bridges.commands {
            if command.program.trim().is_empty() {
                anyhow::bail!("Bridge program cannot be empty for: {}", kind.name());
            }
        }
        if let Some(command) = &self.batch.replay_command {
            if command.program.trim().is_empty() {
                anyhow::bail!("batch.replay_command.program cannot be empty");
            }
        }
        if self.maintenance.max_workspace_gb.is_nan() || self.maintenance.max_workspace_gb <= 0.0 {
            anyhow::bail!("maintenance.max_workspace_gb must be positive");
        }

        let metrics = &self.thresholds.metrics;
        if metrics.cycle_time_max_ms.is_nan() || metrics.cycle_time_max_ms <= 0.0 {
            anyhow::bail!("thresholds.metrics.cycle_time_max_ms must be positive");
        }
        if metrics.entropy_min.is_nan() || metrics.entropy_min < 0.0 {
            anyhow::bail!("thresholds.metrics.entropy_min cannot be negative");
        }

        for (name, value) in self.unit_interval_values() {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("thresholds.{} must be within [0, 1], got {}", name, value);
            }
        }

        Ok(())
    }

    fn unit_interval_values(&self) -> Vec<(&'static str, f64)> {
        let t = &self.thresholds;
        vec![
            ("sequences.length_weight", t.sequences.length_weight),
            ("sequences.recurrence_weight", t.sequences.recurrence_weight),
            ("sequences.regularity_weight", t.sequences.regularity_weight),
            ("sequences.min_support", t.sequences.min_support),
            ("sequences.min_confidence", t.sequences.min_confidence),
            ("correlations.min_strength", t.correlations.min_strength),
            ("correlations.rule_strength", t.correlations.rule_strength),
            ("correlations.occurrence_weight", t.correlations.occurrence_weight),
            ("correlations.universality_weight", t.correlations.universality_weight),
            ("correlations.proximity_weight", t.correlations.proximity_weight),
            ("correlations.consistency_weight", t.correlations.consistency_weight),
            ("correlations.sample_weight", t.correlations.sample_weight),
            ("correlations.causal_threshold", t.correlations.causal_threshold),
            ("forecasts.min_confidence", t.forecasts.min_confidence),
            ("decisions.min_forecast_confidence", t.decisions.min_forecast_confidence),
            ("decisions.strong_correlation", t.decisions.strong_correlation),
            ("consolidation.sequence_weight", t.consolidation.sequence_weight),
            ("consolidation.correlation_weight", t.consolidation.correlation_weight),
            ("consolidation.forecast_weight", t.consolidation.forecast_weight),
            ("consolidation.universal_strength", t.consolidation.universal_strength),
            ("consolidation.universal_confidence", t.consolidation.universal_confidence),
            ("consolidation.goal_coherence", t.consolidation.goal_coherence),
            ("consolidation.goal_precision", t.consolidation.goal_precision),
            ("metrics.correlation_rate_min", t.metrics.correlation_rate_min),
            ("metrics.forecast_accuracy_min", t.metrics.forecast_accuracy_min),
        ]
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            buffer_size: self.ledger.buffer_size,
            flush_interval: Duration::from_secs(self.ledger.flush_interval_secs),
            max_file_size: self.ledger.max_file_size_mb * 1024 * 1024,
        }
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridges.timeout_secs)
    }

    /// Bridge registry with one process refiner per configured kind
    pub fn bridge_adapter(&self, event_bus: EventBus) -> BridgeAdapter {
        let timeout = self.bridge_timeout();
        let mut adapter = BridgeAdapter::native(event_bus).with_log_dir(&self.paths.log_dir);
        for (kind, command) in &self.bridges.commands {
            let refiner = ProcessRefiner::new(kind.name(), command.to_bridge_command(), timeout);
            adapter = adapter.with_refiner(*kind, Arc::new(refiner));
        }
        adapter
    }
}
