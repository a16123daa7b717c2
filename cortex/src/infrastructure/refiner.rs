// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Bridge Refiners
//!
//! Engines never spawn processes themselves. They ask a [`BridgeAdapter`] to
//! refine a payload and get back either typed refined data or `None`, in which
//! case they keep their native results.
//!
//! ```text
//! Idle -> Spawned -> Succeeded | TimedOut | ExitError | ParseError | SchemaError
//!                     \____________________ Refined or None ______________/
//! ```
//!
//! - [`NativeRefiner`] never refines; it is what unconfigured bridges use.
//! - [`ProcessRefiner`] writes the request to the child's stdin, waits for exit
//!   and for both output pipes to close under one hard timeout (killing the
//!   child when it expires) and parses stdout.
//!
//! Every failure other than "not configured" is logged, counted, published as
//! a `BridgeFallback` event and appended to `<log_dir>/bridges/<bridge>.log`.
//! Writing that log line is best-effort.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{BridgeKind, BridgeRequest, BridgeResponse, KernelEvent, RefineError};
use crate::infrastructure::event_bus::EventBus;

/// Capability to refine a bridge request into a raw bridge response
#[async_trait]
pub trait Refiner: Send + Sync {
    fn name(&self) -> &str;

    async fn refine(&self, request: &BridgeRequest) -> Result<BridgeResponse, RefineError>;
}

/// Refiner used when no external bridge is configured
pub struct NativeRefiner {
    kind: BridgeKind,
}

impl NativeRefiner {
    pub fn new(kind: BridgeKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Refiner for NativeRefiner {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn refine(&self, _request: &BridgeRequest) -> Result<BridgeResponse, RefineError> {
        Err(RefineError::NotConfigured(self.kind.name()))
    }
}

/// Command line of an external bridge process
#[derive(Debug, Clone)]
pub struct BridgeCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl BridgeCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }
}

/// Refiner backed by an external process speaking JSON over stdio
pub struct ProcessRefiner {
    name: String,
    command: BridgeCommand,
    timeout: Duration,
}

impl ProcessRefiner {
    pub fn new(name: impl Into<String>, command: BridgeCommand, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            timeout,
        }
    }
}

#[async_trait]
impl Refiner for ProcessRefiner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refine(&self, request: &BridgeRequest) -> Result<BridgeResponse, RefineError> {
        let input = serde_json::to_vec(request).map_err(|e| RefineError::Parse(e.to_string()))?;

        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RefineError::Spawn(format!("{}: {}", self.command.program, e)))?;
        debug!(bridge = %self.name, pid = ?child.id(), "Bridge process spawned");

        // A child may exit without reading stdin; a broken pipe is not a failure by itself
        let mut stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Bridge stdin write ended early: {}", e);
                }
                drop(stdin);
            })
        });

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RefineError::Spawn("stdout pipe unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RefineError::Spawn("stderr pipe unavailable".to_string()))?;

        let mut stdout_task = tokio::spawn(async move {
            let mut out = String::new();
            stdout.read_to_string(&mut out).await.map(|_| out)
        });
        let mut stderr_task = tokio::spawn(async move {
            let mut err = String::new();
            stderr.read_to_string(&mut err).await.map(|_| err)
        });

        // The deadline covers exit and EOF on both pipes: a descendant that
        // inherited stdout keeps the pipe open after the bridge itself exits.
        let finished = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await.map_err(RefineError::Io)?;
            if let Some(task) = stdin_task.as_mut() {
                let _ = task.await;
            }
            let stdout = join_output(&mut stdout_task).await?;
            let stderr = join_output(&mut stderr_task).await?;
            Ok::<_, RefineError>((status, stdout, stderr))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(result) => result?,
            Err(_) => {
                stdout_task.abort();
                stderr_task.abort();
                if let Some(task) = &stdin_task {
                    task.abort();
                }
                let _ = child.kill().await;
                return Err(RefineError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            return Err(RefineError::ExitStatus {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        serde_json::from_str(stdout.trim()).map_err(|e| RefineError::Parse(e.to_string()))
    }
}

async fn join_output(
    task: &mut tokio::task::JoinHandle<std::io::Result<String>>,
) -> Result<String, RefineError> {
    match task.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(RefineError::Io(std::io::Error::other(e.to_string()))),
    }
}

/// Per-kind bridge registry with fallback reporting
#[derive(Clone)]
pub struct BridgeAdapter {
    refiners: HashMap<BridgeKind, Arc<dyn Refiner>>,
    log_dir: Option<PathBuf>,
    event_bus: EventBus,
}

impl BridgeAdapter {
    /// Adapter where every kind falls back to native computation
    pub fn native(event_bus: EventBus) -> Self {
        Self {
            refiners: HashMap::new(),
            log_dir: None,
            event_bus,
        }
    }

    pub fn with_refiner(mut self, kind: BridgeKind, refiner: Arc<dyn Refiner>) -> Self {
        self.refiners.insert(kind, refiner);
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn is_configured(&self, kind: BridgeKind) -> bool {
        self.refiners.contains_key(&kind)
    }

    /// Runs the bridge for `kind` and decodes its `data` as `T`.
    /// Returns `None` on any failure; native results should then be kept.
    pub async fn refine<T: DeserializeOwned>(&self, kind: BridgeKind, request: &BridgeRequest) -> Option<T> {
        match self.try_refine(kind, request).await {
            Ok(data) => Some(data),
            Err(e) => {
                self.report_failure(kind, &e).await;
                None
            }
        }
    }

    /// Same as [`BridgeAdapter::refine`] but surfaces the failure reason.
    pub async fn try_refine<T: DeserializeOwned>(
        &self,
        kind: BridgeKind,
        request: &BridgeRequest,
    ) -> Result<T, RefineError> {
        let refiner: Arc<dyn Refiner> = match self.refiners.get(&kind) {
            Some(refiner) => refiner.clone(),
            None => Arc::new(NativeRefiner::new(kind)),
        };

        let started = Instant::now();
        let response = refiner.refine(request).await?;

        if !response.success {
            return Err(RefineError::Rejected(
                response.error.unwrap_or_else(|| "success=false".to_string()),
            ));
        }

        let data = serde_json::from_value(response.data).map_err(|e| RefineError::Schema(e.to_string()))?;
        debug!(
            bridge = kind.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            reported_ms = response.metadata.duration_ms,
            "Bridge refinement succeeded"
        );
        Ok(data)
    }

    async fn report_failure(&self, kind: BridgeKind, error: &RefineError) {
        if !error.is_reportable() {
            debug!(bridge = kind.name(), "No bridge configured, using native results");
            return;
        }

        warn!(bridge = kind.name(), "Bridge fallback triggered: {}", error);
        metrics::counter!("causeway_bridge_fallbacks_total", "bridge" => kind.name()).increment(1);
        self.event_bus.publish(KernelEvent::BridgeFallback {
            bridge: kind.name().to_string(),
            reason: error.to_string(),
            timestamp: Utc::now(),
        });

        if let Some(log_dir) = &self.log_dir {
            append_bridge_log(log_dir, kind.name(), &error.to_string()).await;
        }
    }
}

/// Appends `[<UTC ISO>] [ERROR] Bridge fallback triggered: <message>`.
/// Errors are swallowed.
async fn append_bridge_log(log_dir: &std::path::Path, bridge: &str, message: &str) {
    let dir = log_dir.join("bridges");
    let path = dir.join(format!("{}.log", bridge));
    let line = format!(
        "[{}] [ERROR] Bridge fallback triggered: {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        message
    );

    let result = async {
        tokio::fs::create_dir_all(&dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await
    }
    .await;

    if let Err(e) = result {
        debug!(path = %path.display(), "Could not write bridge log: {}", e);
    }
}
