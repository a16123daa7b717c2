// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository histories
//!
//! Replayed histories live in the corpus as newline-delimited JSON:
//!
//! ```text
//! <corpus>/<repo>/commits.jsonl        one ChangeEvent per line (required)
//! <corpus>/<repo>/ast_features.jsonl   one AstFeature per line (optional)
//! ```
//!
//! Producing them from a version-control history is delegated to a
//! [`HistoryReplayer`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use causeway_cortex::{AstFeature, ChangeEvent};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const COMMITS_FILE: &str = "commits.jsonl";
pub const AST_FEATURES_FILE: &str = "ast_features.jsonl";

/// Stable repository name for a repo-list entry.
///
/// `https://github.com/owner/name(.git)` becomes `owner-name`; any other
/// entry uses its last path segment.
pub fn repo_name(entry: &str) -> String {
    let trimmed = entry.trim().trim_end_matches('/');

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        if let Some((_, rest)) = trimmed.split_once("github.com/") {
            let mut segments = rest.split('/').filter(|s| !s.is_empty());
            if let (Some(owner), Some(name)) = (segments.next(), segments.next()) {
                return format!("{}-{}", owner, name.trim_end_matches(".git"));
            }
        }
    }

    let last = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    last.trim_end_matches(".git").to_string()
}

/// Reads the repository list: one entry per line, `#` comments and blank
/// lines ignored.
pub async fn load_repo_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to load repo list from {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Corpus reader for replayed histories
#[derive(Debug, Clone)]
pub struct EventSource {
    corpus_dir: PathBuf,
}

impl EventSource {
    pub fn new(corpus_dir: impl Into<PathBuf>) -> Self {
        Self {
            corpus_dir: corpus_dir.into(),
        }
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    pub fn repo_dir(&self, repo: &str) -> PathBuf {
        self.corpus_dir.join(repo)
    }

    pub fn events_path(&self, repo: &str) -> PathBuf {
        self.repo_dir(repo).join(COMMITS_FILE)
    }

    pub fn ast_features_path(&self, repo: &str) -> PathBuf {
        self.repo_dir(repo).join(AST_FEATURES_FILE)
    }

    /// Loads the history of `repo` in file order. A missing file or a
    /// malformed line fails the repository.
    pub async fn load_events(&self, repo: &str) -> anyhow::Result<Vec<ChangeEvent>> {
        let path = self.events_path(repo);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            bail!(
                "Events file not found: {}. Run without --skip-replay first.",
                path.display()
            );
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut events = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: ChangeEvent = serde_json::from_str(line)
                .with_context(|| format!("Malformed event at {}:{}", path.display(), i + 1))?;
            events.push(event);
        }

        debug!(repo, events = events.len(), "Loaded events");
        Ok(events)
    }

    /// Loads AST features if the extractor produced any. Unreadable files
    /// and malformed lines are skipped.
    pub async fn load_ast_features(&self, repo: &str) -> Vec<AstFeature> {
        let path = self.ast_features_path(repo);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(repo, path = %path.display(), "Ignoring unreadable AST features: {}", e);
                return Vec::new();
            }
        };

        let features: Vec<AstFeature> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        debug!(repo, features = features.len(), "Loaded AST features");
        features
    }
}

/// Result of replaying one repository history into the corpus
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub repo: String,
    pub events: usize,
    pub output_path: PathBuf,
}

/// Turns a repository (path or URL) into a `commits.jsonl` history
#[async_trait]
pub trait HistoryReplayer: Send + Sync {
    async fn replay(&self, source: &str, repo: &str, output: &Path) -> anyhow::Result<ReplayOutcome>;
}

/// Replayer backed by an external command.
///
/// Arguments may contain the placeholders `{source}`, `{repo}` and
/// `{output}`; they are substituted before spawning. The command must write
/// the history to `{output}` and exit with status 0.
pub struct CommandReplayer {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandReplayer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            timeout,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn render_args(&self, source: &str, repo: &str, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{repo}", repo)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

#[async_trait]
impl HistoryReplayer for CommandReplayer {
    async fn replay(&self, source: &str, repo: &str, output: &Path) -> anyhow::Result<ReplayOutcome> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut command = Command::new(&self.program);
        command
            .args(self.render_args(source, repo, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        info!(repo, program = %self.program, "Replaying history");
        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn replayer {}", self.program))?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("Replayer {} failed", self.program))?,
            Err(_) => bail!("Replay of {} timed out after {:?}", repo, self.timeout),
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "Replayer exited with status {:?}: {}",
                result.status.code(),
                stderr.trim()
            );
        }

        let content = fs::read_to_string(output)
            .await
            .with_context(|| format!("Replayer produced no history at {}", output.display()))?;
        let events = content.lines().filter(|l| !l.trim().is_empty()).count();

        info!(repo, events, "Replay complete");
        Ok(ReplayOutcome {
            repo: repo.to_string(),
            events,
            output_path: output.to_path_buf(),
        })
    }
}
