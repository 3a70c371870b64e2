//! Agent configuration stored under `<repo>/.mikalia/config.toml`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::safety::SafetyConfig;
use crate::core::types::TaskType;

/// Directory (relative to the repository root) holding agent files.
pub const CONFIG_DIR: &str = ".mikalia";
const CONFIG_FILE: &str = "config.toml";

/// Label attached to every PR regardless of task type.
pub const AUTHORED_LABEL: &str = "mikalia-authored";

/// Default config location for a repository.
pub fn config_path(repo: &Path) -> PathBuf {
    repo.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Agent configuration (TOML).
///
/// Edited by humans. Missing fields default to working values. Absolute
/// safety rules are not represented here and cannot be changed from the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub safety: SafetyConfig,
    pub git: GitConfig,
    pub github: GithubConfig,
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    /// Branch new work starts from and PRs target.
    pub default_branch: String,
    pub remote: String,
    /// Prepended to every commit message.
    pub commit_prefix: String,
    /// Upper bound for `pull` and `push`.
    pub network_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            remote: "origin".to_string(),
            commit_prefix: "✨".to_string(),
            network_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    /// Labels keyed by task type (`fix`, `feat`, ...).
    pub pr_labels: BTreeMap<String, Vec<String>>,
    pub pr_timeout_secs: u64,
    /// Post change explanations as a PR comment after creation.
    pub comment_on_pr: bool,
}

impl Default for GithubConfig {
    fn default() -> Self {
        let labels = |items: &[&str]| items.iter().map(|l| l.to_string()).collect::<Vec<_>>();
        let mut pr_labels = BTreeMap::new();
        pr_labels.insert("post".to_string(), labels(&["content", "blog", AUTHORED_LABEL]));
        pr_labels.insert("fix".to_string(), labels(&["bugfix", AUTHORED_LABEL]));
        pr_labels.insert("feat".to_string(), labels(&["enhancement", AUTHORED_LABEL]));
        pr_labels.insert("docs".to_string(), labels(&["documentation", AUTHORED_LABEL]));
        Self {
            pr_labels,
            pr_timeout_secs: 30,
            comment_on_pr: true,
        }
    }
}

impl GithubConfig {
    /// Labels for a task type; unmapped types get only the authored label.
    pub fn labels_for(&self, task_type: TaskType) -> BTreeSet<String> {
        match self.pr_labels.get(task_type.as_str()) {
            Some(labels) if !labels.is_empty() => labels.iter().cloned().collect(),
            _ => BTreeSet::from([AUTHORED_LABEL.to_string()]),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionBackend {
    /// Anthropic Messages API over HTTPS.
    Anthropic,
    /// Local command: request JSON on stdin, completion text on stdout.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionConfig {
    pub backend: CompletionBackend,
    pub model: String,
    pub api_url: String,
    /// Environment variable holding the API key. The key itself is never stored.
    pub api_key_env: String,
    /// Command for the `command` backend (e.g. `["llm", "--json"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate command backend stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Existing file content is cut to this many characters in prompts.
    pub file_prompt_chars: usize,
    /// Cap on tracked files listed in the repository context.
    pub context_max_files: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            backend: CompletionBackend::Anthropic,
            model: "claude-sonnet-4-5-20250929".to_string(),
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            command: Vec::new(),
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
            file_prompt_chars: 8000,
            context_max_files: 200,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.safety.max_files_per_pr == 0 {
            return Err(anyhow!("safety.max_files_per_pr must be > 0"));
        }
        if self.safety.max_lines_changed == 0 {
            return Err(anyhow!("safety.max_lines_changed must be > 0"));
        }
        if let Some(ext) = self
            .safety
            .allowed_extensions
            .iter()
            .find(|ext| !ext.starts_with('.'))
        {
            return Err(anyhow!(
                "safety.allowed_extensions entries must start with '.': {ext:?}"
            ));
        }
        if self.safety.extra_blocked_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(anyhow!("safety.extra_blocked_paths entries must be non-empty"));
        }
        if self.git.default_branch.trim().is_empty() {
            return Err(anyhow!("git.default_branch must be non-empty"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must be non-empty"));
        }
        if self.git.network_timeout_secs == 0 {
            return Err(anyhow!("git.network_timeout_secs must be > 0"));
        }
        if self.github.pr_timeout_secs == 0 {
            return Err(anyhow!("github.pr_timeout_secs must be > 0"));
        }
        if self.completion.timeout_secs == 0 {
            return Err(anyhow!("completion.timeout_secs must be > 0"));
        }
        if self.completion.output_limit_bytes == 0 {
            return Err(anyhow!("completion.output_limit_bytes must be > 0"));
        }
        if self.completion.file_prompt_chars == 0 {
            return Err(anyhow!("completion.file_prompt_chars must be > 0"));
        }
        if self.completion.backend == CompletionBackend::Command
            && self
                .completion
                .command
                .first()
                .is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!(
                "completion.command must be a non-empty array when backend = \"command\""
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
