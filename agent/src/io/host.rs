//! Pull request host adapter.
//!
//! The [`PrHost`] trait isolates PR creation and commenting so the publisher
//! can run against a recording fake in tests. [`GhCli`] drives the GitHub CLI.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::io::process::run_command_with_timeout;

const GH_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Everything the host needs to open a PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
    pub labels: BTreeSet<String>,
}

/// Identity of a PR the host accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPr {
    pub number: u64,
    pub url: String,
}

pub trait PrHost {
    /// Open a PR. Any refusal is an error the caller treats as recoverable.
    fn create_pr(&self, request: &PrRequest) -> Result<CreatedPr>;

    fn comment(&self, number: u64, body: &str) -> Result<()>;
}

/// `gh` CLI running in the repository directory.
pub struct GhCli {
    workdir: PathBuf,
    timeout: Duration,
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    fn run_gh(&self, args: &[String]) -> Result<String> {
        let mut cmd = Command::new("gh");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, GH_OUTPUT_LIMIT_BYTES)
            .context("run gh (is the GitHub CLI installed?)")?;
        if !output.succeeded() {
            return Err(anyhow!(output.failure_summary("gh")));
        }
        Ok(output.stdout_lossy())
    }
}

impl PrHost for GhCli {
    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create_pr(&self, request: &PrRequest) -> Result<CreatedPr> {
        let mut args: Vec<String> = vec![
            "pr".to_string(),
            "create".to_string(),
            "--title".to_string(),
            request.title.clone(),
            "--body".to_string(),
            request.body.clone(),
            "--base".to_string(),
            request.base.clone(),
            "--head".to_string(),
            request.head.clone(),
        ];
        for label in &request.labels {
            args.push("--label".to_string());
            args.push(label.clone());
        }

        debug!(labels = request.labels.len(), "creating pull request");
        let stdout = self.run_gh(&args)?;
        let created = parse_pr_url(&stdout)?;
        info!(number = created.number, url = %created.url, "pull request created");
        Ok(created)
    }

    #[instrument(skip_all, fields(number))]
    fn comment(&self, number: u64, body: &str) -> Result<()> {
        let args = vec![
            "pr".to_string(),
            "comment".to_string(),
            number.to_string(),
            "--body".to_string(),
            body.to_string(),
        ];
        self.run_gh(&args)?;
        Ok(())
    }
}

/// `gh pr create` prints the PR URL last; the number is its final segment.
pub fn parse_pr_url(stdout: &str) -> Result<CreatedPr> {
    let url = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("gh printed no PR URL"))?;
    let number = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<u64>().ok())
        .filter(|number| *number > 0)
        .ok_or_else(|| anyhow!("cannot read PR number from {url:?}"))?;
    Ok(CreatedPr {
        number,
        url: url.to_string(),
    })
}
