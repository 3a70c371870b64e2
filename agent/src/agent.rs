//! `execute_task`: plan, gate, generate, validate, publish.
//!
//! The pipeline is synchronous; each stage starts only after the previous one
//! finished. Every stop is reported as an [`AgentResult`] with the stage that
//! stopped it, never as a panic or a bare error.

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use crate::core::publish_state::PublishStage;
use crate::core::safety::SafetyGuard;
use crate::core::types::{CodeChange, Complexity, Plan, PullRequest, SafetyResult};
use crate::core::validator::ChangeValidator;
use crate::error::{PipelineError, PipelineStage};
use crate::exit_codes;
use crate::generator::ChangeGenerator;
use crate::io::completion::CompletionClient;
use crate::io::config::AgentConfig;
use crate::io::git::Git;
use crate::io::host::PrHost;
use crate::io::workspace::{Workspace, repo_context};
use crate::planner::TaskPlanner;
use crate::publisher::Publisher;

const SUMMARY_EXPLANATION_CHARS: usize = 100;

/// Outcome of one `execute_task` call.
#[derive(Debug)]
pub struct AgentResult {
    /// Dry run validated, or a PR was opened.
    pub success: bool,
    pub dry_run: bool,
    pub pull_request: Option<PullRequest>,
    pub changes: Vec<CodeChange>,
    pub plan: Option<Plan>,
    pub summary: String,
    pub error: Option<PipelineError>,
    /// Last publisher stage, when the publisher ran.
    pub publish_stage: Option<PublishStage>,
}

impl AgentResult {
    fn stopped(
        task: &str,
        dry_run: bool,
        plan: Option<Plan>,
        changes: Vec<CodeChange>,
        error: PipelineError,
    ) -> Self {
        error!(stage = %error.stage(), err = %error, "task stopped");
        let summary = if changes.is_empty() {
            String::new()
        } else {
            render_summary(task, &changes)
        };
        Self {
            success: false,
            dry_run,
            pull_request: None,
            changes,
            plan,
            summary,
            error: Some(error),
            publish_stage: None,
        }
    }

    /// Stage that stopped the run, if it stopped.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        self.error.as_ref().map(PipelineError::stage)
    }

    /// True once the branch exists on the remote.
    pub fn reached_remote(&self) -> bool {
        self.publish_stage.is_some_and(PublishStage::reached_remote)
    }

    /// Branch pushed, PR not created.
    pub fn is_partial(&self) -> bool {
        matches!(self.error, Some(PipelineError::PartialPr { .. }))
    }

    pub fn is_safety_block(&self) -> bool {
        self.error.as_ref().is_some_and(PipelineError::is_safety_block)
    }

    pub fn exit_code(&self) -> i32 {
        match &self.error {
            None => exit_codes::OK,
            Some(PipelineError::PartialPr { .. }) => exit_codes::PARTIAL,
            Some(PipelineError::SafetyViolation { .. }) => exit_codes::BLOCKED,
            Some(PipelineError::NeedsHuman | PipelineError::NoChanges) => exit_codes::STOPPED,
            Some(PipelineError::Vcs { .. } | PipelineError::Setup(_)) => exit_codes::INVALID,
        }
    }

    /// Stable JSON report for `--json` output.
    pub fn to_json(&self) -> Value {
        let safety = match &self.error {
            Some(PipelineError::SafetyViolation { result, .. }) => json!(result),
            _ => Value::Null,
        };
        json!({
            "success": self.success,
            "dry_run": self.dry_run,
            "pull_request": self.pull_request,
            "changes": self.changes,
            "plan": self.plan,
            "summary": self.summary,
            "error": self.error.as_ref().map(ToString::to_string),
            "failed_stage": self.failed_stage(),
            "safety": safety,
            "reached_remote": self.reached_remote(),
        })
    }
}

/// Runs tasks against a repository with injected completion and PR host.
pub struct CodeAgent<'a, C: CompletionClient + ?Sized, H: PrHost + ?Sized> {
    client: &'a C,
    host: &'a H,
    config: &'a AgentConfig,
    guard: SafetyGuard,
}

impl<'a, C: CompletionClient + ?Sized, H: PrHost + ?Sized> CodeAgent<'a, C, H> {
    pub fn new(client: &'a C, host: &'a H, config: &'a AgentConfig) -> Self {
        Self {
            client,
            host,
            config,
            guard: SafetyGuard::new(config.safety.clone()),
        }
    }

    pub fn guard(&self) -> &SafetyGuard {
        &self.guard
    }

    /// Plan only: the safety-checked plan, no generation.
    pub fn plan(&self, repo: &Path, task: &str) -> Result<Plan, PipelineError> {
        check_inputs(repo, task)?;
        let context = self.repo_context(repo);
        TaskPlanner::new(self.client, &self.guard)
            .plan(task, &context)
            .map_err(|err| PipelineError::Setup(format!("planning failed: {err:#}")))
    }

    /// Run the full pipeline. `dry_run` stops after validation, before any
    /// branch, commit or push.
    #[instrument(skip_all, fields(repo = %repo.display(), dry_run))]
    pub fn execute_task(&self, repo: &Path, task: &str, dry_run: bool) -> AgentResult {
        info!(task, "executing task");
        let stop = |plan, changes, err| AgentResult::stopped(task, dry_run, plan, changes, err);

        info!("stage 1/5: plan");
        let plan = match self.plan(repo, task) {
            Ok(plan) => plan,
            Err(err) => return stop(None, Vec::new(), err),
        };

        info!("stage 2/5: task gate");
        if !plan.is_safe() {
            let result = plan
                .safety_check()
                .cloned()
                .unwrap_or_else(|| SafetyResult::critical("Plan has no safety verdict", ""));
            let err = PipelineError::SafetyViolation {
                stage: PipelineStage::TaskGate,
                result,
            };
            return stop(Some(plan), Vec::new(), err);
        }
        if plan.complexity() == Complexity::NeedsHuman {
            return stop(Some(plan), Vec::new(), PipelineError::NeedsHuman);
        }

        info!("stage 3/5: generate");
        let workspace = Workspace::new(repo);
        let context = self.repo_context(repo);
        let changes = ChangeGenerator::new(
            self.client,
            &self.guard,
            &workspace,
            self.config.completion.file_prompt_chars,
        )
        .generate(&plan, &context);
        if changes.is_empty() {
            return stop(Some(plan), changes, PipelineError::NoChanges);
        }

        info!("stage 4/5: validate");
        let validation = ChangeValidator::new(&self.guard).validate(&changes);
        if !validation.allowed {
            let err = PipelineError::SafetyViolation {
                stage: PipelineStage::Validate,
                result: validation,
            };
            return stop(Some(plan), changes, err);
        }

        let summary = render_summary(task, &changes);
        if dry_run {
            info!(changes = changes.len(), "dry run complete, nothing published");
            return AgentResult {
                success: true,
                dry_run: true,
                pull_request: None,
                changes,
                plan: Some(plan),
                summary,
                error: None,
                publish_stage: None,
            };
        }

        info!("stage 5/5: publish");
        let git = self.git(repo);
        let outcome = Publisher::new(
            &git,
            &workspace,
            self.host,
            &self.guard,
            &self.config.git,
            &self.config.github,
        )
        .publish(&plan, &changes);

        match &outcome.error {
            None => info!("task complete"),
            Some(PipelineError::PartialPr { branch }) => {
                warn!(branch = %branch, "changes pushed, pull request must be opened manually");
            }
            Some(err) => error!(err = %err, "publish stopped"),
        }
        AgentResult {
            success: outcome.error.is_none(),
            dry_run: false,
            pull_request: outcome.pull_request,
            changes,
            plan: Some(plan),
            summary,
            error: outcome.error,
            publish_stage: Some(outcome.stage),
        }
    }

    fn git(&self, repo: &Path) -> Git {
        Git::new(repo).with_network_timeout(Duration::from_secs(
            self.config.git.network_timeout_secs,
        ))
    }

    fn repo_context(&self, repo: &Path) -> String {
        repo_context(&self.git(repo), self.config.completion.context_max_files)
    }
}

fn check_inputs(repo: &Path, task: &str) -> Result<(), PipelineError> {
    if task.trim().is_empty() {
        return Err(PipelineError::Setup("task description is empty".to_string()));
    }
    if !repo.is_dir() {
        return Err(PipelineError::Setup(format!(
            "repository {} is not a directory",
            repo.display()
        )));
    }
    Ok(())
}

/// Human-readable run summary: task, change count, one line per change.
pub fn render_summary(task: &str, changes: &[CodeChange]) -> String {
    let mut lines = vec![
        format!("Task: {}", task.trim()),
        format!("Files changed: {}", changes.len()),
        String::new(),
    ];
    for change in changes {
        lines.push(format!("  [{}] {}", change.action.marker(), change.file));
        let explanation = change.explanation.trim();
        if !explanation.is_empty() {
            let short: String = explanation.chars().take(SUMMARY_EXPLANATION_CHARS).collect();
            lines.push(format!("      {short}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_changes_with_markers() {
        let changes = vec![
            CodeChange::modify("src/a.py", "a", "b", "x".repeat(150)),
            CodeChange::create("docs/b.md", "x", ""),
        ];
        let summary = render_summary("Fix it", &changes);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "Task: Fix it");
        assert_eq!(lines[1], "Files changed: 2");
        assert_eq!(lines[3], "  [M] src/a.py");
        assert_eq!(lines[4], format!("      {}", "x".repeat(100)));
        assert_eq!(lines[5], "  [+] docs/b.md");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn exit_codes_follow_the_stopping_error() {
        let mut result =
            AgentResult::stopped("t", false, None, Vec::new(), PipelineError::NeedsHuman);
        assert_eq!(result.exit_code(), exit_codes::STOPPED);
        result.error = Some(PipelineError::PartialPr {
            branch: "mikalia/fix/x".to_string(),
        });
        assert_eq!(result.exit_code(), exit_codes::PARTIAL);
        assert!(result.is_partial());
        result.error = Some(PipelineError::SafetyViolation {
            stage: PipelineStage::Validate,
            result: SafetyResult::blocked("Too many files: 11 > 10", ""),
        });
        assert_eq!(result.exit_code(), exit_codes::BLOCKED);
        result.error = None;
        assert_eq!(result.exit_code(), exit_codes::OK);
    }

    #[test]
    fn stopped_dry_run_reports_dry_run() {
        let result = AgentResult::stopped("t", true, None, Vec::new(), PipelineError::NoChanges);
        assert!(result.dry_run);
        assert_eq!(result.to_json()["dry_run"], json!(true));
        assert_eq!(result.to_json()["failed_stage"], json!({"stage": "generate"}));
    }

    #[test]
    fn empty_task_is_rejected_before_planning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = check_inputs(temp.path(), "   ").expect_err("empty");
        assert_eq!(err.stage(), PipelineStage::Plan);
    }

    #[test]
    fn missing_repository_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(check_inputs(&temp.path().join("nope"), "task").is_err());
    }
}
