//! Publishing: branch, apply, commit, push, open PR.
//!
//! Every side effect on the repository and the remote lives here and is
//! sequenced through [`PublishState`]. The guard is consulted again before
//! branch creation, before staging, and before pushing.
//!
//! Failure handling:
//! - before anything exists locally: nothing to undo
//! - a failed update of the default branch: return to the starting branch
//! - after the branch exists but before it is pushed: restore the files this
//!   run wrote, check out the default branch (never forced) and delete the new
//!   branch
//! - after push: the branch stays; a refused PR is a partial success

use std::fmt::Write as _;

use tracing::{debug, error, info, instrument, warn};

use crate::core::publish_state::{PublishStage, PublishState};
use crate::core::safety::SafetyGuard;
use crate::core::types::{CodeChange, FileAction, Plan, PrStatus, PullRequest};
use crate::error::{PipelineError, PipelineStage};
use crate::io::config::{CONFIG_DIR, GitConfig, GithubConfig};
use crate::io::git::Git;
use crate::io::host::{PrHost, PrRequest};
use crate::io::workspace::Workspace;

const PR_TITLE_PREFIX: &str = "[Mikalia]";

/// Where publishing ended and what it produced.
#[derive(Debug)]
pub struct PublishOutcome {
    /// `PrCreated`, `Pushed` (PR refused), or `Failed`.
    pub stage: PublishStage,
    /// Present once a PR was attempted; `number == 0` if the host refused.
    pub pull_request: Option<PullRequest>,
    pub error: Option<PipelineError>,
}

/// A path this run wrote, and whether a file was there before.
#[derive(Debug)]
struct Written {
    file: String,
    existed: bool,
}

impl PublishOutcome {
    fn stopped(stage: PublishStage, error: PipelineError) -> Self {
        Self {
            stage,
            pull_request: None,
            error: Some(error),
        }
    }
}

pub struct Publisher<'a, H: PrHost + ?Sized> {
    git: &'a Git,
    workspace: &'a Workspace,
    host: &'a H,
    guard: &'a SafetyGuard,
    git_cfg: &'a GitConfig,
    github_cfg: &'a GithubConfig,
}

impl<'a, H: PrHost + ?Sized> Publisher<'a, H> {
    pub fn new(
        git: &'a Git,
        workspace: &'a Workspace,
        host: &'a H,
        guard: &'a SafetyGuard,
        git_cfg: &'a GitConfig,
        github_cfg: &'a GithubConfig,
    ) -> Self {
        Self {
            git,
            workspace,
            host,
            guard,
            git_cfg,
            github_cfg,
        }
    }

    #[instrument(skip_all, fields(branch = plan.branch_name(), changes = changes.len()))]
    pub fn publish(&self, plan: &Plan, changes: &[CodeChange]) -> PublishOutcome {
        let mut state = PublishState::new();
        let branch = plan.branch_name();

        if let Err(err) = self.create_branch(branch) {
            return self.abort(&mut state, branch, &[], err);
        }
        self.advance(&mut state, PublishStage::BranchCreated);

        let mut written = Vec::new();
        let staged = match self.apply_changes(changes, &mut written) {
            Ok(staged) => staged,
            Err(message) => {
                let err = PipelineError::Vcs {
                    stage: state.stage(),
                    message,
                };
                return self.abort(&mut state, branch, &written, err);
            }
        };
        self.advance(&mut state, PublishStage::ChangesApplied);

        let message = commit_message(&self.git_cfg.commit_prefix, plan);
        if let Err(err) = self.commit_changes(&staged, &message, state.stage()) {
            return self.abort(&mut state, branch, &written, err);
        }
        self.advance(&mut state, PublishStage::Committed);

        if let Err(err) = self.push_branch(branch, state.stage()) {
            return self.abort(&mut state, branch, &written, err);
        }
        self.advance(&mut state, PublishStage::Pushed);

        let request = PrRequest {
            title: pr_title(plan),
            body: render_pr_body(plan.task_description(), changes),
            base: self.git_cfg.default_branch.clone(),
            head: branch.to_string(),
            labels: self.github_cfg.labels_for(plan.task_type()),
        };
        match self.host.create_pr(&request) {
            Ok(created) => {
                self.advance(&mut state, PublishStage::PrCreated);
                info!(number = created.number, url = %created.url, "pull request opened");
                if self.github_cfg.comment_on_pr
                    && let Some(body) = render_change_notes(changes)
                    && let Err(err) = self.host.comment(created.number, &body)
                {
                    warn!(err = %format!("{err:#}"), "could not post change notes");
                }
                PublishOutcome {
                    stage: state.stage(),
                    pull_request: Some(PullRequest {
                        number: created.number,
                        url: created.url,
                        title: request.title,
                        branch: request.head,
                        status: PrStatus::Open,
                        labels: request.labels,
                    }),
                    error: None,
                }
            }
            Err(err) => {
                warn!(
                    err = %format!("{err:#}"),
                    branch,
                    "branch pushed but pull request was not created"
                );
                PublishOutcome {
                    stage: state.stage(),
                    pull_request: Some(PullRequest::not_created(
                        request.title,
                        request.head,
                        request.labels,
                    )),
                    error: Some(PipelineError::PartialPr {
                        branch: branch.to_string(),
                    }),
                }
            }
        }
    }

    /// Start the branch from an up-to-date default branch. On failure the
    /// starting branch is checked out again.
    fn create_branch(&self, branch: &str) -> Result<(), PipelineError> {
        let check = self.guard.check_branch_push(branch);
        if !check.allowed {
            return Err(PipelineError::SafetyViolation {
                stage: PipelineStage::Publish(PublishStage::Idle),
                result: check,
            });
        }
        let vcs = |err: anyhow::Error| PipelineError::Vcs {
            stage: PublishStage::Idle,
            message: format!("{err:#}"),
        };
        let config_prefix = format!("{CONFIG_DIR}/");
        self.git
            .ensure_clean_except_prefixes(&[config_prefix.as_str()])
            .map_err(vcs)?;
        let from = self.git.current_branch().map_err(vcs)?;
        debug!(from = %from, "starting from branch");
        if self.git.branch_exists(branch).map_err(vcs)? {
            return Err(PipelineError::Vcs {
                stage: PublishStage::Idle,
                message: format!("branch {branch} already exists locally"),
            });
        }
        let default = &self.git_cfg.default_branch;
        self.git.checkout_branch(default).map_err(vcs)?;
        let started = self
            .git
            .pull_ff_only(&self.git_cfg.remote, default)
            .and_then(|()| self.git.checkout_new_branch(branch));
        if let Err(err) = started {
            if from != *default
                && let Err(back) = self.git.checkout_branch(&from)
            {
                let back = format!("{back:#}");
                warn!(err = %back, from = %from, "could not return to starting branch");
            }
            return Err(vcs(err));
        }
        info!(branch, from = %default, "branch created");
        Ok(())
    }

    /// Write changes to the working tree. Returns the paths to stage.
    ///
    /// Every path is recorded in `written` before it is touched, so a failure
    /// part way through can still be rolled back.
    fn apply_changes(
        &self,
        changes: &[CodeChange],
        written: &mut Vec<Written>,
    ) -> Result<Vec<String>, String> {
        let mut staged = Vec::new();
        for change in changes {
            written.push(Written {
                file: change.file.clone(),
                existed: self.workspace.exists(&change.file),
            });
            match change.action {
                FileAction::Delete => {
                    let removed = self
                        .workspace
                        .delete(&change.file)
                        .map_err(|err| format!("{err:#}"))?;
                    if removed {
                        staged.push(change.file.clone());
                    } else {
                        warn!(file = %change.file, "file to delete is already absent");
                    }
                }
                FileAction::Create | FileAction::Modify => {
                    self.workspace
                        .write(&change.file, &change.modified)
                        .map_err(|err| format!("{err:#}"))?;
                    staged.push(change.file.clone());
                }
            }
        }
        Ok(staged)
    }

    fn commit_changes(
        &self,
        files: &[String],
        message: &str,
        stage: PublishStage,
    ) -> Result<(), PipelineError> {
        for file in files {
            let check = self.guard.check_file_access(file);
            if !check.allowed {
                return Err(PipelineError::SafetyViolation {
                    stage: PipelineStage::Publish(stage),
                    result: check,
                });
            }
        }
        let vcs = |message: String| PipelineError::Vcs { stage, message };
        self.git
            .add_paths(files)
            .map_err(|err| vcs(format!("{err:#}")))?;
        let committed = self
            .git
            .commit_staged(message)
            .map_err(|err| vcs(format!("{err:#}")))?;
        if !committed {
            return Err(vcs("nothing to commit".to_string()));
        }
        let sha = self.git.head_short_sha(7).unwrap_or_default();
        info!(sha = %sha, files = files.len(), "changes committed");
        Ok(())
    }

    fn push_branch(&self, branch: &str, stage: PublishStage) -> Result<(), PipelineError> {
        let check = self.guard.check_branch_push(branch);
        if !check.allowed {
            return Err(PipelineError::SafetyViolation {
                stage: PipelineStage::Publish(stage),
                result: check,
            });
        }
        self.git
            .push_set_upstream(&self.git_cfg.remote, branch)
            .map_err(|err| PipelineError::Vcs {
                stage,
                message: format!("{err:#}"),
            })?;
        info!(branch, remote = %self.git_cfg.remote, "branch pushed");
        Ok(())
    }

    fn advance(&self, state: &mut PublishState, to: PublishStage) {
        if let Err(err) = state.advance(to) {
            error!(err = %err, "publish state out of sequence");
        }
    }

    fn abort(
        &self,
        state: &mut PublishState,
        branch: &str,
        written: &[Written],
        err: PipelineError,
    ) -> PublishOutcome {
        error!(stage = %state.stage(), err = %err, "publish failed");
        let last = state.stage();
        if let Err(transition) = state.fail() {
            error!(err = %transition, "publish state out of sequence");
        }
        if last.owns_local_branch() {
            self.cleanup_branch(branch, written);
        }
        PublishOutcome::stopped(state.stage(), err)
    }

    /// Best effort: undo this run's writes, return to the default branch and
    /// drop the new one.
    fn cleanup_branch(&self, branch: &str, written: &[Written]) {
        self.discard_writes(written);
        let default = &self.git_cfg.default_branch;
        if let Err(err) = self.git.checkout_branch(default) {
            let err = format!("{err:#}");
            warn!(err = %err, branch, "cleanup: could not check out default branch");
            return;
        }
        match self.git.delete_local_branch(branch) {
            Ok(()) => info!(branch, "cleanup: local branch deleted"),
            Err(err) => {
                warn!(err = %format!("{err:#}"), branch, "cleanup: could not delete branch");
            }
        }
    }

    /// Tracked files go back to HEAD; files this run created are removed.
    /// Files that existed untracked before the run are left as they are.
    fn discard_writes(&self, written: &[Written]) {
        for entry in written {
            let restored = self.git.restore_path(&entry.file).and_then(|in_head| {
                if in_head || entry.existed {
                    return Ok(());
                }
                self.workspace.delete(&entry.file).map(|_| ())
            });
            match restored {
                Ok(()) => debug!(file = %entry.file, "cleanup: file restored"),
                Err(err) => {
                    let err = format!("{err:#}");
                    warn!(err = %err, file = %entry.file, "cleanup: could not restore file");
                }
            }
        }
    }
}

pub fn commit_message(prefix: &str, plan: &Plan) -> String {
    let prefix = prefix.trim();
    let body = format!("{}: {}", plan.task_type(), plan.task_description().trim());
    if prefix.is_empty() {
        body
    } else {
        format!("{prefix} {body}")
    }
}

pub fn pr_title(plan: &Plan) -> String {
    format!(
        "{PR_TITLE_PREFIX} {}: {}",
        plan.task_type(),
        plan.task_description().trim()
    )
}

/// Markdown PR body: description, change list, checklist, signature.
pub fn render_pr_body(task: &str, changes: &[CodeChange]) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "## Description\n{}\n", task.trim());
    body.push_str("## Changes\n");
    for change in changes {
        let explanation = change.explanation.trim();
        let explanation = if explanation.is_empty() {
            "Changes"
        } else {
            explanation
        };
        let _ = writeln!(
            body,
            "- `[{}]` **{}**: {}",
            change.action.marker(),
            change.file,
            explanation
        );
    }
    body.push_str(
        "\n## Checklist\n\
         - [x] No sensitive files modified\n\
         - [x] Safety check passed\n\
         - [ ] Tests updated (if applicable)\n\
         - [ ] Manual review\n\
         \n---\n\
         *PR created automatically by Mikalia. Human review required before merge.*\n",
    );
    body
}

/// Per-file explanations for the follow-up comment, if any change has one.
pub fn render_change_notes(changes: &[CodeChange]) -> Option<String> {
    let explained: Vec<&CodeChange> = changes
        .iter()
        .filter(|change| !change.explanation.trim().is_empty())
        .collect();
    if explained.is_empty() {
        return None;
    }
    let mut body = String::from("### Change notes\n");
    for change in explained {
        let _ = write!(
            body,
            "\n**{}** ({})\n\n{}\n",
            change.file,
            change.action,
            change.explanation.trim()
        );
    }
    Some(body)
}
