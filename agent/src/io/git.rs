//! Git adapter for the publisher.
//!
//! A small, explicit wrapper around `git` subprocess calls. Local commands run
//! directly; `pull` and `push` talk to the network and run under a timeout.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

const NETWORK_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    network_timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            network_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_network_timeout(self, network_timeout: Duration) -> Self {
        Self {
            network_timeout,
            ..self
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is clean, allowing entries with any of the given prefixes.
    #[instrument(skip_all)]
    pub fn ensure_clean_except_prefixes(&self, allowed_prefixes: &[&str]) -> Result<()> {
        let disallowed: Vec<StatusEntry> = self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| {
                !allowed_prefixes
                    .iter()
                    .any(|prefix| entry.path.starts_with(prefix))
            })
            .collect();
        if disallowed.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(disallowed_count = disallowed.len(), "worktree not clean");
        let mut msg = String::from("working tree not clean:\n");
        for entry in disallowed {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch. Never forced.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Fast-forward the current branch from `remote/branch`.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn pull_ff_only(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_network(&["pull", "--ff-only", remote, branch])
    }

    /// Push `branch` to `remote` under the same name and set upstream.
    ///
    /// Never forces.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push_set_upstream(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("{branch}:{branch}");
        self.run_network(&["push", "--set-upstream", remote, &refspec])
    }

    /// Stage exactly the given paths, including deletions.
    pub fn add_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Return `path` in the index and working tree to its HEAD version.
    ///
    /// A path absent from HEAD is only dropped from the index; returns false
    /// so the caller can decide about the file on disk.
    #[instrument(skip_all, fields(path))]
    pub fn restore_path(&self, path: &str) -> Result<bool> {
        let in_head = self
            .run(&["cat-file", "-e", &format!("HEAD:{path}")])?
            .status
            .success();
        if in_head {
            self.run_checked(&["checkout", "HEAD", "--", path])?;
        } else {
            self.run_checked(&["rm", "-q", "--cached", "--ignore-unmatch", "--", path])?;
        }
        Ok(in_head)
    }

    /// Force-delete a local branch (`branch -D`). The branch must not be checked out.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_local_branch(&self, branch: &str) -> Result<()> {
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Tracked files, in git's order.
    pub fn ls_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files", "-z"])?;
        Ok(out
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn run_network(&self, args: &[&str]) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        let output = run_command_with_timeout(
            cmd,
            None,
            self.network_timeout,
            NETWORK_OUTPUT_LIMIT_BYTES,
        )
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.succeeded() {
            let label = format!("git {}", args.join(" "));
            return Err(anyhow!(output.failure_summary(&label)));
        }
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(anyhow!("git {} failed: {}", args.join(" "), failure_detail(&output)));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// stderr, else stdout, else the exit status.
fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Some(text) = [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|text| !text.is_empty())
    {
        return text.to_string();
    }
    match output.status.code() {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? notes.md").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "notes.md".to_string()
            }
        );
    }

    #[test]
    fn parses_deleted_line() {
        let e = parse_status_line(" D src/old.py").expect("parse");
        assert_eq!(e.code, " D");
        assert_eq!(e.path, "src/old.py");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_status_line("M").is_err());
    }

    #[test]
    fn branch_lifecycle_in_real_repo() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        assert_eq!(git.current_branch().expect("branch"), "main");
        assert!(!git.branch_exists("mikalia/fix/x").expect("exists"));

        git.checkout_new_branch("mikalia/fix/x").expect("checkout -b");
        assert_eq!(git.current_branch().expect("branch"), "mikalia/fix/x");
        assert!(git.branch_exists("mikalia/fix/x").expect("exists"));

        git.checkout_branch("main").expect("checkout");
        git.delete_local_branch("mikalia/fix/x").expect("delete");
        assert!(!git.branch_exists("mikalia/fix/x").expect("exists"));
    }

    #[test]
    fn commit_staged_reports_empty_index() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        assert!(!git.commit_staged("nothing").expect("commit"));

        repo.write("docs/a b.md", "x\n").expect("write");
        git.add_paths(&["docs/a b.md".to_string()]).expect("add");
        assert!(git.commit_staged("docs: add").expect("commit"));
        assert_eq!(git.head_short_sha(7).expect("sha").len(), 7);
        assert_eq!(
            git.ls_files().expect("ls-files"),
            vec!["README.md".to_string(), "docs/a b.md".to_string()]
        );
    }

    #[test]
    fn restore_path_undoes_staged_edits() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        repo.write("README.md", "changed\n").expect("write");
        repo.write("docs/new.md", "new\n").expect("write");
        git.add_paths(&["README.md".to_string(), "docs/new.md".to_string()])
            .expect("add");

        assert!(git.restore_path("README.md").expect("restore tracked"));
        assert_eq!(repo.read("README.md").expect("read"), "hi\n");
        assert!(!git.restore_path("docs/new.md").expect("restore new"));
        assert!(!git.has_staged_changes().expect("staged"));
        // Untracked now; the file itself is left for the caller.
        assert_eq!(repo.read("docs/new.md").expect("read"), "new\n");
        assert!(!git.restore_path("never/written.md").expect("restore absent"));
    }

    #[test]
    fn failed_command_without_output_reports_exit_status() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        repo.write("README.md", "changed\n").expect("write");
        let err = git
            .run_checked(&["diff", "--quiet", "HEAD"])
            .expect_err("changed tree");
        assert_eq!(err.to_string(), "git diff --quiet HEAD failed: exit status 1");
    }

    #[test]
    fn untracked_files_make_worktree_dirty_unless_allowed() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        git.ensure_clean_except_prefixes(&[]).expect("clean");

        repo.write(".mikalia/config.toml", "").expect("write");
        git.ensure_clean_except_prefixes(&[".mikalia/"])
            .expect("config dir allowed");
        let err = git
            .ensure_clean_except_prefixes(&[])
            .expect_err("dirty");
        assert!(err.to_string().contains(".mikalia/"));
    }
}
