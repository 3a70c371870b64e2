//! Test-only fakes and a throwaway git repository with a bare remote.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::io::completion::{CompletionClient, CompletionRequest};
use crate::io::host::{CreatedPr, PrHost, PrRequest};

/// Completion client that replays queued responses in order.
///
/// Every call is recorded, including calls made after the queue ran dry
/// (those return an error).
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    responses: RefCell<VecDeque<String>>,
    calls: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.borrow().clone()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted completion exhausted"))
    }
}

/// PR host that records requests and either accepts or refuses them.
#[derive(Debug, Default)]
pub struct RecordingHost {
    refuse: bool,
    requests: RefCell<Vec<PrRequest>>,
    comments: RefCell<Vec<(u64, String)>>,
}

impl RecordingHost {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<PrRequest> {
        self.requests.borrow().clone()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.borrow().clone()
    }
}

impl PrHost for RecordingHost {
    fn create_pr(&self, request: &PrRequest) -> Result<CreatedPr> {
        let mut requests = self.requests.borrow_mut();
        requests.push(request.clone());
        if self.refuse {
            bail!("gh pr create failed: authentication required");
        }
        let number = 41 + requests.len() as u64;
        Ok(CreatedPr {
            number,
            url: format!("https://github.com/example/repo/pull/{number}"),
        })
    }

    fn comment(&self, number: u64, body: &str) -> Result<()> {
        self.comments.borrow_mut().push((number, body.to_string()));
        Ok(())
    }
}

/// Git repository on `main` with one commit, pushed to a bare `origin`.
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
    remote: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().join("work");
        let remote = temp.path().join("origin.git");
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        fs::create_dir_all(&remote).with_context(|| format!("create {}", remote.display()))?;

        git_in(&remote, &["init", "--bare", "--quiet"])?;
        git_in(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"])?;

        git_in(&root, &["init", "--quiet"])?;
        git_in(&root, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        git_in(&root, &["config", "user.email", "test@example.com"])?;
        git_in(&root, &["config", "user.name", "test"])?;
        git_in(&root, &["config", "commit.gpgsign", "false"])?;

        let repo = Self {
            _temp: temp,
            root,
            remote,
        };
        repo.write("README.md", "hi\n")?;
        repo.commit_all("chore: init")?;
        let remote_path = repo.remote.display().to_string();
        repo.git(&["remote", "add", "origin", &remote_path])?;
        repo.git(&["push", "--quiet", "-u", "origin", "main"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        let path = self.root.join(relative);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage everything and commit on the current branch.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    /// Run git in the working copy and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        git_in(&self.root, args)
    }

    /// Branch names present on the bare remote.
    pub fn remote_branches(&self) -> Result<Vec<String>> {
        let out = git_in(
            &self.remote,
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// File content at the tip of a remote branch, trimmed.
    pub fn remote_file(&self, branch: &str, relative: &str) -> Result<String> {
        git_in(&self.remote, &["show", &format!("{branch}:{relative}")])
    }

    /// Subject line of the last commit on a remote branch.
    pub fn remote_subject(&self, branch: &str) -> Result<String> {
        git_in(&self.remote, &["log", "-1", "--format=%s", branch])
    }

    pub fn local_branches(&self) -> Result<Vec<String>> {
        let out = self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Install an executable hook script in the working copy's `.git/hooks`.
    #[cfg(unix)]
    pub fn install_hook(&self, name: &str, script: &str) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.root.join(".git").join("hooks").join(name);
        self.write(&format!(".git/hooks/{name}"), script)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", path.display()))
    }

    /// A remote URL with no repository behind it.
    pub fn unreachable_remote(&self) -> String {
        self.root.with_file_name("missing.git").display().to_string()
    }
}

fn git_in(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed in {}: {}",
            args.join(" "),
            dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
