//! File system access rooted at the target repository.
//!
//! Paths are repository-relative strings as they appear in plans and
//! changes. Callers run them through the safety guard first; this module
//! only joins, reads and writes.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::git::Git;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(relative).is_file()
    }

    /// Read as UTF-8, replacing invalid sequences.
    pub fn read_lossy(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Like [`Workspace::read_lossy`], but unreadable files read as empty.
    pub fn read_or_empty(&self, relative: &str) -> String {
        match self.read_lossy(relative) {
            Ok(content) => content,
            Err(err) => {
                debug!(file = relative, err = %err, "unreadable file treated as empty");
                String::new()
            }
        }
    }

    /// Write content, creating parent directories and overwriting.
    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))
    }

    /// Remove a file. Returns `false` if it was already absent.
    pub fn delete(&self, relative: &str) -> Result<bool> {
        let path = self.resolve(relative);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("delete {}", path.display())),
        }
    }
}

/// Minimal repository context for prompts: tracked files, capped.
///
/// Falls back to an empty context when the directory is not a git checkout.
pub fn repo_context(git: &Git, max_files: usize) -> String {
    let files = match git.ls_files() {
        Ok(files) => files,
        Err(err) => {
            debug!(err = %err, "no tracked file listing available");
            return String::new();
        }
    };
    let total = files.len();
    let mut out = format!("Tracked files ({total}):\n");
    for file in files.iter().take(max_files) {
        out.push_str("- ");
        out.push_str(file);
        out.push('\n');
    }
    if total > max_files {
        out.push_str(&format!("... and {} more\n", total - max_files));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_creates_parents_and_overwrites() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("a/b/c.txt", "one").expect("write");
        ws.write("a/b/c.txt", "two").expect("overwrite");
        assert_eq!(ws.read_lossy("a/b/c.txt").expect("read"), "two");
        assert!(ws.exists("a/b/c.txt"));
    }

    #[test]
    fn read_replaces_invalid_utf8() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("bin.txt"), [b'o', b'k', 0xff]).expect("write");
        let ws = Workspace::new(temp.path());
        assert_eq!(ws.read_lossy("bin.txt").expect("read"), "ok\u{fffd}");
    }

    #[test]
    fn missing_file_reads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        assert_eq!(ws.read_or_empty("nope.txt"), "");
        assert!(!ws.exists("nope.txt"));
    }

    #[test]
    fn delete_reports_absence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("x.txt", "x").expect("write");
        assert!(ws.delete("x.txt").expect("delete"));
        assert!(!ws.delete("x.txt").expect("delete again"));
    }

    #[test]
    fn context_without_git_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(repo_context(&Git::new(temp.path()), 10), "");
    }
}
