//! Safety guard: the single authority on whether a path, branch, content
//! blob, or aggregate change size may proceed.
//!
//! Rules come in two kinds:
//!
//! - **Absolute** rules live in [`ABSOLUTE_RULES`], a compile-time constant.
//!   No configuration type carries them, so nothing loaded from disk can
//!   weaken or disable them.
//! - **Configurable** rules live in [`SafetyConfig`], injected into
//!   [`SafetyGuard::new`]. Configuration may tighten limits and add blocked
//!   paths; it cannot remove an absolute rule.
//!
//! Every check returns a [`SafetyResult`]. A failed check is a normal return
//! value, never an error.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::core::types::SafetyResult;

/// Rules that are never configurable.
#[derive(Debug)]
pub struct AbsoluteRules {
    /// Wildcard suffix patterns (`*.pem`). Matched by suffix.
    pub blocked_extensions: &'static [&'static str],
    /// Directory patterns (`secrets/`). Matched by prefix after stripping the trailing slash.
    pub blocked_directories: &'static [&'static str],
    /// File names. Matched exactly or as the final path segment.
    pub blocked_files: &'static [&'static str],
    /// Branches that are never pushed to.
    pub protected_branches: &'static [&'static str],
    /// Branch prefixes that follow the naming convention.
    pub branch_prefixes: &'static [&'static str],
    /// Content substrings that are never generated (case-insensitive).
    pub dangerous_patterns: &'static [&'static str],
    /// File names allowed regardless of the extension allowlist.
    pub extension_exceptions: &'static [&'static str],
}

pub const ABSOLUTE_RULES: AbsoluteRules = AbsoluteRules {
    blocked_extensions: &["*.pem", "*.key", "*.p12", "*.pfx"],
    blocked_directories: &["secrets/", "credentials/", ".github/workflows/"],
    blocked_files: &[".env", "mikalia-app.pem"],
    protected_branches: &["main", "master", "production", "release"],
    branch_prefixes: &[
        "mikalia/post/",
        "mikalia/fix/",
        "mikalia/feat/",
        "mikalia/docs/",
    ],
    dangerous_patterns: &[
        "rm -rf",
        "DROP TABLE",
        "DROP DATABASE",
        "DELETE FROM",
        "format c:",
        "os.system",
        "subprocess.call",
        "eval(",
        "exec(",
        "__import__",
    ],
    extension_exceptions: &[".gitignore", "Makefile", "Dockerfile", "LICENSE"],
};

/// Configurable safety limits (`[safety]` in the config file).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Hard limit on files touched by one PR.
    pub max_files_per_pr: usize,
    /// Hard limit on approximate lines changed by one PR.
    pub max_lines_changed: usize,
    /// Extensions (with leading dot) that may be modified.
    pub allowed_extensions: Vec<String>,
    /// Additional blocked patterns, same syntax as the absolute path rules.
    pub extra_blocked_paths: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        let allowed = [
            ".py", ".js", ".jsx", ".ts", ".tsx", ".md", ".txt", ".rst", ".yaml", ".yml", ".toml",
            ".json", ".html", ".css", ".scss", ".sh", ".bash", ".sql", ".go", ".rs", ".java",
            ".cs", ".rb", ".php", ".c", ".cpp", ".h", ".hpp", ".gitignore", ".env.example",
        ];
        Self {
            max_files_per_pr: 10,
            max_lines_changed: 500,
            allowed_extensions: allowed.iter().map(|ext| ext.to_string()).collect(),
            extra_blocked_paths: Vec::new(),
        }
    }
}

/// Fraction of a limit above which a size check warns.
const WARNING_RATIO: f64 = 0.8;

/// Stateless rule evaluator.
#[derive(Debug, Clone, Default)]
pub struct SafetyGuard {
    config: SafetyConfig,
}

impl SafetyGuard {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Check whether a repository-relative path may be read or written.
    ///
    /// Evaluation order: repository escape, blocked extensions, blocked
    /// directories, blocked files (all absolute, `critical`), configured
    /// extra patterns (`blocked`), then the extension allowlist (`blocked`).
    pub fn check_file_access(&self, file_path: &str) -> SafetyResult {
        let attempted = format!("attempted to access {file_path}");

        if escapes_repository(file_path) {
            return SafetyResult::critical(
                format!("Path escapes repository: {file_path}"),
                attempted,
            );
        }

        let normalized = normalize_path(file_path);
        let lower = normalized.to_lowercase();

        for pattern in ABSOLUTE_RULES.blocked_extensions {
            if matches_pattern(pattern, &lower) {
                return SafetyResult::critical(
                    format!("Blocked file extension: {pattern}"),
                    attempted,
                );
            }
        }
        for pattern in ABSOLUTE_RULES.blocked_directories {
            if matches_pattern(pattern, &lower) {
                return SafetyResult::critical(format!("Blocked path: {pattern}"), attempted);
            }
        }
        for pattern in ABSOLUTE_RULES.blocked_files {
            if matches_pattern(pattern, &lower) {
                return SafetyResult::critical(format!("Blocked file: {pattern}"), attempted);
            }
        }
        for pattern in &self.config.extra_blocked_paths {
            if matches_pattern(pattern, &lower) {
                return SafetyResult::blocked(
                    format!("Blocked by configuration: {pattern}"),
                    attempted,
                );
            }
        }

        let slashed = file_path.trim_end();
        if normalized.trim().is_empty() || slashed.ends_with('/') || slashed.ends_with('\\') {
            return SafetyResult::blocked(format!("Not a file path: {file_path:?}"), attempted);
        }

        let file_name = normalized.rsplit('/').next().unwrap_or_default();
        if let Some(extension) = dotted_extension(file_name)
            && !self.extension_allowed(&extension)
            && !ABSOLUTE_RULES.extension_exceptions.contains(&file_name)
            && !self.extension_allowed(file_name)
        {
            let preview: Vec<&str> = self
                .config
                .allowed_extensions
                .iter()
                .take(10)
                .map(String::as_str)
                .collect();
            return SafetyResult::blocked(
                format!("Extension not allowed: {extension}"),
                format!("allowed extensions: {}...", preview.join(", ")),
            );
        }

        SafetyResult::ok("File allowed")
    }

    /// Check aggregate change size against the configured limits.
    ///
    /// `blocked` above either limit, `warning` above 80% of either limit.
    pub fn check_change_size(&self, files_changed: usize, lines_changed: usize) -> SafetyResult {
        let max_files = self.config.max_files_per_pr;
        let max_lines = self.config.max_lines_changed;

        if files_changed > max_files {
            return SafetyResult::blocked(
                format!("Too many files: {files_changed} (max: {max_files})"),
                "Consider splitting the change into smaller PRs.",
            );
        }
        if lines_changed > max_lines {
            return SafetyResult::blocked(
                format!("Too many lines changed: {lines_changed} (max: {max_lines})"),
                "Large changes need human review.",
            );
        }
        if files_changed as f64 > max_files as f64 * WARNING_RATIO
            || lines_changed as f64 > max_lines as f64 * WARNING_RATIO
        {
            return SafetyResult::warning(
                "Large change but within limits",
                format!("files: {files_changed}/{max_files}, lines: {lines_changed}/{max_lines}"),
            );
        }
        SafetyResult::ok("Change size acceptable")
    }

    /// Check whether a branch may be pushed.
    ///
    /// Protected branches are refused (`critical`). Branches outside the
    /// naming convention are allowed with a warning.
    pub fn check_branch_push(&self, branch_name: &str) -> SafetyResult {
        if self.is_protected_branch(branch_name) {
            return SafetyResult::critical(
                format!("Protected branch: {branch_name}"),
                "Protected branches are never pushed to directly; open a PR instead.",
            );
        }
        if !ABSOLUTE_RULES
            .branch_prefixes
            .iter()
            .any(|prefix| branch_name.starts_with(prefix))
        {
            return SafetyResult::warning(
                format!("Branch does not follow naming convention: {branch_name}"),
                format!(
                    "expected prefixes: {}",
                    ABSOLUTE_RULES.branch_prefixes.join(", ")
                ),
            );
        }
        SafetyResult::ok("Branch allowed")
    }

    /// Scan generated content for dangerous patterns (case-insensitive substring).
    pub fn check_content_safety(&self, content: &str) -> SafetyResult {
        let lower = content.to_lowercase();
        for pattern in ABSOLUTE_RULES.dangerous_patterns {
            if lower.contains(&pattern.to_lowercase()) {
                return SafetyResult::critical(
                    format!("Dangerous pattern detected: '{pattern}'"),
                    "Generated content contains potentially destructive operations.",
                );
            }
        }
        SafetyResult::ok("Content safe")
    }

    /// Composite task check: every file, then size, then branch.
    ///
    /// Returns the first non-allowed result, so a given input always reports
    /// the same reason.
    pub fn validate_task(
        &self,
        files: &[String],
        target_branch: &str,
        total_lines: usize,
    ) -> SafetyResult {
        for file in files {
            let result = self.check_file_access(file);
            if !result.allowed {
                error!(file = %file, reason = %result.reason, "task blocked: file");
                return result;
            }
        }

        let result = self.check_change_size(files.len(), total_lines);
        if !result.allowed {
            error!(reason = %result.reason, "task blocked: size");
            return result;
        }

        let result = self.check_branch_push(target_branch);
        if !result.allowed {
            error!(branch = %target_branch, reason = %result.reason, "task blocked: branch");
            return result;
        }

        info!(
            files = files.len(),
            lines = total_lines,
            branch = %target_branch,
            "task validated"
        );
        SafetyResult::ok("Task validated")
    }

    pub fn is_blocked_path(&self, path: &str) -> bool {
        !self.check_file_access(path).allowed
    }

    /// True for allowlisted extensions and for paths without an extension.
    pub fn is_allowed_extension(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        let file_name = normalized.rsplit('/').next().unwrap_or_default();
        match dotted_extension(file_name) {
            Some(extension) => self.extension_allowed(&extension),
            None => true,
        }
    }

    pub fn is_protected_branch(&self, branch: &str) -> bool {
        ABSOLUTE_RULES
            .protected_branches
            .iter()
            .any(|protected| protected.eq_ignore_ascii_case(branch.trim()))
    }

    fn extension_allowed(&self, extension: &str) -> bool {
        self.config
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}

/// Match a lower-cased normalized path against one blocked-path pattern.
fn matches_pattern(pattern: &str, lower_path: &str) -> bool {
    let pattern = pattern.to_lowercase();
    if let Some(suffix) = pattern.strip_prefix('*') {
        return lower_path.ends_with(suffix);
    }
    if pattern.ends_with('/') {
        return lower_path.starts_with(pattern.trim_end_matches('/'));
    }
    lower_path == pattern || lower_path.ends_with(&format!("/{pattern}"))
}

/// Forward slashes, no empty or `.` segments.
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn escapes_repository(path: &str) -> bool {
    let slashed = path.replace('\\', "/");
    if slashed.starts_with('/') {
        return true;
    }
    let bytes = slashed.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    slashed.split('/').any(|segment| segment == "..")
}

/// `Some(".ext")` lower-cased, or `None` for names without an extension
/// (dotfiles like `.gitignore` have none).
fn dotted_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;

    fn guard() -> SafetyGuard {
        SafetyGuard::default()
    }

    fn strict_guard() -> SafetyGuard {
        SafetyGuard::new(SafetyConfig {
            max_files_per_pr: 3,
            max_lines_changed: 50,
            ..SafetyConfig::default()
        })
    }

    #[test]
    fn env_file_is_critical() {
        let result = guard().check_file_access(".env");
        assert!(!result.allowed);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.reason, "Blocked file: .env");
    }

    #[test]
    fn env_file_in_subdirectory_is_critical() {
        let result = guard().check_file_access("config/.env");
        assert!(!result.allowed);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn key_material_is_critical() {
        for path in ["certs/server.pem", "id_rsa.KEY", "bundle.p12", "a/b.pfx"] {
            let result = guard().check_file_access(path);
            assert!(!result.allowed, "{path} should be blocked");
            assert_eq!(result.severity, Severity::Critical, "{path}");
            assert!(result.reason.starts_with("Blocked file extension"), "{path}");
        }
    }

    #[test]
    fn blocked_directories_are_critical() {
        for path in [
            "secrets/token.txt",
            "credentials/aws.json",
            ".github/workflows/ci.yml",
            ".GitHub\\Workflows\\deploy.yml",
            "./secrets/x.py",
        ] {
            let result = guard().check_file_access(path);
            assert!(!result.allowed, "{path} should be blocked");
            assert_eq!(result.severity, Severity::Critical, "{path}");
        }
    }

    #[test]
    fn repository_escape_is_critical() {
        for path in ["../outside.py", "src/../../etc/passwd", "/etc/hosts.txt", "C:\\x.py"] {
            let result = guard().check_file_access(path);
            assert!(!result.allowed, "{path} should be blocked");
            assert_eq!(result.severity, Severity::Critical, "{path}");
        }
    }

    #[test]
    fn directory_and_empty_paths_are_blocked() {
        for path in ["", "   ", ".", "./", "src/", "src\\", "a/./"] {
            let result = guard().check_file_access(path);
            assert!(!result.allowed, "{path:?} should be blocked");
            assert_eq!(result.severity, Severity::Blocked, "{path:?}");
            assert!(result.reason.starts_with("Not a file path"), "{path:?}");
        }
        // Absolute rules still win for blocked directories.
        assert_eq!(guard().check_file_access("secrets/").severity, Severity::Critical);
    }

    #[test]
    fn source_files_are_allowed() {
        for path in ["src/app.py", "README.md", "config.yaml", "src/lib.rs"] {
            let result = guard().check_file_access(path);
            assert!(result.allowed, "{path} should be allowed");
            assert_eq!(result.severity, Severity::Ok);
        }
    }

    #[test]
    fn unknown_extension_is_blocked_not_critical() {
        let result = guard().check_file_access("tool.exe");
        assert!(!result.allowed);
        assert_eq!(result.severity, Severity::Blocked);
        assert_eq!(result.reason, "Extension not allowed: .exe");
    }

    #[test]
    fn extensionless_and_exception_files_are_allowed() {
        for path in ["Makefile", "Dockerfile", "LICENSE", ".gitignore", "bin/run"] {
            assert!(guard().check_file_access(path).allowed, "{path}");
        }
    }

    #[test]
    fn absolute_rules_ignore_configuration() {
        let permissive = SafetyGuard::new(SafetyConfig {
            max_files_per_pr: usize::MAX,
            max_lines_changed: usize::MAX,
            allowed_extensions: vec![
                ".pem".to_string(),
                ".key".to_string(),
                ".env".to_string(),
                ".yml".to_string(),
            ],
            extra_blocked_paths: Vec::new(),
        });
        for path in [".env", "server.pem", "deploy.key", "secrets/a.yml", ".github/workflows/x.yml"]
        {
            let result = permissive.check_file_access(path);
            assert!(!result.allowed, "{path}");
            assert_eq!(result.severity, Severity::Critical, "{path}");
        }
        for branch in ["main", "master", "production", "release"] {
            assert!(!permissive.check_branch_push(branch).allowed, "{branch}");
        }
    }

    #[test]
    fn extra_blocked_paths_only_tighten() {
        let guarded = SafetyGuard::new(SafetyConfig {
            extra_blocked_paths: vec!["vendor/".to_string(), "*.lock".to_string()],
            ..SafetyConfig::default()
        });
        let vendor = guarded.check_file_access("vendor/lib.py");
        assert!(!vendor.allowed);
        assert_eq!(vendor.severity, Severity::Blocked);
        assert!(!guarded.check_file_access("Cargo.lock").allowed);
        assert!(guarded.check_file_access("src/main.py").allowed);
    }

    #[test]
    fn protected_branches_are_critical() {
        for branch in ["main", "master", "production", "release"] {
            let result = guard().check_branch_push(branch);
            assert!(!result.allowed, "{branch}");
            assert_eq!(result.severity, Severity::Critical, "{branch}");
        }
    }

    #[test]
    fn convention_branch_is_ok() {
        let result = guard().check_branch_push("mikalia/fix/null-check");
        assert!(result.allowed);
        assert_eq!(result.severity, Severity::Ok);
    }

    #[test]
    fn non_convention_branch_warns_but_allows() {
        let result = guard().check_branch_push("feature/x");
        assert!(result.allowed);
        assert_eq!(result.severity, Severity::Warning);
    }

    #[test]
    fn change_size_limits() {
        let small = strict_guard().check_change_size(1, 10);
        assert!(small.allowed);
        assert_eq!(small.severity, Severity::Ok);

        let files = strict_guard().check_change_size(4, 10);
        assert!(!files.allowed);
        assert_eq!(files.severity, Severity::Blocked);

        let lines = strict_guard().check_change_size(1, 51);
        assert!(!lines.allowed);
        assert_eq!(lines.severity, Severity::Blocked);

        let near = strict_guard().check_change_size(1, 45);
        assert!(near.allowed);
        assert_eq!(near.severity, Severity::Warning);
    }

    #[test]
    fn change_size_default_file_limit() {
        let result = guard().check_change_size(11, 50);
        assert!(!result.allowed);
        assert_eq!(result.severity, Severity::Blocked);
    }

    #[test]
    fn change_size_is_monotonic() {
        let guard = strict_guard();
        let mut was_blocked = false;
        for lines in 0..200 {
            let allowed = guard.check_change_size(1, lines).allowed;
            if was_blocked {
                assert!(!allowed, "lines={lines} flipped back to allowed");
            }
            was_blocked |= !allowed;
        }
        assert!(was_blocked);

        let mut was_blocked = false;
        for files in 0..20 {
            let allowed = guard.check_change_size(files, 0).allowed;
            if was_blocked {
                assert!(!allowed, "files={files} flipped back to allowed");
            }
            was_blocked |= !allowed;
        }
        assert!(was_blocked);
    }

    #[test]
    fn dangerous_content_is_critical() {
        for content in [
            "os.system('ls')",
            "cleanup: rm -rf /tmp/x",
            "drop table users;",
            "value = eval(expr)",
        ] {
            let result = guard().check_content_safety(content);
            assert!(!result.allowed, "{content}");
            assert_eq!(result.severity, Severity::Critical);
        }
        assert!(
            guard()
                .check_content_safety("def add(a, b):\n    return a + b\n")
                .allowed
        );
    }

    #[test]
    fn validate_task_passes_clean_input() {
        let files = vec!["src/app.py".to_string(), "tests/test_app.py".to_string()];
        let result = guard().validate_task(&files, "mikalia/feat/thing", 40);
        assert!(result.allowed);
        assert_eq!(result.reason, "Task validated");
    }

    #[test]
    fn validate_task_reports_path_before_size_before_branch() {
        let guard = strict_guard();
        let files = vec!["src/app.py".to_string(), ".env".to_string()];
        let result = guard.validate_task(&files, "main", 10_000);
        assert_eq!(result.reason, "Blocked file: .env");

        let files = vec!["src/app.py".to_string()];
        let result = guard.validate_task(&files, "main", 10_000);
        assert!(result.reason.starts_with("Too many lines changed"));

        let result = guard.validate_task(&files, "main", 1);
        assert_eq!(result.reason, "Protected branch: main");
    }

    #[test]
    fn convenience_predicates() {
        let guard = guard();
        assert!(guard.is_blocked_path(".env"));
        assert!(!guard.is_blocked_path("src/app.py"));
        assert!(guard.is_allowed_extension("a.py"));
        assert!(guard.is_allowed_extension("Makefile"));
        assert!(!guard.is_allowed_extension("a.exe"));
        assert!(guard.is_protected_branch("main"));
        assert!(!guard.is_protected_branch("mikalia/feat/x"));
    }
}
