//! CLI tests: spawn the binary and check stdout and exit codes for the
//! commands that need no completion backend.

use std::process::{Command, Output};

use mikalia_agent::exit_codes;
use mikalia_agent::io::config::{config_path, load_config};

fn agent(args: &[&str], dir: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mikalia-agent"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn mikalia-agent")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn check_path_reports_each_verdict_and_blocks_on_any_refusal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent(&["check-path", "src/app.py", ".env"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::BLOCKED));
    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("allowed\tok\tsrc/app.py"));
    assert_eq!(lines[1], "refused\tcritical\t.env\tBlocked file: .env");
}

#[test]
fn check_path_allows_plain_source_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent(&["check-path", "docs/guide.md"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn check_branch_refuses_protected_and_unprefixed_names() {
    let temp = tempfile::tempdir().expect("tempdir");
    let main = agent(&["check-branch", "main"], temp.path());
    assert_eq!(main.status.code(), Some(exit_codes::BLOCKED));
    assert!(stdout(&main).starts_with("refused\tcritical\tmain"));

    let ok = agent(&["check-branch", "mikalia/fix/null-check"], temp.path());
    assert_eq!(ok.status.code(), Some(exit_codes::OK));
}

#[test]
fn classify_prints_task_type() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent(&["classify", "Patch", "the", "XSS", "in", "login"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output).trim(), "security");
}

#[test]
fn init_writes_loadable_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent(&["init"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let path = config_path(temp.path());
    assert!(path.exists());
    let cfg = load_config(&path).expect("load");
    assert_eq!(cfg.git.default_branch, "main");
    assert_eq!(cfg.safety.max_files_per_pr, 10);
}

#[test]
fn config_can_tighten_path_rules() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = temp.path().join("strict.toml");
    std::fs::write(&cfg, "[safety]\nextra_blocked_paths = [\"vendor/\"]\n").expect("write");
    let output = agent(
        &["check-path", "vendor/lib.py", "--config", "strict.toml"],
        temp.path(),
    );
    assert_eq!(output.status.code(), Some(exit_codes::BLOCKED));
    assert!(stdout(&output).starts_with("refused\tblocked\tvendor/lib.py"));
}

#[test]
fn invalid_config_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = temp.path().join("bad.toml");
    std::fs::write(&cfg, "[safety]\nmax_files_per_pr = 0\n").expect("write");
    let output = agent(&["check-branch", "main", "--config", "bad.toml"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}
