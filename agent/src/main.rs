//! Autonomous code-change agent CLI.
//!
//! Plans a task with a completion backend, generates guarded edits and opens
//! a pull request from a `mikalia/...` branch. Configuration lives in
//! `<repo>/.mikalia/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mikalia_agent::agent::CodeAgent;
use mikalia_agent::core::classifier::classify_task;
use mikalia_agent::core::safety::SafetyGuard;
use mikalia_agent::core::types::SafetyResult;
use mikalia_agent::exit_codes;
use mikalia_agent::io::completion::client_from_config;
use mikalia_agent::io::config::{AgentConfig, config_path, load_config, write_config};
use mikalia_agent::io::host::GhCli;
use mikalia_agent::logging;

#[derive(Parser)]
#[command(
    name = "mikalia-agent",
    version,
    about = "Autonomous code-change agent: task in, guarded pull request out"
)]
struct Cli {
    /// Log stage progress to stderr (`RUST_LOG` overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, generate, validate and publish a task as a pull request.
    Run {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        task: String,
        /// Stop after validation; no branch, commit, push or PR.
        #[arg(long)]
        dry_run: bool,
        /// Print the result as JSON on stdout.
        #[arg(long)]
        json: bool,
        /// Config file (default: `<repo>/.mikalia/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the safety-checked plan for a task without generating code.
    Plan {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        task: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check whether the agent may touch each path.
    CheckPath {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check whether the agent may push a branch.
    CheckBranch {
        name: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Classify a task description without a completion call.
    Classify {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Write the default `.mikalia/config.toml`.
    Init {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            repo,
            task,
            dry_run,
            json,
            config,
        } => cmd_run(&repo, &task, dry_run, json, config.as_deref()),
        Command::Plan { repo, task, config } => cmd_plan(&repo, &task, config.as_deref()),
        Command::CheckPath {
            paths,
            repo,
            config,
        } => cmd_check_path(&paths, &repo, config.as_deref()),
        Command::CheckBranch { name, repo, config } => {
            cmd_check_branch(&name, &repo, config.as_deref())
        }
        Command::Classify { text } => {
            println!("{}", classify_task(&text.join(" ")));
            Ok(exit_codes::OK)
        }
        Command::Init { repo, force } => cmd_init(&repo, force),
    }
}

fn load(repo: &Path, config: Option<&Path>) -> Result<AgentConfig> {
    let path = config.map_or_else(|| config_path(repo), Path::to_path_buf);
    load_config(&path)
}

fn cmd_run(
    repo: &Path,
    task: &str,
    dry_run: bool,
    json: bool,
    config: Option<&Path>,
) -> Result<i32> {
    let cfg = load(repo, config)?;
    let client = client_from_config(&cfg.completion)?;
    let host = GhCli::new(repo, Duration::from_secs(cfg.github.pr_timeout_secs));
    let agent = CodeAgent::new(&*client, &host, &cfg);
    let result = agent.execute_task(repo, task, dry_run);

    if json {
        let report =
            serde_json::to_string_pretty(&result.to_json()).context("serialize result json")?;
        println!("{report}");
        return Ok(result.exit_code());
    }

    if !result.summary.is_empty() {
        println!("{}", result.summary);
    }
    if let Some(pr) = &result.pull_request
        && pr.is_created()
    {
        println!("\nPull request #{}: {}", pr.number, pr.url);
    }
    if let Some(err) = &result.error {
        eprintln!("{err}");
    } else if result.dry_run {
        println!("\nDry run: nothing was committed or pushed.");
    }
    Ok(result.exit_code())
}

fn cmd_plan(repo: &Path, task: &str, config: Option<&Path>) -> Result<i32> {
    let cfg = load(repo, config)?;
    let client = client_from_config(&cfg.completion)?;
    let host = GhCli::new(repo, Duration::from_secs(cfg.github.pr_timeout_secs));
    let agent = CodeAgent::new(&*client, &host, &cfg);
    let plan = agent.plan(repo, task)?;
    let payload = serde_json::to_string_pretty(&plan).context("serialize plan json")?;
    println!("{payload}");
    Ok(if plan.is_safe() {
        exit_codes::OK
    } else {
        exit_codes::BLOCKED
    })
}

fn cmd_check_path(paths: &[String], repo: &Path, config: Option<&Path>) -> Result<i32> {
    let guard = SafetyGuard::new(load(repo, config)?.safety);
    let mut code = exit_codes::OK;
    for path in paths {
        let result = guard.check_file_access(path);
        print_verdict(path, &result);
        if !result.allowed {
            code = exit_codes::BLOCKED;
        }
    }
    Ok(code)
}

fn cmd_check_branch(name: &str, repo: &Path, config: Option<&Path>) -> Result<i32> {
    let guard = SafetyGuard::new(load(repo, config)?.safety);
    let result = guard.check_branch_push(name);
    print_verdict(name, &result);
    Ok(if result.allowed {
        exit_codes::OK
    } else {
        exit_codes::BLOCKED
    })
}

fn print_verdict(subject: &str, result: &SafetyResult) {
    let verdict = if result.allowed { "allowed" } else { "refused" };
    println!(
        "{verdict}\t{}\t{subject}\t{}",
        result.severity, result.reason
    );
}

fn cmd_init(repo: &Path, force: bool) -> Result<i32> {
    if !repo.is_dir() {
        bail!("repository {} is not a directory", repo.display());
    }
    let path = config_path(repo);
    if path.exists() && !force {
        eprintln!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &AgentConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}
