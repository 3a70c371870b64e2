//! Prompt builders for the three completion call sites.
//!
//! Each builder returns a complete [`CompletionRequest`]: system prompt,
//! rendered user prompt, and the sampling parameters for that call site.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::io::completion::CompletionRequest;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const CREATE_FILE_TEMPLATE: &str = include_str!("prompts/create_file.md");
const MODIFY_FILE_TEMPLATE: &str = include_str!("prompts/modify_file.md");

const PLANNER_SYSTEM: &str = "You are a precise task planning engine. \
You ALWAYS respond with valid JSON only. \
No markdown fences, no explanations outside JSON.";

const GENERATOR_SYSTEM: &str = "You are a precise code generation engine. \
You ALWAYS respond with valid JSON only. \
No markdown fences, no explanations outside JSON, no preamble.";

const TEMPERATURE: f32 = 0.3;
const PLAN_MAX_TOKENS: u32 = 2048;
const FILE_MAX_TOKENS: u32 = 4096;

const NO_CONTEXT: &str = "No repository context available.";

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("plan", PLAN_TEMPLATE)
        .expect("plan template should be valid");
    env.add_template("create_file", CREATE_FILE_TEMPLATE)
        .expect("create_file template should be valid");
    env.add_template("modify_file", MODIFY_FILE_TEMPLATE)
        .expect("modify_file template should be valid");
    env
});

fn context_or_placeholder(repo_context: &str) -> &str {
    let trimmed = repo_context.trim();
    if trimmed.is_empty() { NO_CONTEXT } else { trimmed }
}

pub fn plan_request(task: &str, repo_context: &str) -> Result<CompletionRequest> {
    let rendered = ENGINE.get_template("plan")?.render(context! {
        task => task.trim(),
        context => context_or_placeholder(repo_context),
    })?;
    Ok(CompletionRequest {
        system_prompt: PLANNER_SYSTEM.to_string(),
        user_prompt: rendered,
        temperature: TEMPERATURE,
        max_tokens: PLAN_MAX_TOKENS,
    })
}

pub fn create_file_request(
    task: &str,
    step: &str,
    file: &str,
    repo_context: &str,
) -> Result<CompletionRequest> {
    let rendered = ENGINE.get_template("create_file")?.render(context! {
        task => task.trim(),
        step => step.trim(),
        file => file,
        context => context_or_placeholder(repo_context),
    })?;
    Ok(generator_request(rendered))
}

/// `content` is cut to `max_chars` characters before rendering.
pub fn modify_file_request(
    task: &str,
    step: &str,
    file: &str,
    content: &str,
    max_chars: usize,
    repo_context: &str,
) -> Result<CompletionRequest> {
    let (content, truncated) = truncate_chars(content, max_chars);
    let rendered = ENGINE.get_template("modify_file")?.render(context! {
        task => task.trim(),
        step => step.trim(),
        file => file,
        content => content,
        truncated => truncated,
        context => context_or_placeholder(repo_context),
    })?;
    Ok(generator_request(rendered))
}

fn generator_request(user_prompt: String) -> CompletionRequest {
    CompletionRequest {
        system_prompt: GENERATOR_SYSTEM.to_string(),
        user_prompt,
        temperature: TEMPERATURE,
        max_tokens: FILE_MAX_TOKENS,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}
