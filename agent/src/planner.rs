//! Task planning: one completion call turned into a safety-checked [`Plan`].

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::extract::{Extracted, Strategy, extract_json_object};
use crate::core::safety::SafetyGuard;
use crate::core::types::{Complexity, FileAction, Plan, SafetyResult, Step, TaskType};
use crate::io::completion::CompletionClient;
use crate::io::prompt::plan_request;

const DEFAULT_BRANCH_SLUG: &str = "task";
const MAX_SLUG_CHARS: usize = 60;

pub struct TaskPlanner<'a, C: CompletionClient + ?Sized> {
    client: &'a C,
    guard: &'a SafetyGuard,
}

impl<'a, C: CompletionClient + ?Sized> TaskPlanner<'a, C> {
    pub fn new(client: &'a C, guard: &'a SafetyGuard) -> Self {
        Self { client, guard }
    }

    /// Plan a task and attach the guard's verdict.
    ///
    /// An unparseable response yields [`Plan::safe_default`]. Only a failed
    /// completion call is an error.
    #[instrument(skip_all)]
    pub fn plan(&self, task: &str, repo_context: &str) -> Result<Plan> {
        info!(task, "planning task");
        let request = plan_request(task, repo_context)?;
        let response = self
            .client
            .complete(&request)
            .context("planning completion")?;

        let (plan, unreadable) = match extract_json_object(&response) {
            Extracted::Parsed { object, strategy } => {
                if strategy != Strategy::Direct {
                    info!(?strategy, "plan extracted from wrapped response");
                }
                (plan_from_object(task, &object), unreadable_estimates(&object))
            }
            Extracted::Unparsed => {
                warn!(
                    preview = %preview(&response),
                    "plan response unparseable, using safe default"
                );
                (Plan::safe_default(task), Vec::new())
            }
        };

        let files = plan.files_to_modify();
        let mut verdict = self.guard.validate_task(
            &files,
            plan.branch_name(),
            plan.estimated_lines() as usize,
        );
        // A size that cannot be read cannot pass the size limits.
        if verdict.allowed && !unreadable.is_empty() {
            verdict = SafetyResult::blocked(
                format!("Unreadable size estimate: {}", unreadable.join(", ")),
                "estimates must be non-negative numbers",
            );
        }
        if verdict.allowed {
            info!(
                steps = plan.steps().len(),
                files = files.len(),
                complexity = %plan.complexity(),
                branch = plan.branch_name(),
                "plan approved"
            );
        } else {
            warn!(reason = %verdict.reason, "plan blocked by safety");
        }
        Ok(plan.with_safety_check(verdict))
    }
}

/// Build a plan from a parsed response object.
///
/// Unknown `task_type` becomes `feat`, unknown `complexity` becomes `medium`,
/// unknown step actions become `modify`. Fractional or string estimates are
/// rounded up; unreadable ones fall back like missing ones (see
/// [`unreadable_estimates`]).
pub fn plan_from_object(task: &str, object: &Map<String, Value>) -> Plan {
    let task_type = str_field(object, "task_type")
        .and_then(TaskType::parse)
        .unwrap_or(TaskType::Feat);
    let complexity = str_field(object, "complexity")
        .and_then(Complexity::parse)
        .unwrap_or(Complexity::Medium);

    let steps: Vec<Step> = object
        .get("steps")
        .and_then(Value::as_array)
        .map(|raw| {
            raw.iter()
                .filter_map(Value::as_object)
                .enumerate()
                .map(|(idx, step)| parse_step(idx, step))
                .collect()
        })
        .unwrap_or_default();

    let slug = sanitize_slug(str_field(object, "branch_slug").unwrap_or(DEFAULT_BRANCH_SLUG));
    let estimated_files = count_field(object, "estimated_files")
        .value()
        .unwrap_or(u32::try_from(steps.len()).unwrap_or(u32::MAX));
    let estimated_lines = count_field(object, "estimated_lines").value().unwrap_or(0);

    Plan::new(
        task,
        task_type,
        steps,
        complexity,
        &slug,
        estimated_files,
        estimated_lines,
    )
}

fn parse_step(idx: usize, step: &Map<String, Value>) -> Step {
    let fallback_number = u32::try_from(idx + 1).unwrap_or(u32::MAX);
    let mut files: Vec<String> = Vec::new();
    for file in step
        .get("files")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|file| !file.is_empty())
    {
        if !files.iter().any(|seen| seen == file) {
            files.push(file.to_string());
        }
    }
    Step {
        number: count_field(step, "number").value().unwrap_or(fallback_number),
        description: str_field(step, "description").unwrap_or_default().to_string(),
        files,
        action: FileAction::parse_or_modify(str_field(step, "action").unwrap_or_default()),
    }
}

/// Reduce a model-provided slug to `[a-z0-9-]`, collapsing runs of `-`.
pub fn sanitize_slug(raw: &str) -> String {
    let mut slug = String::new();
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        DEFAULT_BRANCH_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

fn str_field<'o>(object: &'o Map<String, Value>, key: &str) -> Option<&'o str> {
    object.get(key).and_then(Value::as_str)
}

/// Size estimates present in a plan object but not readable as counts.
pub fn unreadable_estimates(object: &Map<String, Value>) -> Vec<&'static str> {
    ["estimated_files", "estimated_lines"]
        .into_iter()
        .filter(|key| count_field(object, key) == Count::Unreadable)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Count {
    Missing,
    Value(u32),
    Unreadable,
}

impl Count {
    fn value(self) -> Option<u32> {
        match self {
            Count::Value(n) => Some(n),
            Count::Missing | Count::Unreadable => None,
        }
    }
}

/// Integers, floats and numeric strings; floats round up, everything saturates.
fn count_field(object: &Map<String, Value>, key: &str) -> Count {
    let parsed = match object.get(key) {
        None | Some(Value::Null) => return Count::Missing,
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .or_else(|| n.as_f64().and_then(ceil_count)),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok().and_then(ceil_count),
        Some(_) => None,
    };
    parsed.map_or(Count::Unreadable, Count::Value)
}

fn ceil_count(n: f64) -> Option<u32> {
    // Float-to-int `as` saturates at u32::MAX.
    (n.is_finite() && n >= 0.0).then(|| n.ceil() as u32)
}

fn preview(text: &str) -> String {
    text.chars().take(300).collect()
}
