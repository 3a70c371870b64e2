//! Shared deterministic types for the plan/gate/apply/publish pipeline.
//!
//! These types define stable contracts between pipeline stages. They do not
//! depend on external state or I/O, and serialize to stable JSON so the CLI
//! can report results verbatim.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Escalation level of a single guard verdict (`ok < warning < blocked < critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Proceed.
    Ok,
    /// Proceed, but a human should look.
    Warning,
    /// Do not proceed; a different approach is needed.
    Blocked,
    /// An absolute rule was violated; stop immediately.
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Blocked => "blocked",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of one safety check. Produced fresh by every guard call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyResult {
    pub allowed: bool,
    pub reason: String,
    pub severity: Severity,
    /// Extra context for logs and notifications. May be empty.
    pub details: String,
}

impl SafetyResult {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            severity: Severity::Ok,
            details: String::new(),
        }
    }

    pub fn warning(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            severity: Severity::Warning,
            details: details.into(),
        }
    }

    pub fn blocked(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            severity: Severity::Blocked,
            details: details.into(),
        }
    }

    pub fn critical(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            severity: Severity::Critical,
            details: details.into(),
        }
    }
}

/// Kind of work a task represents. Drives branch prefix, labels, and commit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Fix,
    Feat,
    Docs,
    Security,
    Post,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Fix => "fix",
            TaskType::Feat => "feat",
            TaskType::Docs => "docs",
            TaskType::Security => "security",
            TaskType::Post => "post",
        }
    }

    /// Parse a wire value. Unknown values return `None`; callers pick the fallback.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fix" => Some(TaskType::Fix),
            "feat" => Some(TaskType::Feat),
            "docs" => Some(TaskType::Docs),
            "security" => Some(TaskType::Security),
            "post" => Some(TaskType::Post),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated complexity of a planned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// 1-3 files, simple edits.
    Low,
    /// 3-7 files, new logic.
    Medium,
    /// 7+ files, significant refactor.
    High,
    /// Too complex or risky to run without a human.
    NeedsHuman,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
            Complexity::NeedsHuman => "needs_human",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Complexity::Low),
            "medium" => Some(Complexity::Medium),
            "high" => Some(Complexity::High),
            "needs_human" => Some(Complexity::NeedsHuman),
            _ => None,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step (and the resulting change) does to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Modify,
    Create,
    Delete,
}

impl FileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FileAction::Modify => "modify",
            FileAction::Create => "create",
            FileAction::Delete => "delete",
        }
    }

    /// Unknown actions fall back to `modify`.
    pub fn parse_or_modify(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => FileAction::Create,
            "delete" => FileAction::Delete,
            _ => FileAction::Modify,
        }
    }

    /// One-character marker used in summaries and PR bodies.
    pub fn marker(self) -> char {
        match self {
            FileAction::Modify => 'M',
            FileAction::Create => '+',
            FileAction::Delete => '-',
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned unit of work. Steps execute in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub number: u32,
    pub description: String,
    /// Relative paths, de-duplicated, in the order the planner listed them.
    pub files: Vec<String>,
    pub action: FileAction,
}

/// Whether a plan came from a parsed completion or is the safe default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    Parsed,
    /// The completion response could not be parsed; the plan is the safe default.
    Unparsed,
}

/// Branch name slug used by the safe-default plan.
pub const UNPARSED_BRANCH_SLUG: &str = "unparsed-task";

/// Structured, ordered plan for a task plus its safety verdict.
///
/// Fields are private so the `mikalia/{task_type}/{slug}` branch invariant
/// holds and the safety verdict is attached exactly once: re-planning builds
/// a new `Plan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    task_description: String,
    task_type: TaskType,
    steps: Vec<Step>,
    complexity: Complexity,
    branch_name: String,
    estimated_files: u32,
    estimated_lines: u32,
    origin: PlanOrigin,
    safety_check: Option<SafetyResult>,
}

impl Plan {
    pub fn new(
        task_description: impl Into<String>,
        task_type: TaskType,
        steps: Vec<Step>,
        complexity: Complexity,
        branch_slug: &str,
        estimated_files: u32,
        estimated_lines: u32,
    ) -> Self {
        Self {
            task_description: task_description.into(),
            task_type,
            steps,
            complexity,
            branch_name: branch_name_for(task_type, branch_slug),
            estimated_files,
            estimated_lines,
            origin: PlanOrigin::Parsed,
            safety_check: None,
        }
    }

    /// Plan returned when the completion response cannot be parsed.
    ///
    /// `feat`, `needs_human`, zero steps: the pipeline always stops on it.
    pub fn safe_default(task_description: impl Into<String>) -> Self {
        Self {
            origin: PlanOrigin::Unparsed,
            ..Self::new(
                task_description,
                TaskType::Feat,
                Vec::new(),
                Complexity::NeedsHuman,
                UNPARSED_BRANCH_SLUG,
                0,
                0,
            )
        }
    }

    /// Attach the safety verdict, consuming the unchecked plan.
    pub fn with_safety_check(self, result: SafetyResult) -> Self {
        Self {
            safety_check: Some(result),
            ..self
        }
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn estimated_files(&self) -> u32 {
        self.estimated_files
    }

    pub fn estimated_lines(&self) -> u32 {
        self.estimated_lines
    }

    pub fn origin(&self) -> PlanOrigin {
        self.origin
    }

    pub fn safety_check(&self) -> Option<&SafetyResult> {
        self.safety_check.as_ref()
    }

    /// True iff a safety verdict is attached and it allows the plan.
    pub fn is_safe(&self) -> bool {
        self.safety_check.as_ref().is_some_and(|check| check.allowed)
    }

    /// De-duplicated, order-preserving union of every step's files.
    ///
    /// An upfront estimate only; the generated changes are the ground truth.
    pub fn files_to_modify(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for step in &self.steps {
            for file in &step.files {
                if seen.insert(file.as_str()) {
                    files.push(file.clone());
                }
            }
        }
        files
    }
}

/// Build the branch name for a task type and slug.
pub fn branch_name_for(task_type: TaskType, slug: &str) -> String {
    format!("mikalia/{}/{}", task_type.as_str(), slug)
}

/// Concrete before/after content for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file: String,
    pub action: FileAction,
    pub original: String,
    pub modified: String,
    pub explanation: String,
}

impl CodeChange {
    pub fn create(
        file: impl Into<String>,
        content: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            action: FileAction::Create,
            original: String::new(),
            modified: content.into(),
            explanation: explanation.into(),
        }
    }

    pub fn modify(
        file: impl Into<String>,
        original: impl Into<String>,
        modified: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            action: FileAction::Modify,
            original: original.into(),
            modified: modified.into(),
            explanation: explanation.into(),
        }
    }

    pub fn delete(
        file: impl Into<String>,
        original: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            action: FileAction::Delete,
            original: original.into(),
            modified: String::new(),
            explanation: explanation.into(),
        }
    }

    /// Approximate change size used by the size gate.
    ///
    /// `create` counts the new lines, `delete` the removed lines, `modify` the
    /// symmetric difference of the two line *sets*. This is not a diff: moved
    /// or duplicated lines are not counted.
    pub fn lines_changed(&self) -> usize {
        match self.action {
            FileAction::Create => self.modified.lines().count(),
            FileAction::Delete => self.original.lines().count(),
            FileAction::Modify => {
                let before: HashSet<&str> = self.original.lines().collect();
                let after: HashSet<&str> = self.modified.lines().collect();
                before.symmetric_difference(&after).count()
            }
        }
    }
}

/// Review state of a pull request on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Open,
    Approved,
    ChangesRequested,
    Merged,
    Closed,
}

/// Pull request opened for a published branch.
///
/// `number == 0` with an empty `url` records a failed creation; it is still
/// reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub branch: String,
    pub status: PrStatus,
    pub labels: BTreeSet<String>,
}

impl PullRequest {
    /// Placeholder for a PR the host refused to create.
    pub fn not_created(
        title: impl Into<String>,
        branch: impl Into<String>,
        labels: BTreeSet<String>,
    ) -> Self {
        Self {
            number: 0,
            url: String::new(),
            title: title.into(),
            branch: branch.into(),
            status: PrStatus::Open,
            labels,
        }
    }

    pub fn is_created(&self) -> bool {
        self.number > 0 && !self.url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(number: u32, files: &[&str], action: FileAction) -> Step {
        Step {
            number,
            description: format!("step {number}"),
            files: files.iter().map(|f| f.to_string()).collect(),
            action,
        }
    }

    #[test]
    fn severity_orders_by_escalation() {
        assert!(Severity::Ok < Severity::Warning);
        assert!(Severity::Warning < Severity::Blocked);
        assert!(Severity::Blocked < Severity::Critical);
    }

    #[test]
    fn branch_name_follows_convention() {
        let plan = Plan::new(
            "fix it",
            TaskType::Fix,
            Vec::new(),
            Complexity::Low,
            "null-check",
            1,
            3,
        );
        assert_eq!(plan.branch_name(), "mikalia/fix/null-check");
    }

    #[test]
    fn files_to_modify_is_deduplicated_in_order() {
        let plan = Plan::new(
            "task",
            TaskType::Feat,
            vec![
                step(1, &["src/a.py", "src/b.py"], FileAction::Modify),
                step(2, &["src/b.py", "src/c.py"], FileAction::Create),
            ],
            Complexity::Medium,
            "task",
            3,
            10,
        );
        assert_eq!(plan.files_to_modify(), vec!["src/a.py", "src/b.py", "src/c.py"]);
    }

    #[test]
    fn is_safe_requires_attached_allowed_check() {
        let plan = Plan::new("t", TaskType::Feat, Vec::new(), Complexity::Low, "t", 0, 0);
        assert!(!plan.is_safe());

        let allowed = plan.clone().with_safety_check(SafetyResult::ok("fine"));
        assert!(allowed.is_safe());

        let blocked = plan.with_safety_check(SafetyResult::blocked("no", ""));
        assert!(!blocked.is_safe());
    }

    #[test]
    fn safe_default_plan_stops_the_pipeline() {
        let plan = Plan::safe_default("anything");
        assert_eq!(plan.task_type(), TaskType::Feat);
        assert_eq!(plan.complexity(), Complexity::NeedsHuman);
        assert!(plan.steps().is_empty());
        assert_eq!(plan.origin(), PlanOrigin::Unparsed);
        assert_eq!(plan.branch_name(), "mikalia/feat/unparsed-task");
    }

    #[test]
    fn lines_changed_per_action() {
        let create = CodeChange::create("a.py", "one\ntwo\nthree\n", "");
        assert_eq!(create.lines_changed(), 3);

        let delete = CodeChange::delete("a.py", "one\ntwo\n", "");
        assert_eq!(delete.lines_changed(), 2);

        let modify = CodeChange::modify("a.py", "a\nb\nc\n", "a\nB\nc\nd\n", "");
        // removed {b}, added {B, d}
        assert_eq!(modify.lines_changed(), 3);
    }

    #[test]
    fn lines_changed_ignores_reordering() {
        let modify = CodeChange::modify("a.py", "a\nb\n", "b\na\n", "");
        assert_eq!(modify.lines_changed(), 0);
    }

    #[test]
    fn enum_wire_values_are_stable() {
        assert_eq!(
            serde_json::to_string(&Complexity::NeedsHuman).expect("json"),
            "\"needs_human\""
        );
        assert_eq!(
            serde_json::to_string(&PrStatus::ChangesRequested).expect("json"),
            "\"changes_requested\""
        );
        assert_eq!(TaskType::parse("SECURITY"), Some(TaskType::Security));
        assert_eq!(TaskType::parse("chore"), None);
        assert_eq!(FileAction::parse_or_modify("rename"), FileAction::Modify);
    }
}
