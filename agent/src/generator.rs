//! Change generation: one completion call per planned file.
//!
//! Every `(step, file)` pair is re-checked against the guard, then turned into
//! a [`CodeChange`]. A failure for one file drops that file only.

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::edits::{Edit, apply_edits};
use crate::core::extract::{Extracted, extract_json_object};
use crate::core::safety::SafetyGuard;
use crate::core::types::{CodeChange, FileAction, Plan, Step};
use crate::error::GenerationError;
use crate::io::completion::{CompletionClient, CompletionRequest};
use crate::io::prompt::{create_file_request, modify_file_request};
use crate::io::workspace::Workspace;

pub struct ChangeGenerator<'a, C: CompletionClient + ?Sized> {
    client: &'a C,
    guard: &'a SafetyGuard,
    workspace: &'a Workspace,
    file_prompt_chars: usize,
}

impl<'a, C: CompletionClient + ?Sized> ChangeGenerator<'a, C> {
    pub fn new(
        client: &'a C,
        guard: &'a SafetyGuard,
        workspace: &'a Workspace,
        file_prompt_chars: usize,
    ) -> Self {
        Self {
            client,
            guard,
            workspace,
            file_prompt_chars,
        }
    }

    /// Generate changes for every planned file, in plan order.
    #[instrument(skip_all, fields(steps = plan.steps().len()))]
    pub fn generate(&self, plan: &Plan, repo_context: &str) -> Vec<CodeChange> {
        let mut changes = Vec::new();
        for step in plan.steps() {
            for file in &step.files {
                match self.generate_file(plan.task_description(), step, file, repo_context) {
                    Ok(change) => {
                        info!(
                            file = %change.file,
                            action = %change.action,
                            lines = change.lines_changed(),
                            "change generated"
                        );
                        changes.push(change);
                    }
                    Err(err) => warn!(file = %file, step = step.number, err = %err, "file dropped"),
                }
            }
        }
        changes
    }

    fn generate_file(
        &self,
        task: &str,
        step: &Step,
        file: &str,
        repo_context: &str,
    ) -> Result<CodeChange, GenerationError> {
        let access = self.guard.check_file_access(file);
        if !access.allowed {
            return Err(GenerationError::Blocked(access.reason));
        }

        let exists = self.workspace.exists(file);
        if step.action == FileAction::Create || !exists {
            return self.generate_new_file(task, step, file, repo_context);
        }
        if step.action == FileAction::Delete {
            let original = self.workspace.read_or_empty(file);
            return Ok(CodeChange::delete(
                file,
                original,
                format!("File to delete: {}", step.description),
            ));
        }
        self.generate_modification(task, step, file, repo_context)
    }

    fn generate_new_file(
        &self,
        task: &str,
        step: &Step,
        file: &str,
        repo_context: &str,
    ) -> Result<CodeChange, GenerationError> {
        let request = create_file_request(task, &step.description, file, repo_context)
            .map_err(GenerationError::Completion)?;
        let object = self.complete_object(&request)?;
        let content = object
            .get("file_content")
            .and_then(Value::as_str)
            .ok_or(GenerationError::MissingField("file_content"))?;
        Ok(CodeChange::create(file, content, explanation(&object)))
    }

    fn generate_modification(
        &self,
        task: &str,
        step: &Step,
        file: &str,
        repo_context: &str,
    ) -> Result<CodeChange, GenerationError> {
        let original = self.workspace.read_or_empty(file);
        let request = modify_file_request(
            task,
            &step.description,
            file,
            &original,
            self.file_prompt_chars,
            repo_context,
        )
        .map_err(GenerationError::Completion)?;
        let object = self.complete_object(&request)?;

        let edits = parse_edits(&object);
        let outcome = apply_edits(&original, &edits);
        debug!(
            file,
            applied = outcome.applied,
            skipped = outcome.skipped,
            "edits applied"
        );
        if outcome.skipped > 0 {
            warn!(file, skipped = outcome.skipped, "some edits did not match");
        }
        if outcome.content == original {
            return Err(GenerationError::Unchanged);
        }
        Ok(CodeChange::modify(
            file,
            original,
            outcome.content,
            explanation(&object),
        ))
    }

    fn complete_object(
        &self,
        request: &CompletionRequest,
    ) -> Result<Map<String, Value>, GenerationError> {
        let response = self
            .client
            .complete(request)
            .map_err(GenerationError::Completion)?;
        match extract_json_object(&response) {
            Extracted::Parsed { object, .. } => Ok(object),
            Extracted::Unparsed => Err(GenerationError::Unparsed),
        }
    }
}

/// Edit pairs from `edits`; malformed entries are ignored.
fn parse_edits(object: &Map<String, Value>) -> Vec<Edit> {
    object
        .get("edits")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|raw| serde_json::from_value::<Edit>(raw.clone()).ok())
        .collect()
}

fn explanation(object: &Map<String, Value>) -> String {
    object
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::types::{Complexity, TaskType};
    use crate::test_support::ScriptedCompletion;

    type Run = (Vec<CodeChange>, usize);

    fn plan(steps: Vec<Step>) -> Plan {
        Plan::new("task", TaskType::Fix, steps, Complexity::Low, "x", 1, 10)
    }

    fn step(files: &[&str], action: FileAction) -> Step {
        Step {
            number: 1,
            description: "do it".to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            action,
        }
    }

    /// Generate a one-step plan; returns the changes and the completion call count.
    fn run(ws: &Workspace, responses: Vec<String>, files: &[&str], action: FileAction) -> Run {
        let client = ScriptedCompletion::new(responses);
        let guard = SafetyGuard::default();
        let generator = ChangeGenerator::new(&client, &guard, ws, 8000);
        let changes = generator.generate(&plan(vec![step(files, action)]), "");
        (changes, client.calls().len())
    }

    #[test]
    fn modify_applies_edits_to_disk_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("src/app.py", "def f(x):\n    return x.y\n").expect("write");
        let response = json!({
            "edits": [{"search": "return x.y", "replace": "return x.y if x else None"}],
            "explanation": "guard None"
        })
        .to_string();
        let (changes, calls) = run(&ws, vec![response], &["src/app.py"], FileAction::Modify);
        assert_eq!(calls, 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, FileAction::Modify);
        assert_eq!(changes[0].modified, "def f(x):\n    return x.y if x else None\n");
        assert_eq!(changes[0].explanation, "guard None");
    }

    #[test]
    fn missing_file_is_created_even_when_planned_as_modify() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let response = json!({"file_content": "x = 1\n", "explanation": "new"}).to_string();
        let (changes, _) = run(&ws, vec![response], &["src/new.py"], FileAction::Modify);
        assert_eq!(changes[0].action, FileAction::Create);
        assert_eq!(changes[0].modified, "x = 1\n");
    }

    #[test]
    fn delete_is_proposed_without_completion_or_filesystem_change() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("old.py", "a\nb\n").expect("write");
        let (changes, calls) = run(&ws, Vec::new(), &["old.py"], FileAction::Delete);
        assert_eq!(calls, 0);
        assert_eq!(changes[0].action, FileAction::Delete);
        assert_eq!(changes[0].original, "a\nb\n");
        assert!(ws.exists("old.py"));
    }

    #[test]
    fn blocked_file_is_skipped_without_completion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let response = json!({"file_content": "ok\n"}).to_string();
        let (changes, calls) = run(&ws, vec![response], &[".env", "notes.md"], FileAction::Create);
        assert_eq!(calls, 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file, "notes.md");
    }

    #[test]
    fn unparseable_response_drops_only_that_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let (changes, calls) = run(
            &ws,
            vec![
                "no json here".to_string(),
                json!({"file_content": "b\n"}).to_string(),
            ],
            &["a.md", "b.md"],
            FileAction::Create,
        );
        assert_eq!(calls, 2);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file, "b.md");
    }

    #[test]
    fn completion_error_drops_file_and_continues() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        // One scripted response for two files: the second call fails.
        let (changes, calls) = run(
            &ws,
            vec![json!({"file_content": "a\n"}).to_string()],
            &["a.md", "b.md"],
            FileAction::Create,
        );
        assert_eq!(calls, 2);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn non_matching_edits_drop_unchanged_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("a.py", "x = 1\n").expect("write");
        let response = json!({"edits": [{"search": "y = 2", "replace": "y = 3"}]}).to_string();
        let (changes, _) = run(&ws, vec![response], &["a.py"], FileAction::Modify);
        assert!(changes.is_empty());
    }

    #[test]
    fn malformed_edit_entries_are_ignored() {
        let object = json!({"edits": [42, {"search": "a", "replace": "b"}, "x"]});
        let edits = parse_edits(object.as_object().expect("object"));
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].search, "a");
    }
}
