//! Search/replace edit application for `modify` changes.

use serde::{Deserialize, Serialize};

/// One edit pair returned by the modify-file completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub replace: String,
}

/// Content after applying edits, with counts for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub content: String,
    pub applied: usize,
    pub skipped: usize,
}

/// Apply edits sequentially, each replacing at most one exact occurrence.
///
/// Edits whose `search` is empty or absent from the current content are
/// skipped. Partial application is expected when the model saw a slightly
/// stale file.
pub fn apply_edits(original: &str, edits: &[Edit]) -> EditOutcome {
    let mut content = original.to_string();
    let mut applied = 0;
    let mut skipped = 0;
    for edit in edits {
        if edit.search.is_empty() || !content.contains(&edit.search) {
            skipped += 1;
            continue;
        }
        content = content.replacen(&edit.search, &edit.replace, 1);
        applied += 1;
    }
    EditOutcome {
        content,
        applied,
        skipped,
    }
}
