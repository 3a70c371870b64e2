//! Keyword classification of task descriptions.
//!
//! Used when a full plan is unnecessary. No completion call is made.

use crate::core::types::TaskType;

const SECURITY_KEYWORDS: &[&str] = &[
    "security",
    "vulnerability",
    "cve",
    "injection",
    "xss",
    "auth",
];
const FIX_KEYWORDS: &[&str] = &["fix", "bug", "error", "crash", "broken", "issue", "patch"];
const DOCS_KEYWORDS: &[&str] = &[
    "readme",
    "docs",
    "documentation",
    "comment",
    "docstring",
    "typo",
];
const POST_KEYWORDS: &[&str] = &["post", "blog", "article", "write about"];

/// Classify a task by keyword, checked in priority order
/// `security > fix > docs > post`, defaulting to `feat`.
///
/// Security sits first so a security task is never filed as an ordinary feature.
pub fn classify_task(description: &str) -> TaskType {
    let lower = description.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|kw| lower.contains(kw));

    if mentions(SECURITY_KEYWORDS) {
        TaskType::Security
    } else if mentions(FIX_KEYWORDS) {
        TaskType::Fix
    } else if mentions(DOCS_KEYWORDS) {
        TaskType::Docs
    } else if mentions(POST_KEYWORDS) {
        TaskType::Post
    } else {
        TaskType::Feat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fix() {
        assert_eq!(classify_task("Fix crash when config is empty"), TaskType::Fix);
        assert_eq!(classify_task("There is a bug in the parser"), TaskType::Fix);
    }

    #[test]
    fn classifies_docs() {
        assert_eq!(classify_task("Update the README"), TaskType::Docs);
        assert_eq!(classify_task("Add docstring to helpers"), TaskType::Docs);
    }

    #[test]
    fn classifies_security_case_insensitively() {
        assert_eq!(classify_task("Patch CVE-2024-1234"), TaskType::Security);
        assert_eq!(classify_task("Prevent XSS in templates"), TaskType::Security);
    }

    #[test]
    fn classifies_post() {
        assert_eq!(classify_task("Write about agents on the blog"), TaskType::Post);
    }

    #[test]
    fn defaults_to_feat() {
        assert_eq!(classify_task("Add CSV export"), TaskType::Feat);
    }

    #[test]
    fn security_outranks_fix() {
        assert_eq!(
            classify_task("Fix SQL injection in login form"),
            TaskType::Security
        );
    }

    #[test]
    fn fix_outranks_docs() {
        assert_eq!(classify_task("Fix typo handling bug"), TaskType::Fix);
    }

    #[test]
    fn classification_is_stable() {
        for text in ["Fix it", "Add docs", "new feature", "security review"] {
            assert_eq!(classify_task(text), classify_task(text));
        }
    }
}
