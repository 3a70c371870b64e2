//! Aggregate gate over the generated change set.
//!
//! Last check before anything touches the working tree or git:
//! - total size (`files`, summed `lines_changed`)
//! - every file path, against the same rules as planning
//! - every change's new content, against the dangerous-pattern list

use tracing::{info, warn};

use crate::core::safety::SafetyGuard;
use crate::core::types::{CodeChange, SafetyResult, Severity};

pub struct ChangeValidator<'a> {
    guard: &'a SafetyGuard,
}

impl<'a> ChangeValidator<'a> {
    pub fn new(guard: &'a SafetyGuard) -> Self {
        Self { guard }
    }

    /// Return the first non-allowed verdict, or an `ok` composite.
    ///
    /// A size `warning` does not stop the gate; it is logged and validation
    /// continues.
    pub fn validate(&self, changes: &[CodeChange]) -> SafetyResult {
        let total_lines: usize = changes.iter().map(CodeChange::lines_changed).sum();

        let size = self.guard.check_change_size(changes.len(), total_lines);
        if !size.allowed {
            return size;
        }
        if size.severity > Severity::Ok {
            warn!(reason = %size.reason, details = %size.details, "change size warning");
        }

        for change in changes {
            let access = self.guard.check_file_access(&change.file);
            if !access.allowed {
                return access;
            }
        }

        for change in changes {
            let content = self.guard.check_content_safety(&change.modified);
            if !content.allowed {
                return SafetyResult {
                    details: format!("{} ({})", content.details, change.file),
                    ..content
                };
            }
        }

        info!(
            files = changes.len(),
            lines = total_lines,
            "changes validated"
        );
        SafetyResult::ok("All changes validated")
    }
}
