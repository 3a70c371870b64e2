//! Pipeline error taxonomy.
//!
//! [`PipelineError`] is what stops a run. Plan parse failures and per-file
//! generation failures are recovered where they happen and never appear here.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::core::publish_state::PublishStage;
use crate::core::types::SafetyResult;

/// Stage of `execute_task` that produced a result or stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "publish_stage")]
pub enum PipelineStage {
    Plan,
    /// The plan's upfront safety verdict and complexity check.
    TaskGate,
    Generate,
    Validate,
    /// Publisher, with the stage it was in when it stopped.
    Publish(PublishStage),
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Plan => f.write_str("plan"),
            PipelineStage::TaskGate => f.write_str("task gate"),
            PipelineStage::Generate => f.write_str("generate"),
            PipelineStage::Validate => f.write_str("validate"),
            PipelineStage::Publish(stage) => write!(f, "publish ({stage})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A guard refused; `result.reason` is reported verbatim.
    #[error("blocked by safety at {stage}: {}", .result.reason)]
    SafetyViolation {
        stage: PipelineStage,
        result: SafetyResult,
    },

    #[error("task needs a human: planned complexity is needs_human")]
    NeedsHuman,

    #[error("no code changes could be generated")]
    NoChanges,

    /// A git or file system step failed. `stage` is the last stage reached.
    #[error("publish failed after {stage}: {message}")]
    Vcs {
        stage: PublishStage,
        message: String,
    },

    /// The branch reached the remote but the host did not open a PR.
    #[error("branch {branch} was pushed but the pull request was not created")]
    PartialPr { branch: String },

    /// Anything that prevented the pipeline from starting or running a stage
    /// (missing repository, completion transport failure, ...).
    #[error("{0}")]
    Setup(String),
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::SafetyViolation { stage, .. } => *stage,
            PipelineError::NeedsHuman => PipelineStage::TaskGate,
            PipelineError::NoChanges => PipelineStage::Generate,
            PipelineError::Vcs { stage, .. } => PipelineStage::Publish(*stage),
            PipelineError::PartialPr { .. } => PipelineStage::Publish(PublishStage::Pushed),
            PipelineError::Setup(_) => PipelineStage::Plan,
        }
    }

    pub fn is_safety_block(&self) -> bool {
        matches!(self, PipelineError::SafetyViolation { .. })
    }
}

/// Why one file produced no change. Logged, then the file is dropped.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("blocked: {0}")]
    Blocked(String),

    #[error("completion failed: {0:#}")]
    Completion(anyhow::Error),

    #[error("completion response contained no JSON object")]
    Unparsed,

    #[error("completion response is missing `{0}`")]
    MissingField(&'static str),

    #[error("no edit changed the file")]
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_message_carries_exact_reason() {
        let err = PipelineError::SafetyViolation {
            stage: PipelineStage::TaskGate,
            result: SafetyResult::critical("Blocked file: .env", ""),
        };
        assert_eq!(
            err.to_string(),
            "blocked by safety at task gate: Blocked file: .env"
        );
        assert!(err.is_safety_block());
    }

    #[test]
    fn stages_map_to_where_the_run_stopped() {
        assert_eq!(PipelineError::NeedsHuman.stage(), PipelineStage::TaskGate);
        assert_eq!(PipelineError::NoChanges.stage(), PipelineStage::Generate);
        let vcs = PipelineError::Vcs {
            stage: PublishStage::Committed,
            message: "x".to_string(),
        };
        assert_eq!(vcs.stage(), PipelineStage::Publish(PublishStage::Committed));
        assert_eq!(vcs.to_string(), "publish failed after committed: x");
    }

    #[test]
    fn publish_stage_displays_inner_stage() {
        assert_eq!(
            PipelineStage::Publish(PublishStage::Pushed).to_string(),
            "publish (pushed)"
        );
    }
}
