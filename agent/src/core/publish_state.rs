//! Publisher state machine.
//!
//! `idle -> branch_created -> changes_applied -> committed -> pushed -> pr_created`,
//! with `failed` reachable from any non-terminal stage. Transitions are
//! checked so the publisher cannot skip a stage or resume after a failure.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    Idle,
    BranchCreated,
    ChangesApplied,
    Committed,
    Pushed,
    PrCreated,
    Failed,
}

impl PublishStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishStage::Idle => "idle",
            PublishStage::BranchCreated => "branch_created",
            PublishStage::ChangesApplied => "changes_applied",
            PublishStage::Committed => "committed",
            PublishStage::Pushed => "pushed",
            PublishStage::PrCreated => "pr_created",
            PublishStage::Failed => "failed",
        }
    }

    /// The stage that legally follows this one on success.
    pub fn next(self) -> Option<PublishStage> {
        match self {
            PublishStage::Idle => Some(PublishStage::BranchCreated),
            PublishStage::BranchCreated => Some(PublishStage::ChangesApplied),
            PublishStage::ChangesApplied => Some(PublishStage::Committed),
            PublishStage::Committed => Some(PublishStage::Pushed),
            PublishStage::Pushed => Some(PublishStage::PrCreated),
            PublishStage::PrCreated | PublishStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PublishStage::PrCreated | PublishStage::Failed)
    }

    /// True once the branch exists on the remote.
    pub fn reached_remote(self) -> bool {
        matches!(self, PublishStage::Pushed | PublishStage::PrCreated)
    }

    /// Whether a local branch exists that cleanup should remove on failure.
    pub fn owns_local_branch(self) -> bool {
        matches!(
            self,
            PublishStage::BranchCreated | PublishStage::ChangesApplied | PublishStage::Committed
        )
    }
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal publish transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: PublishStage,
    pub to: PublishStage,
}

/// Current stage plus the stage the failure happened in, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishState {
    stage: PublishStage,
    failed_during: Option<PublishStage>,
}

impl Default for PublishState {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishState {
    pub fn new() -> Self {
        Self {
            stage: PublishStage::Idle,
            failed_during: None,
        }
    }

    pub fn stage(&self) -> PublishStage {
        self.stage
    }

    /// Stage that was active when `fail` was called.
    pub fn failed_during(&self) -> Option<PublishStage> {
        self.failed_during
    }

    pub fn advance(&mut self, to: PublishStage) -> Result<(), IllegalTransition> {
        if self.stage.next() != Some(to) {
            return Err(IllegalTransition {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), IllegalTransition> {
        if self.stage.is_terminal() {
            return Err(IllegalTransition {
                from: self.stage,
                to: PublishStage::Failed,
            });
        }
        self.failed_during = Some(self.stage);
        self.stage = PublishStage::Failed;
        Ok(())
    }
}
