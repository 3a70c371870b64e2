//! Stable exit codes for the agent CLI.

/// Task completed (PR opened, or dry run validated), or query command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config or environment, or a git/VCS failure.
pub const INVALID: i32 = 1;
/// A safety check refused the task, a path, a branch or a change.
pub const BLOCKED: i32 = 2;
/// Branch pushed but the pull request was not created.
pub const PARTIAL: i32 = 3;
/// Stopped without publishing: needs a human, or nothing was generated.
pub const STOPPED: i32 = 4;
