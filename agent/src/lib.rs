//! Autonomous code-change agent.
//!
//! Turns a natural-language task into a pull request: plan, safety gate,
//! generate, validate, publish. Every model-proposed path, branch and edit
//! passes the [`core::safety::SafetyGuard`] before it touches the repository.
//!
//! - **[`core`]**: pure logic (safety rules, classification, response parsing,
//!   edit application, publish state). No I/O.
//! - **[`io`]**: side effects (git, `gh`, completion backends, config, files).
//!
//! [`agent::CodeAgent`] sequences [`planner`], [`generator`] and
//! [`publisher`] into `execute_task`.

pub mod agent;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod generator;
pub mod io;
pub mod logging;
pub mod planner;
pub mod publisher;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
