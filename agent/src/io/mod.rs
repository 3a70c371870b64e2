//! I/O adapters for the pipeline: configuration, processes, completion
//! backends, git, the PR host, and the repository file system.

pub mod completion;
pub mod config;
pub mod git;
pub mod host;
pub mod process;
pub mod prompt;
pub mod workspace;
