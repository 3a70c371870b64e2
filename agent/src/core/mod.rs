//! Deterministic, pure logic shared by the pipeline stages.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod edits;
pub mod extract;
pub mod publish_state;
pub mod safety;
pub mod types;
pub mod validator;
