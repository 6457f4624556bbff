//! Chainsaw - a declarative end-to-end test engine
//!
//! Tests are YAML documents made of steps. Each step runs `try`
//! operations against a cluster API, then `catch` diagnostics on failure,
//! then `finally` items, and everything a test creates is deleted again
//! at teardown.

pub mod bindings;
pub mod checks;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod clusters;
pub mod commands;
pub mod common;
pub mod expressions;
pub mod model;
pub mod namespacer;
pub mod operations;
pub mod report;
pub mod resource;
pub mod runner;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use runner::Runner;
