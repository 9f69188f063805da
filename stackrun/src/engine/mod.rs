//! Subprocess plumbing for the provisioning engine.
//!
//! This module provides:
//! - The `CommandRunner` port and its tokio implementation
//! - Engine command-line formatting
//! - Decoding of `show -json` plan documents

mod args;
mod plan;
mod runner;

pub use args::{format_var, EngineCommand, PLAN_FILE};
pub use plan::{ChangeAction, PlanDiff, ResourceChange};
pub use runner::{CommandOutput, CommandRunner, Invocation, TokioCommandRunner};

#[cfg(test)]
pub use runner::MockCommandRunner;
