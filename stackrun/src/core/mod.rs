//! Core status types shared by the orchestrator and its reports.

mod status;

pub use status::{RunState, StageStatus};
