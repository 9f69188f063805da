//! Sequential stage orchestration.
//!
//! This module provides:
//! - `StageDef` and `InputBinding` describing a run
//! - `Verifier`, `FnVerifier` and declarative `Expectation`s
//! - `StageResult` and `RunReport`
//! - The `Orchestrator` that drives stages in order and stops at the first failure

mod result;
mod run;
mod stage;
mod verify;

pub use result::{RunReport, StageResult};
pub use run::Orchestrator;
pub use stage::{InputBinding, StageDef, StageMode};
pub use verify::{Expectation, ExpectationVerifier, FnVerifier, VerificationContext, Verifier};
