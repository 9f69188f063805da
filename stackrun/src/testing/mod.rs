//! Testing utilities for stackrun runs.
//!
//! This module provides:
//! - `MockDriver`, a scripted lifecycle driver recording every call
//! - `ScriptedRunner`, a command runner returning canned engine output
//! - Assertions over run reports and recorded driver calls

mod assertions;
mod driver;
mod runner;

pub use assertions::{
    assert_destroy_order, assert_never_invoked, assert_run_failed_at, assert_stage_status,
};
pub use driver::{MockDriver, Operation};
pub use runner::ScriptedRunner;
