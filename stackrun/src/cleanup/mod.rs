//! Failsafe teardown of deployed modules.
//!
//! This module provides:
//! - `FailsafeCleanup`, the best-effort reverse-order destroy loop
//! - `run_with_failsafe`, which guarantees cleanup runs after a failed,
//!   timed out, interrupted or panicking run

mod failsafe;
mod guard;

pub use failsafe::{CleanupFailure, CleanupReport, FailsafeCleanup};
pub use guard::{run_with_failsafe, FailsafeOptions, FailsafeOutcome, Termination};
