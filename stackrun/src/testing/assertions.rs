//! Assertions over run reports and recorded driver calls.

use super::driver::MockDriver;
use crate::core::{RunState, StageStatus};
use crate::orchestrator::RunReport;

/// Asserts the driver destroyed exactly `expected`, in that order.
pub fn assert_destroy_order(driver: &MockDriver, expected: &[&str]) {
    let actual = driver.destroyed();
    assert_eq!(
        actual, expected,
        "Expected destroy order {expected:?}, got {actual:?}"
    );
}

/// Asserts the driver never touched `module`.
pub fn assert_never_invoked(driver: &MockDriver, module: &str) {
    let calls = driver.calls_for(module);
    assert_eq!(
        calls, 0,
        "Expected no driver calls for '{module}', got {calls}: {:?}",
        driver.calls()
    );
}

/// Asserts the stage finished with `expected` status.
pub fn assert_stage_status(report: &RunReport, stage: &str, expected: StageStatus) {
    let actual = report.get(stage).map(|s| s.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {actual:?}"
    );
}

/// Asserts the run failed at `stage`.
pub fn assert_run_failed_at(report: &RunReport, stage: &str) {
    let index = report.stages.iter().position(|s| s.identifier == stage);
    assert!(index.is_some(), "Stage '{stage}' is not part of the run");
    assert_eq!(
        Some(report.state),
        index.map(RunState::FailedAt),
        "Expected run to fail at '{stage}', got {}",
        report.state
    );
}
