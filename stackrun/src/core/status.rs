//! Stage status and run state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not run yet.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage applied (or planned) and verified.
    Succeeded,
    /// Stage failed to apply or verify.
    Failed,
    /// Stage was not executed because an earlier stage failed.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// State of an orchestration run.
///
/// `NotStarted -> Running(i) -> Completed | FailedAt(i)`. The index is the
/// zero-based position of the stage in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    /// Nothing has executed.
    #[default]
    NotStarted,
    /// The stage at this index is executing.
    Running(usize),
    /// Every stage succeeded.
    Completed,
    /// The stage at this index failed; later stages were skipped.
    FailedAt(usize),
}

impl RunState {
    /// Moves to the next state after the stage at the current index finished.
    ///
    /// `total` is the number of stages in the run. Terminal states are returned
    /// unchanged.
    #[must_use]
    pub fn advance(self, succeeded: bool, total: usize) -> Self {
        match self {
            Self::NotStarted if total == 0 => Self::Completed,
            Self::NotStarted => Self::Running(0),
            Self::Running(i) if !succeeded => Self::FailedAt(i),
            Self::Running(i) if i + 1 >= total => Self::Completed,
            Self::Running(i) => Self::Running(i + 1),
            terminal => terminal,
        }
    }

    /// Returns true once the run has finished either way.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedAt(_))
    }

    /// Returns the failing stage index, if the run failed.
    #[must_use]
    pub fn failed_at(&self) -> Option<usize> {
        match self {
            Self::FailedAt(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running(i) => write!(f, "running({i})"),
            Self::Completed => write!(f, "completed"),
            Self::FailedAt(i) => write!(f, "failed_at({i})"),
        }
    }
}
