//! Stage results and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{RunState, StageStatus};
use crate::engine::PlanDiff;
use crate::errors::StageError;
use crate::outputs::{OutputMap, OutputView};

/// Outcome of one stage. Never mutated once the stage has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage (module) identifier.
    pub identifier: String,
    /// Final status.
    pub status: StageStatus,
    /// Outputs published by the module.
    #[serde(default)]
    pub outputs: OutputMap,
    /// Why the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    /// Plan computed by a plan-only stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanDiff>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    fn new(identifier: impl Into<String>, status: StageStatus) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            status,
            outputs: OutputMap::new(),
            error: None,
            plan: None,
            started_at: now,
            ended_at: now,
        }
    }

    /// A successful stage with its outputs.
    #[must_use]
    pub fn success(identifier: impl Into<String>, outputs: OutputMap) -> Self {
        Self {
            outputs,
            ..Self::new(identifier, StageStatus::Succeeded)
        }
    }

    /// A successful plan-only stage.
    #[must_use]
    pub fn planned(identifier: impl Into<String>, plan: PlanDiff) -> Self {
        Self {
            plan: Some(plan),
            ..Self::new(identifier, StageStatus::Succeeded)
        }
    }

    /// A failed stage.
    #[must_use]
    pub fn failure(error: StageError) -> Self {
        Self {
            error: Some(error.clone()),
            ..Self::new(error.stage, StageStatus::Failed)
        }
    }

    /// A stage that never ran.
    #[must_use]
    pub fn skipped(identifier: impl Into<String>) -> Self {
        Self::new(identifier, StageStatus::Skipped)
    }

    /// Sets the start timestamp.
    #[must_use]
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    /// Accessor view over the stage's outputs.
    #[must_use]
    pub fn view(&self) -> OutputView<'_> {
        OutputView::new(&self.identifier, &self.outputs)
    }

    /// Stage duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Final state.
    pub state: RunState,
    /// One result per stage, in stage order.
    pub stages: Vec<StageResult>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub ended_at: DateTime<Utc>,
}

impl RunReport {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Returns the result of the stage that failed.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.state.failed_at().and_then(|i| self.stages.get(i))
    }

    /// Looks up a stage result by identifier.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.identifier == identifier)
    }

    /// Identifiers of stages with the given status, in stage order.
    #[must_use]
    pub fn with_status(&self, status: StageStatus) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.identifier.as_str())
            .collect()
    }

    /// One-line pass/fail summary naming the failing stage and reason.
    #[must_use]
    pub fn summary(&self) -> String {
        let succeeded = self.with_status(StageStatus::Succeeded).len();
        match self.failed_stage() {
            None => format!(
                "run {} completed: {succeeded}/{} stages succeeded",
                self.run_id,
                self.stages.len()
            ),
            Some(stage) => {
                let reason = stage
                    .error
                    .as_ref()
                    .map_or_else(|| "unknown error".to_string(), ToString::to_string);
                format!(
                    "run {} failed at stage '{}': {reason} ({} skipped)",
                    self.run_id,
                    stage.identifier,
                    self.with_status(StageStatus::Skipped).len()
                )
            }
        }
    }
}
