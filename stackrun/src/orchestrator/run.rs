//! The stage orchestrator.

use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::result::{RunReport, StageResult};
use super::stage::{StageDef, StageMode};
use super::verify::VerificationContext;
use crate::core::RunState;
use crate::driver::LifecycleDriver;
use crate::errors::{HarnessError, HarnessResult, StageError, VerificationError};
use crate::events::{
    EventSink, NoOpEventSink, RUN_COMPLETED, RUN_FAILED, RUN_STARTED, STAGE_FAILED,
    STAGE_SKIPPED, STAGE_STARTED, STAGE_SUCCEEDED,
};
use crate::module::ModuleSpec;
use crate::outputs::{OutputMap, OutputView};
use crate::tracker::DeploymentTracker;

/// Runs stages strictly in order, threading outputs into later inputs.
///
/// The first failing stage ends the run; every later stage is recorded as
/// skipped and its driver is never called. Cleanup is the caller's job.
#[derive(Clone)]
pub struct Orchestrator {
    driver: Arc<dyn LifecycleDriver>,
    events: Arc<dyn EventSink>,
    stop: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over `driver`.
    #[must_use]
    pub fn new(driver: Arc<dyn LifecycleDriver>) -> Self {
        Self {
            driver,
            events: Arc::new(NoOpEventSink),
            stop: None,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Stops the run before the next stage once `stop` turns true. The stage
    /// in flight is not interrupted; the next one fails as interrupted and the
    /// rest are skipped.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Checks that identifiers are unique, specs are valid and every binding
    /// points at an earlier stage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending stage.
    pub fn validate(stages: &[StageDef]) -> HarnessResult<()> {
        let mut seen = HashSet::new();
        for stage in stages {
            stage.module.validate()?;
            let id = stage.identifier();
            for binding in &stage.bindings {
                if binding.from_stage == id {
                    return Err(HarnessError::configuration(
                        id,
                        format!("binding '{binding}' refers to the stage itself"),
                    ));
                }
                if !seen.contains(binding.from_stage.as_str()) {
                    return Err(HarnessError::configuration(
                        id,
                        format!(
                            "binding '{binding}' refers to '{}', which is not an earlier stage",
                            binding.from_stage
                        ),
                    ));
                }
            }
            if !seen.insert(id) {
                return Err(HarnessError::configuration(id, "duplicate stage identifier"));
            }
        }
        Ok(())
    }

    /// Executes `stages` in order, recording deployments in `tracker`.
    ///
    /// The tracker is reset first. Stage failures are recorded in the report;
    /// only an invalid stage list is returned as an error.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if [`validate`](Self::validate) fails.
    pub async fn run(
        &self,
        stages: &[StageDef],
        tracker: &DeploymentTracker,
    ) -> HarnessResult<RunReport> {
        Self::validate(stages)?;

        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id, stages = stages.len());
        self.execute(run_id, stages, tracker).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        stages: &[StageDef],
        tracker: &DeploymentTracker,
    ) -> HarnessResult<RunReport> {
        tracker.reset();
        let started_at = Utc::now();
        let total = stages.len();
        let mut state = RunState::NotStarted.advance(true, total);
        let mut results: Vec<StageResult> = Vec::with_capacity(total);
        let mut published: HashMap<String, OutputMap> = HashMap::new();

        info!(stages = total, "Run started");
        self.events
            .emit(RUN_STARTED, Some(json!({"run_id": run_id, "stages": total})))
            .await;

        for (index, stage) in stages.iter().enumerate() {
            if state.is_terminal() {
                info!(stage = %stage.identifier(), "Skipping stage after earlier failure");
                self.events
                    .emit(STAGE_SKIPPED, Some(json!({"stage": stage.identifier()})))
                    .await;
                results.push(StageResult::skipped(stage.identifier()));
                continue;
            }

            if self.stop_requested() {
                let err = HarnessError::Interrupted(format!(
                    "run stopped before stage '{}' started",
                    stage.identifier()
                ));
                warn!(stage = %stage.identifier(), "Stop requested, not starting stage");
                self.events
                    .emit(STAGE_FAILED, Some(json!({"stage": stage.identifier(), "error": err.to_string()})))
                    .await;
                results.push(StageResult::failure(StageError::from_harness(stage.identifier(), &err)));
                state = state.advance(false, total);
                continue;
            }

            let span = info_span!("stage", stage = %stage.identifier(), index);
            let result = self
                .run_stage(stage, &published, tracker)
                .instrument(span)
                .await;

            state = state.advance(result.succeeded(), total);
            if result.succeeded() {
                published.insert(result.identifier.clone(), result.outputs.clone());
            }
            results.push(result);
        }

        let report = RunReport {
            run_id,
            state,
            stages: results,
            started_at,
            ended_at: Utc::now(),
        };

        if report.is_success() {
            info!(deployed = tracker.len(), "Run completed");
            self.events
                .emit(RUN_COMPLETED, Some(json!({"run_id": run_id, "deployed": tracker.snapshot()})))
                .await;
        } else {
            warn!(summary = %report.summary(), "Run failed");
            self.events
                .emit(
                    RUN_FAILED,
                    Some(json!({
                        "run_id": run_id,
                        "stage": report.failed_stage().map(|s| s.identifier.clone()),
                        "deployed": tracker.snapshot(),
                    })),
                )
                .await;
        }

        Ok(report)
    }

    async fn run_stage(
        &self,
        stage: &StageDef,
        published: &HashMap<String, OutputMap>,
        tracker: &DeploymentTracker,
    ) -> StageResult {
        let id = stage.identifier();
        let started_at = Utc::now();
        info!(mode = ?stage.mode, "Stage started");
        self.events
            .emit(STAGE_STARTED, Some(json!({"stage": id, "mode": stage.mode})))
            .await;

        let result = match self.drive(stage, published, tracker).await {
            Ok(result) => result.with_started_at(started_at),
            Err(err) => {
                StageResult::failure(StageError::from_harness(id, &err)).with_started_at(started_at)
            }
        };

        match &result.error {
            None => {
                info!(outputs = result.outputs.len(), "Stage succeeded");
                self.events
                    .emit(
                        STAGE_SUCCEEDED,
                        Some(json!({"stage": id, "duration_ms": result.duration_ms()})),
                    )
                    .await;
            }
            Some(error) => {
                warn!(kind = %error.kind, error = %error.message, "Stage failed");
                self.events
                    .emit(STAGE_FAILED, Some(json!({"stage": id, "error": error.to_dict()})))
                    .await;
            }
        }

        result
    }

    async fn drive(
        &self,
        stage: &StageDef,
        published: &HashMap<String, OutputMap>,
        tracker: &DeploymentTracker,
    ) -> HarnessResult<StageResult> {
        let spec = resolve_inputs(stage, published)?;

        self.driver.initialize(&spec).await?;

        let result = match stage.mode {
            StageMode::Apply => {
                let applied = self.driver.apply(&spec).await?;
                tracker.mark_deployed(&spec);
                if !applied.succeeded() {
                    return Ok(applied);
                }
                applied
            }
            StageMode::PlanOnly => {
                let plan = self.driver.plan(&spec).await?;
                StageResult::planned(&spec.identifier, plan)
            }
        };

        verify(stage, &result)?;
        Ok(result)
    }
}

/// Merges bound outputs of earlier stages into the stage's module vars.
fn resolve_inputs(
    stage: &StageDef,
    published: &HashMap<String, OutputMap>,
) -> HarnessResult<ModuleSpec> {
    let mut spec = stage.module.clone();
    for binding in &stage.bindings {
        let value = published
            .get(&binding.from_stage)
            .and_then(|outputs| outputs.get(&binding.output_key))
            .filter(|v| !v.is_null());

        match value {
            Some(value) => {
                spec.vars.insert(binding.variable.clone(), value.clone());
            }
            None if binding.required => {
                return Err(HarnessError::configuration(
                    stage.identifier(),
                    format!(
                        "required input '{}' could not be resolved from output '{}' of stage '{}'",
                        binding.variable, binding.output_key, binding.from_stage
                    ),
                ));
            }
            None => {
                warn!(binding = %binding, "Optional input unresolved, omitting");
            }
        }
    }
    Ok(spec)
}

/// Runs every verifier, collecting all failures. A panicking verifier counts
/// as a failure.
fn verify(stage: &StageDef, result: &StageResult) -> Result<(), VerificationError> {
    let ctx = VerificationContext {
        stage: stage.identifier(),
        outputs: OutputView::new(&result.identifier, &result.outputs),
        plan: result.plan.as_ref(),
    };

    let mut failures = Vec::new();
    for verifier in &stage.verifiers {
        match catch_unwind(AssertUnwindSafe(|| verifier.verify(&ctx))) {
            Ok(Ok(())) => {}
            Ok(Err(messages)) => failures.extend(messages),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "verifier panicked".to_string());
                failures.push(format!("{} panicked: {message}", verifier.name()));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(VerificationError::with_failures(stage.identifier(), failures))
    }
}
