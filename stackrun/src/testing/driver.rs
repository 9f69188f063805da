//! Scripted lifecycle driver.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use crate::driver::{with_retry, LifecycleDriver};
use crate::engine::PlanDiff;
use crate::errors::{HarnessError, HarnessResult, StageError};
use crate::module::ModuleSpec;
use crate::orchestrator::StageResult;
use crate::outputs::{parse_output_map, OutputMap};

/// A driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `initialize`
    Initialize,
    /// `plan`
    Plan,
    /// `apply`
    Apply,
    /// `destroy`
    Destroy,
    /// `outputs`
    Outputs,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialize => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Outputs => "output",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
enum Fault {
    Transient(String),
    Fatal(String),
    Configuration(String),
    Panic,
}

#[derive(Debug, Default)]
struct Faults {
    queued: VecDeque<Fault>,
    permanent: Option<Fault>,
}

/// In-memory [`LifecycleDriver`] for tests.
///
/// Every attempt is recorded in order. Faults are scripted per module and
/// operation; transient faults go through the module's retry policy exactly
/// like the engine driver does.
#[derive(Debug, Default)]
pub struct MockDriver {
    outputs: HashMap<String, OutputMap>,
    raw_outputs: HashMap<String, String>,
    plans: HashMap<String, PlanDiff>,
    delays: HashMap<String, Duration>,
    faults: Mutex<HashMap<(String, Operation), Faults>>,
    calls: Mutex<Vec<(Operation, String)>>,
    applied: Mutex<Vec<ModuleSpec>>,
    destroyed: Mutex<Vec<String>>,
}

impl MockDriver {
    /// Creates a driver where every operation succeeds with no outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs published by `module` after apply.
    #[must_use]
    pub fn with_outputs(mut self, module: impl Into<String>, outputs: OutputMap) -> Self {
        self.outputs.insert(module.into(), outputs);
        self
    }

    /// Raw `output -json` text returned for `module`, decoded like engine
    /// output by both `outputs` and `apply`.
    #[must_use]
    pub fn fail_outputs(mut self, module: impl Into<String>, raw: impl Into<String>) -> Self {
        self.raw_outputs.insert(module.into(), raw.into());
        self
    }

    /// Plan returned for `module`.
    #[must_use]
    pub fn with_plan(mut self, module: impl Into<String>, plan: PlanDiff) -> Self {
        self.plans.insert(module.into(), plan);
        self
    }

    /// Every operation on `module` takes this long.
    #[must_use]
    pub fn with_delay(mut self, module: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(module.into(), delay);
        self
    }

    /// The first `times` attempts of `op` on `module` fail with a transient error.
    #[must_use]
    pub fn fail_transient(
        self,
        module: impl Into<String>,
        op: Operation,
        times: usize,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        self.faults
            .lock()
            .entry((module.into(), op))
            .or_default()
            .queued
            .extend(std::iter::repeat(Fault::Transient(message)).take(times));
        self
    }

    /// Every attempt of `op` on `module` fails with a fatal engine error.
    #[must_use]
    pub fn fail_fatal(self, module: impl Into<String>, op: Operation, message: impl Into<String>) -> Self {
        self.set_permanent(module.into(), op, Fault::Fatal(message.into()))
    }

    /// Every attempt of `op` on `module` fails with a configuration error.
    #[must_use]
    pub fn fail_configuration(
        self,
        module: impl Into<String>,
        op: Operation,
        message: impl Into<String>,
    ) -> Self {
        self.set_permanent(module.into(), op, Fault::Configuration(message.into()))
    }

    /// Every attempt of `op` on `module` panics.
    #[must_use]
    pub fn panic_on(self, module: impl Into<String>, op: Operation) -> Self {
        self.set_permanent(module.into(), op, Fault::Panic)
    }

    fn set_permanent(self, module: String, op: Operation, fault: Fault) -> Self {
        self.faults.lock().entry((module, op)).or_default().permanent = Some(fault);
        self
    }

    /// Every recorded attempt, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(Operation, String)> {
        self.calls.lock().clone()
    }

    /// Number of attempts of any operation on `module`.
    #[must_use]
    pub fn calls_for(&self, module: &str) -> usize {
        self.calls.lock().iter().filter(|(_, m)| m == module).count()
    }

    /// Number of attempts of `op` on `module`.
    #[must_use]
    pub fn count(&self, module: &str, op: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(o, m)| *o == op && m == module)
            .count()
    }

    /// Modules applied successfully, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().iter().map(|s| s.identifier.clone()).collect()
    }

    /// Specs of successful applies, in order, with bound inputs merged.
    #[must_use]
    pub fn applied_specs(&self) -> Vec<ModuleSpec> {
        self.applied.lock().clone()
    }

    /// Modules destroyed successfully, in order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().clone()
    }

    /// Records one attempt and applies any scripted fault.
    async fn attempt(&self, op: Operation, spec: &ModuleSpec) -> HarnessResult<()> {
        let module = spec.identifier.clone();
        self.calls.lock().push((op, module.clone()));

        let fault = {
            let mut faults = self.faults.lock();
            faults
                .get_mut(&(module.clone(), op))
                .and_then(|f| f.queued.pop_front().or_else(|| f.permanent.clone()))
        };

        if let Some(delay) = self.delays.get(&module) {
            tokio::time::sleep(*delay).await;
        }

        match fault {
            None => Ok(()),
            Some(Fault::Transient(msg)) => Err(HarnessError::transient(module, op.to_string(), msg)),
            Some(Fault::Configuration(msg)) => Err(HarnessError::configuration(module, msg)),
            Some(Fault::Fatal(msg)) if op == Operation::Destroy => Err(HarnessError::destroy(module, msg)),
            Some(Fault::Fatal(msg)) => Err(HarnessError::engine(module, op.to_string(), msg)),
            Some(Fault::Panic) => panic!("scripted panic during {op} of '{module}'"),
        }
    }

    fn harvest(&self, spec: &ModuleSpec) -> HarnessResult<OutputMap> {
        match self.raw_outputs.get(&spec.identifier) {
            Some(raw) => parse_output_map(raw)
                .map_err(|e| HarnessError::output_parse(&spec.identifier, e)),
            None => Ok(self.outputs.get(&spec.identifier).cloned().unwrap_or_default()),
        }
    }

    async fn attempt_with_retry(&self, op: Operation, spec: &ModuleSpec) -> HarnessResult<()> {
        let name = op.to_string();
        with_retry(
            &spec.retry,
            &spec.identifier,
            &name,
            || self.attempt(op, spec),
            |_, _, _| {},
        )
        .await
    }
}

#[async_trait]
impl LifecycleDriver for MockDriver {
    async fn initialize(&self, spec: &ModuleSpec) -> HarnessResult<()> {
        self.attempt_with_retry(Operation::Initialize, spec).await
    }

    async fn plan(&self, spec: &ModuleSpec) -> HarnessResult<PlanDiff> {
        self.attempt_with_retry(Operation::Plan, spec).await?;
        Ok(self.plans.get(&spec.identifier).cloned().unwrap_or_default())
    }

    async fn apply(&self, spec: &ModuleSpec) -> HarnessResult<StageResult> {
        self.attempt_with_retry(Operation::Apply, spec).await?;
        self.applied.lock().push(spec.clone());
        Ok(match self.harvest(spec) {
            Ok(outputs) => StageResult::success(&spec.identifier, outputs),
            Err(err) => StageResult::failure(StageError::from_harness(&spec.identifier, &err)),
        })
    }

    async fn destroy(&self, spec: &ModuleSpec) -> HarnessResult<()> {
        self.attempt_with_retry(Operation::Destroy, spec).await?;
        self.destroyed.lock().push(spec.identifier.clone());
        Ok(())
    }

    async fn outputs(&self, spec: &ModuleSpec) -> HarnessResult<OutputMap> {
        self.attempt_with_retry(Operation::Outputs, spec).await?;
        self.harvest(spec)
    }
}
