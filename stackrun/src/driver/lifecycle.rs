//! The lifecycle driver port and its engine-backed implementation.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::classify::ErrorClassifier;
use super::retry::with_retry;
use crate::engine::{
    CommandOutput, CommandRunner, EngineCommand, Invocation, PlanDiff, TokioCommandRunner,
    PLAN_FILE,
};
use crate::errors::{HarnessError, HarnessResult, StageError};
use crate::events::{EventSink, NoOpEventSink, STAGE_RETRYING};
use crate::module::ModuleSpec;
use crate::orchestrator::StageResult;
use crate::outputs::{parse_output_map, OutputMap};

/// Per-command timeout used when a module does not set one.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

/// Drives the lifecycle of one module at a time.
///
/// Implementations must be safe to share between a run and its cleanup
/// finalizer.
#[async_trait]
pub trait LifecycleDriver: Send + Sync {
    /// Prepares the module's working directory (providers, backends).
    async fn initialize(&self, spec: &ModuleSpec) -> HarnessResult<()>;

    /// Computes the changes an apply would make, without making them.
    async fn plan(&self, spec: &ModuleSpec) -> HarnessResult<PlanDiff>;

    /// Reconciles infrastructure with the module and returns its outputs.
    ///
    /// `Err` means the engine apply itself failed. Once the apply succeeded
    /// the call returns `Ok`; if the outputs could not be read afterwards the
    /// returned result is a failure of kind `OutputRetrieval`, and the module
    /// must still be treated as deployed.
    ///
    /// Re-applying an unchanged spec against converged infrastructure must
    /// succeed and return the same outputs.
    async fn apply(&self, spec: &ModuleSpec) -> HarnessResult<StageResult>;

    /// Destroys everything the module manages.
    async fn destroy(&self, spec: &ModuleSpec) -> HarnessResult<()>;

    /// Reads the module's published outputs.
    async fn outputs(&self, spec: &ModuleSpec) -> HarnessResult<OutputMap>;
}

/// [`LifecycleDriver`] that invokes a Terraform-compatible binary.
pub struct EngineDriver<R: CommandRunner = TokioCommandRunner> {
    runner: R,
    default_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl<R: CommandRunner> std::fmt::Debug for EngineDriver<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDriver")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for EngineDriver<TokioCommandRunner> {
    fn default() -> Self {
        Self::new(TokioCommandRunner::new())
    }
}

impl<R: CommandRunner> EngineDriver<R> {
    /// Creates a driver over the given runner.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the timeout for modules that do not set their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the sink receiving `stage.retrying` events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the underlying runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Builds the invocation of `command` for `spec`.
    #[must_use]
    pub fn invocation(&self, spec: &ModuleSpec, command: EngineCommand) -> Invocation {
        let mut env = BTreeMap::from([
            ("TF_IN_AUTOMATION".to_string(), "1".to_string()),
            ("TF_INPUT".to_string(), "0".to_string()),
        ]);
        env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Invocation {
            program: spec.binary.clone(),
            args: command.args(spec),
            cwd: spec.location.clone(),
            env,
            timeout: spec.command_timeout().unwrap_or(self.default_timeout),
        }
    }

    /// Runs `command` with the module's retry policy. Non-zero exits are
    /// classified into transient, configuration or engine errors.
    async fn execute(&self, spec: &ModuleSpec, command: EngineCommand) -> HarnessResult<CommandOutput> {
        spec.validate()?;
        let classifier = ErrorClassifier::new(&spec.identifier, &spec.retry.retryable_errors)?;
        let invocation = self.invocation(spec, command);
        let module = spec.identifier.as_str();
        let name = command.name();

        debug!(module = %module, command = %invocation.display(), "Running engine command");

        let runner = &self.runner;
        let invocation = &invocation;
        let classifier = &classifier;

        with_retry(
            &spec.retry,
            module,
            name,
            || async move {
                let output = runner.run(invocation).await?;
                if output.success() {
                    Ok(output)
                } else {
                    Err(classifier.to_error(module, name, &output.combined()))
                }
            },
            |attempt, err, delay| {
                self.events.try_emit(
                    STAGE_RETRYING,
                    Some(json!({
                        "stage": module,
                        "command": name,
                        "attempt": attempt,
                        "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "error": err.message(),
                    })),
                );
            },
        )
        .await
    }

    async fn remove_plan_file(&self, spec: &ModuleSpec) {
        let path = spec.location.join(PLAN_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove plan file"),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> LifecycleDriver for EngineDriver<R> {
    async fn initialize(&self, spec: &ModuleSpec) -> HarnessResult<()> {
        self.execute(spec, EngineCommand::Init).await?;
        Ok(())
    }

    async fn plan(&self, spec: &ModuleSpec) -> HarnessResult<PlanDiff> {
        let shown = async {
            self.execute(spec, EngineCommand::Plan).await?;
            self.execute(spec, EngineCommand::Show).await
        }
        .await;
        self.remove_plan_file(spec).await;

        let plan = PlanDiff::parse(&shown?.stdout)
            .map_err(|e| HarnessError::engine(&spec.identifier, "show", e))?;
        info!(
            module = %spec.identifier,
            resources = plan.resource_changes.len(),
            creates = plan.creates(),
            "Plan computed"
        );
        Ok(plan)
    }

    async fn apply(&self, spec: &ModuleSpec) -> HarnessResult<StageResult> {
        let started_at = chrono::Utc::now();
        self.execute(spec, EngineCommand::Apply).await?;
        match self.outputs(spec).await {
            Ok(outputs) => {
                info!(module = %spec.identifier, outputs = outputs.len(), "Module applied");
                Ok(StageResult::success(&spec.identifier, outputs).with_started_at(started_at))
            }
            Err(err) => {
                warn!(module = %spec.identifier, error = %err, "Module applied but outputs unreadable");
                Ok(
                    StageResult::failure(StageError::from_harness(&spec.identifier, &err))
                        .with_started_at(started_at),
                )
            }
        }
    }

    async fn destroy(&self, spec: &ModuleSpec) -> HarnessResult<()> {
        match self.execute(spec, EngineCommand::Destroy).await {
            Ok(_) => {
                info!(module = %spec.identifier, "Module destroyed");
                Ok(())
            }
            Err(err @ HarnessError::Timeout { .. }) => Err(err),
            Err(err) => Err(HarnessError::destroy(&spec.identifier, err.to_string())),
        }
    }

    async fn outputs(&self, spec: &ModuleSpec) -> HarnessResult<OutputMap> {
        let output = self.execute(spec, EngineCommand::Output).await?;
        parse_output_map(&output.stdout)
            .map_err(|e| HarnessError::output_parse(&spec.identifier, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RetryPolicy;
    use crate::engine::MockCommandRunner;
    use crate::testing::ScriptedRunner;
    use pretty_assertions::assert_eq;

    const OUTPUTS: &str = r#"{"vpc_id":{"sensitive":false,"type":"string","value":"vpc-0abc"}}"#;

    fn spec() -> ModuleSpec {
        ModuleSpec::new("network", "/tmp/stackrun-network")
            .with_var("vpc_cidr", "10.0.0.0/16")
            .with_retry(
                RetryPolicy::new()
                    .with_max_retries(3)
                    .with_backoff(Duration::from_millis(1)),
            )
    }

    #[test]
    fn test_invocation_environment_and_timeout() {
        let driver = EngineDriver::new(ScriptedRunner::new())
            .with_default_timeout(Duration::from_secs(60));
        let spec = spec().with_env("AWS_REGION", "eu-north-1");

        let inv = driver.invocation(&spec, EngineCommand::Apply);
        assert_eq!(inv.program, "terraform");
        assert_eq!(inv.subcommand(), Some("apply"));
        assert_eq!(inv.env.get("TF_IN_AUTOMATION").map(String::as_str), Some("1"));
        assert_eq!(inv.env.get("AWS_REGION").map(String::as_str), Some("eu-north-1"));
        assert_eq!(inv.timeout, Duration::from_secs(60));

        let inv = driver.invocation(
            &spec.with_command_timeout(Duration::from_secs(5)),
            EngineCommand::Apply,
        );
        assert_eq!(inv.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_apply_returns_outputs() {
        let runner = ScriptedRunner::new().always("output", CommandOutput::ok(OUTPUTS));
        let driver = EngineDriver::new(runner);

        let result = driver.apply(&spec()).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(result.outputs.get("vpc_id"), Some(&serde_json::json!("vpc-0abc")));
        assert_eq!(driver.runner().subcommands(), vec!["apply", "output"]);
    }

    #[tokio::test]
    async fn test_transient_failures_retried_exactly() {
        let k = 2;
        let mut runner = ScriptedRunner::new().always("output", CommandOutput::ok(OUTPUTS));
        for _ in 0..k {
            runner = runner.then(
                "apply",
                CommandOutput::failed(1, "Error: ThrottlingException: Rate exceeded"),
            );
        }
        let events = Arc::new(crate::events::CollectingEventSink::new());
        let driver = EngineDriver::new(runner).with_event_sink(events.clone());

        let result = driver.apply(&spec()).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(driver.runner().count("apply"), k + 1);
        assert_eq!(events.events_of_type(STAGE_RETRYING).len(), k);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let runner = ScriptedRunner::new().always(
            "apply",
            CommandOutput::failed(1, "Error: RequestLimitExceeded"),
        );
        let driver = EngineDriver::new(runner);

        let err = driver.apply(&spec()).await.unwrap_err();
        assert!(matches!(err, HarnessError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(driver.runner().count("apply"), 4);
        assert_eq!(driver.runner().count("output"), 0);
    }

    #[tokio::test]
    async fn test_configuration_error_not_retried() {
        let runner = ScriptedRunner::new().always(
            "apply",
            CommandOutput::failed(1, "│ Error: No value for required variable\n│ on variables.tf line 3"),
        );
        let driver = EngineDriver::new(runner);

        let err = driver.apply(&spec()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));
        assert_eq!(driver.runner().count("apply"), 1);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let runner = ScriptedRunner::new().always("output", CommandOutput::ok(OUTPUTS));
        let driver = EngineDriver::new(runner);

        let first = driver.apply(&spec()).await.unwrap();
        let second = driver.apply(&spec()).await.unwrap();
        assert_eq!(first.outputs, second.outputs);
    }

    #[tokio::test]
    async fn test_plan_runs_plan_then_show() {
        let plan = r#"{"resource_changes":[{"address":"aws_vpc.main","type":"aws_vpc","name":"main","change":{"actions":["create"]}}]}"#;
        let runner = ScriptedRunner::new().always("show", CommandOutput::ok(plan));
        let driver = EngineDriver::new(runner);

        let diff = driver.plan(&spec()).await.unwrap();
        assert!(diff.contains("aws_vpc.main"));
        assert_eq!(driver.runner().subcommands(), vec!["plan", "show"]);
    }

    #[tokio::test]
    async fn test_destroy_failure_maps_to_destroy_error() {
        let runner = ScriptedRunner::new().always(
            "destroy",
            CommandOutput::failed(1, "Error: deleting S3 Bucket: BucketNotEmpty"),
        );
        let driver = EngineDriver::new(runner);

        let err = driver.destroy(&spec()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Destroy { ref module, .. } if module == "network"));
    }

    #[tokio::test]
    async fn test_malformed_outputs_are_output_parse_errors() {
        let runner = ScriptedRunner::new().always("output", CommandOutput::ok("::debug::not json"));
        let driver = EngineDriver::new(runner);

        let err = driver.outputs(&spec()).await.unwrap_err();
        assert!(matches!(err, HarnessError::OutputParse { .. }));
    }

    #[tokio::test]
    async fn test_apply_with_unreadable_outputs_is_deployed_failure() {
        let runner = ScriptedRunner::new().always("output", CommandOutput::ok("::debug::garbage {"));
        let driver = EngineDriver::new(runner);

        let result = driver.apply(&spec()).await.unwrap();
        assert!(!result.succeeded());
        assert_eq!(result.error.unwrap().kind, crate::errors::ErrorKind::OutputRetrieval);
        assert_eq!(driver.runner().count("apply"), 1);
    }

    #[tokio::test]
    async fn test_with_mocked_runner() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.subcommand() == Some("init") && inv.args.contains(&"-no-color".to_string()))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("Terraform has been successfully initialized!")));

        let driver = EngineDriver::new(runner);
        driver.initialize(&spec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|inv| {
            Err(HarnessError::Timeout {
                operation: inv.display(),
                seconds: 1,
            })
        });

        let driver = EngineDriver::new(runner);
        let err = driver.initialize(&spec()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Timeout { .. }));
    }
}
