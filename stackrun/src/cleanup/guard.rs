//! Guaranteed-execution wrapper around a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::failsafe::{CleanupReport, FailsafeCleanup};
use crate::errors::HarnessResult;
use crate::orchestrator::{Orchestrator, RunReport, StageDef};
use crate::tracker::DeploymentTracker;

/// How a guarded run may end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "termination", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// Every stage succeeded.
    Completed,
    /// A stage failed.
    Failed,
    /// The overall run timeout expired.
    TimedOut,
    /// An interrupt signal arrived.
    Interrupted,
    /// The orchestrator returned an error instead of a report.
    Errored(String),
    /// The run task panicked.
    Panicked(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Errored(msg) => write!(f, "errored: {msg}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Options for [`run_with_failsafe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailsafeOptions {
    /// Abort the run after this long.
    pub run_timeout: Option<Duration>,
    /// Abort the run on Ctrl-C.
    pub handle_interrupt: bool,
    /// Leave resources up after a completed run.
    pub keep_on_success: bool,
    /// How long an in-flight stage may keep running after a timeout or
    /// interrupt before its task is aborted.
    pub grace_period: Duration,
}

impl Default for FailsafeOptions {
    fn default() -> Self {
        Self {
            run_timeout: None,
            handle_interrupt: false,
            keep_on_success: true,
            grace_period: Duration::ZERO,
        }
    }
}

impl FailsafeOptions {
    /// Sets the overall run timeout.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Enables Ctrl-C handling.
    #[must_use]
    pub fn with_interrupt_handling(mut self, handle: bool) -> Self {
        self.handle_interrupt = handle;
        self
    }

    /// Sets whether a completed run keeps its resources.
    #[must_use]
    pub fn with_keep_on_success(mut self, keep: bool) -> Self {
        self.keep_on_success = keep;
        self
    }

    /// Sets the grace period granted to an in-flight stage when stopping.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Everything a guarded run produced.
#[derive(Debug, Clone)]
pub struct FailsafeOutcome {
    /// How the run ended.
    pub termination: Termination,
    /// The run report, when the orchestrator returned one.
    pub report: Option<RunReport>,
    /// The cleanup pass, when one was due.
    pub cleanup: Option<CleanupReport>,
}

impl FailsafeOutcome {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Completed
    }

    /// One-line description of the outcome.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.termination, &self.report) {
            (Termination::Completed | Termination::Failed, Some(report)) => report.summary(),
            (other, _) => format!("run {other}"),
        }
    }
}

/// Runs `stages` and guarantees `cleanup` gets a chance to run afterwards.
///
/// The orchestrator runs in its own task, raced against the run timeout and,
/// if enabled, Ctrl-C. On timeout or interrupt the orchestrator is told to
/// stop: no further stage starts, and the stage in flight gets
/// `grace_period` to finish so its module is tracked. After the grace period
/// the task is aborted and awaited before cleanup touches the tracker.
/// Aborting drops the running engine command, which kills the child process;
/// a module killed mid-apply may hold its state lock and has partial
/// resources the tracker never saw, so give long applies a grace period that
/// covers them. A panicking task is treated as a failure. Cleanup runs unless
/// the run completed and `keep_on_success` is set.
///
/// # Errors
///
/// Returns a configuration error if the stage list is invalid. Nothing is
/// deployed in that case.
pub async fn run_with_failsafe(
    orchestrator: Orchestrator,
    stages: Vec<StageDef>,
    tracker: Arc<DeploymentTracker>,
    cleanup: &FailsafeCleanup,
    options: FailsafeOptions,
) -> HarnessResult<FailsafeOutcome> {
    Orchestrator::validate(&stages)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let orchestrator = orchestrator.with_stop_signal(stop_rx);
    let task_tracker = Arc::clone(&tracker);
    let mut handle =
        tokio::spawn(async move { orchestrator.run(&stages, &task_tracker).await });

    let timeout = async {
        match options.run_timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    let interrupt = async {
        if !options.handle_interrupt || tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let stopped = tokio::select! {
        joined = &mut handle => Err(joined),
        () = timeout => {
            warn!(timeout_secs = options.run_timeout.map(|d| d.as_secs()), "Run timed out, stopping");
            Ok(Termination::TimedOut)
        },
        () = interrupt => {
            warn!("Interrupt received, stopping run");
            Ok(Termination::Interrupted)
        },
    };

    let ended = match stopped {
        Err(joined) => settle(joined),
        Ok(termination) => {
            stop_tx.send_replace(true);
            let report = match tokio::time::timeout(options.grace_period, &mut handle).await {
                Ok(joined) => settle(joined).1,
                Err(_) => {
                    warn!(grace_secs = options.grace_period.as_secs(), "Stage still running, aborting");
                    handle.abort();
                    let _ = (&mut handle).await;
                    None
                }
            };
            (termination, report)
        }
    };

    Ok(finish(ended, &tracker, cleanup, options).await)
}

type Joined = Result<HarnessResult<RunReport>, tokio::task::JoinError>;

fn settle(joined: Joined) -> (Termination, Option<RunReport>) {
    match joined {
        Ok(Ok(report)) if report.is_success() => (Termination::Completed, Some(report)),
        Ok(Ok(report)) => (Termination::Failed, Some(report)),
        Ok(Err(err)) => (Termination::Errored(err.to_string()), None),
        Err(join_err) => (Termination::Panicked(panic_message(join_err)), None),
    }
}

async fn finish(
    (termination, report): (Termination, Option<RunReport>),
    tracker: &DeploymentTracker,
    cleanup: &FailsafeCleanup,
    options: FailsafeOptions,
) -> FailsafeOutcome {
    if let Termination::Panicked(message) | Termination::Errored(message) = &termination {
        error!(error = %message, "Run task ended abnormally");
    }

    let cleanup_due = !(termination == Termination::Completed && options.keep_on_success);
    let cleanup_report = if cleanup_due {
        Some(cleanup.cleanup(tracker).await)
    } else {
        info!(deployed = ?tracker.snapshot(), "Run completed, leaving resources deployed");
        None
    };

    FailsafeOutcome {
        termination,
        report,
        cleanup: cleanup_report,
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "run task panicked".to_string())
}
