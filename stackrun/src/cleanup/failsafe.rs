//! Best-effort reverse-order teardown.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::driver::LifecycleDriver;
use crate::errors::{ErrorKind, HarnessError};
use crate::events::{
    EventSink, NoOpEventSink, CLEANUP_COMPLETED, CLEANUP_MODULE_DESTROYED, CLEANUP_MODULE_FAILED,
    CLEANUP_STARTED,
};
use crate::module::ModuleSpec;
use crate::tracker::DeploymentTracker;

/// A module that could not be destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    /// Module identifier.
    pub module: String,
    /// Error kind of the destroy failure.
    pub kind: ErrorKind,
    /// Error text.
    pub message: String,
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Cleanup was disabled and nothing was destroyed.
    pub skipped: bool,
    /// Modules destroyed, in destroy order.
    pub destroyed: Vec<String>,
    /// Modules whose destroy failed, in destroy order.
    pub failures: Vec<CleanupFailure>,
    /// Modules left deployed because cleanup was skipped.
    pub left_deployed: Vec<String>,
}

impl CleanupReport {
    /// Returns true if every module was destroyed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.skipped && self.failures.is_empty()
    }

    /// Order in which destroy was attempted.
    #[must_use]
    pub fn attempted(&self) -> Vec<&str> {
        let mut order: Vec<&str> = self.destroyed.iter().map(String::as_str).collect();
        order.extend(self.failures.iter().map(|f| f.module.as_str()));
        order
    }

    /// Multi-line warning listing what needs manual attention, if anything.
    #[must_use]
    pub fn warning_report(&self) -> Option<String> {
        if self.skipped && !self.left_deployed.is_empty() {
            return Some(format!(
                "cleanup skipped; still deployed: {}",
                self.left_deployed.join(", ")
            ));
        }
        if self.failures.is_empty() {
            return None;
        }
        let mut lines = vec![format!(
            "{} module(s) could not be destroyed and need manual teardown:",
            self.failures.len()
        )];
        lines.extend(
            self.failures
                .iter()
                .map(|f| format!("  - {} ({}): {}", f.module, f.kind, f.message)),
        );
        Some(lines.join("\n"))
    }
}

/// Destroys tracked modules, most recently deployed first.
///
/// Individual destroy failures are collected, never propagated.
#[derive(Clone)]
pub struct FailsafeCleanup {
    driver: Arc<dyn LifecycleDriver>,
    events: Arc<dyn EventSink>,
    enabled: bool,
    per_module_timeout: Option<Duration>,
}

impl std::fmt::Debug for FailsafeCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailsafeCleanup")
            .field("enabled", &self.enabled)
            .field("per_module_timeout", &self.per_module_timeout)
            .finish_non_exhaustive()
    }
}

impl FailsafeCleanup {
    /// Creates an enabled cleanup over `driver`.
    #[must_use]
    pub fn new(driver: Arc<dyn LifecycleDriver>) -> Self {
        Self {
            driver,
            events: Arc::new(NoOpEventSink),
            enabled: true,
            per_module_timeout: None,
        }
    }

    /// Enables or disables cleanup. Disabled cleanup leaves everything deployed.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Bounds each destroy call.
    #[must_use]
    pub fn with_module_timeout(mut self, timeout: Duration) -> Self {
        self.per_module_timeout = Some(timeout);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns true if cleanup will destroy anything.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Destroys every tracked module in reverse deployment order, then clears
    /// the tracker regardless of failures.
    ///
    /// When disabled, nothing is destroyed and the tracker is left intact.
    pub async fn cleanup(&self, tracker: &DeploymentTracker) -> CleanupReport {
        if !self.enabled {
            let left_deployed = tracker.snapshot();
            if !left_deployed.is_empty() {
                warn!(modules = ?left_deployed, "Cleanup disabled, leaving modules deployed");
            }
            return CleanupReport {
                skipped: true,
                left_deployed,
                ..CleanupReport::default()
            };
        }

        let specs: Vec<ModuleSpec> = tracker.entries().into_iter().map(|e| e.spec).collect();
        let report = self.destroy_all(&specs).await;
        tracker.clear();
        report
    }

    /// Destroys `specs` in reverse order, without consulting any tracker.
    pub async fn teardown(&self, specs: &[ModuleSpec]) -> CleanupReport {
        self.destroy_all(specs).await
    }

    async fn destroy_all(&self, specs: &[ModuleSpec]) -> CleanupReport {
        let order: Vec<&str> = specs.iter().rev().map(|s| s.identifier.as_str()).collect();
        info!(modules = ?order, "Cleanup started");
        self.events
            .emit(CLEANUP_STARTED, Some(json!({"modules": order})))
            .await;

        let mut report = CleanupReport::default();
        for spec in specs.iter().rev() {
            match self.destroy_one(spec).await {
                Ok(()) => {
                    self.events
                        .emit(CLEANUP_MODULE_DESTROYED, Some(json!({"module": spec.identifier})))
                        .await;
                    report.destroyed.push(spec.identifier.clone());
                }
                Err(err) => {
                    warn!(module = %spec.identifier, error = %err, "Destroy failed, continuing cleanup");
                    self.events
                        .emit(
                            CLEANUP_MODULE_FAILED,
                            Some(json!({"module": spec.identifier, "error": err.to_string()})),
                        )
                        .await;
                    report.failures.push(CleanupFailure {
                        module: spec.identifier.clone(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }

        if let Some(warning) = report.warning_report() {
            warn!("{warning}");
        }
        info!(
            destroyed = report.destroyed.len(),
            failed = report.failures.len(),
            "Cleanup completed"
        );
        self.events
            .emit(
                CLEANUP_COMPLETED,
                Some(json!({"destroyed": report.destroyed, "failed": report.failures.len()})),
            )
            .await;
        report
    }

    async fn destroy_one(&self, spec: &ModuleSpec) -> Result<(), HarnessError> {
        match self.per_module_timeout {
            None => self.driver.destroy(spec).await,
            Some(limit) => tokio::time::timeout(limit, self.driver.destroy(spec))
                .await
                .map_err(|_| HarnessError::Timeout {
                    operation: format!("destroy of '{}'", spec.identifier),
                    seconds: limit.as_secs(),
                })?,
        }
    }
}
