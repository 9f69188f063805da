//! Run events for observability.
//!
//! The orchestrator, driver and cleanup emit events through an [`EventSink`].
//! Event names are namespaced by the component that emits them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run started.
pub const RUN_STARTED: &str = "run.started";
/// Every stage applied and verified.
pub const RUN_COMPLETED: &str = "run.completed";
/// A stage failed and the run stopped.
pub const RUN_FAILED: &str = "run.failed";
/// A stage started.
pub const STAGE_STARTED: &str = "stage.started";
/// An engine command is being retried after a transient error.
pub const STAGE_RETRYING: &str = "stage.retrying";
/// A stage applied and verified.
pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
/// A stage failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was not executed because an earlier one failed.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// Cleanup of tracked modules started.
pub const CLEANUP_STARTED: &str = "cleanup.started";
/// A module was destroyed.
pub const CLEANUP_MODULE_DESTROYED: &str = "cleanup.module_destroyed";
/// Destroying a module failed; cleanup continues.
pub const CLEANUP_MODULE_FAILED: &str = "cleanup.module_failed";
/// Cleanup finished.
pub const CLEANUP_COMPLETED: &str = "cleanup.completed";
