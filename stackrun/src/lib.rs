//! # Stackrun
//!
//! Staged deploy, verify and failsafe teardown for multi-module
//! infrastructure stacks driven by a Terraform-compatible engine.
//!
//! Stackrun provides:
//!
//! - **Sequential stages**: each stage deploys one module, reading inputs from
//!   the outputs of earlier stages
//! - **Verification**: typed output access, declarative expectations and
//!   custom verifiers per stage
//! - **Retries**: transient engine failures are retried with backoff
//! - **Failsafe cleanup**: whatever a run deployed is destroyed in reverse
//!   order, even after failures, timeouts, interrupts or panics
//! - **Compliance scans**: regex policy rules over module sources
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stackrun::prelude::*;
//!
//! let driver: Arc<dyn LifecycleDriver> = Arc::new(EngineDriver::default());
//! let stages = vec![
//!     StageDef::new(ModuleSpec::new("bootstrap", "envs/test/bootstrap")),
//!     StageDef::new(ModuleSpec::new("network", "envs/test/network"))
//!         .bind("vpc_name", "bootstrap", "name_prefix"),
//! ];
//!
//! let tracker = Arc::new(DeploymentTracker::new());
//! let cleanup = FailsafeCleanup::new(Arc::clone(&driver));
//! let outcome = run_with_failsafe(
//!     Orchestrator::new(driver),
//!     stages,
//!     tracker,
//!     &cleanup,
//!     FailsafeOptions::default(),
//! )
//! .await?;
//! println!("{}", outcome.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cleanup;
#[cfg(feature = "compliance")]
pub mod compliance;
pub mod config;
pub mod core;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod events;
pub mod module;
pub mod observability;
pub mod orchestrator;
pub mod outputs;
pub mod testing;
pub mod tracker;


/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::cleanup::{
        run_with_failsafe, CleanupReport, FailsafeCleanup, FailsafeOptions, FailsafeOutcome,
        Termination,
    };
    pub use crate::config::{HarnessConfig, RunManifest};
    pub use crate::core::{RunState, StageStatus};
    pub use crate::driver::{EngineDriver, LifecycleDriver, RetryPolicy};
    pub use crate::engine::PlanDiff;
    pub use crate::errors::{ErrorKind, HarnessError, HarnessResult, StageError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::module::ModuleSpec;
    pub use crate::orchestrator::{
        Expectation, ExpectationVerifier, FnVerifier, InputBinding, Orchestrator, RunReport,
        StageDef, StageMode, StageResult, VerificationContext, Verifier,
    };
    pub use crate::outputs::{OutputAccessor, OutputMap, OutputView};
    pub use crate::tracker::DeploymentTracker;
}
