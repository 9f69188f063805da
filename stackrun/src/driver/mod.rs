//! Lifecycle driver for infrastructure modules.
//!
//! This module provides:
//! - The `LifecycleDriver` trait (init/plan/apply/destroy/outputs)
//! - `EngineDriver`, which runs the engine as a subprocess
//! - Transient-error classification and the retry loop

mod classify;
mod lifecycle;
mod retry;

pub use classify::{default_retryable_patterns, ErrorClassifier, FailureClass};
pub use lifecycle::{EngineDriver, LifecycleDriver, DEFAULT_COMMAND_TIMEOUT};
pub use retry::{with_retry, BackoffStrategy, RetryPolicy};
