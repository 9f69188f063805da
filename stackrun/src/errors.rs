//! Error types for the stackrun harness.
//!
//! The taxonomy separates failures that are worth retrying (transient engine
//! errors) from those that indicate a harness or module contract problem
//! (configuration errors), and keeps verification failures distinct from
//! provisioning failures so reports can tell "infra didn't build" apart from
//! "infra built but violates an expected property".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Coarse classification of a [`HarnessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Throttling, eventual consistency and other retryable engine failures.
    Transient,
    /// Missing variables, invalid references, malformed specs. Never retried.
    Configuration,
    /// The engine failed for a reason that is neither transient nor configuration.
    Provisioning,
    /// Outputs could not be read or parsed.
    OutputRetrieval,
    /// Infrastructure was deployed but an expected property does not hold.
    Verification,
    /// Teardown of a module failed.
    Destroy,
    /// An operation exceeded its time budget.
    Timeout,
    /// The run was interrupted from outside.
    Interrupted,
    /// The run manifest could not be loaded.
    Manifest,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Configuration => "configuration",
            Self::Provisioning => "provisioning",
            Self::OutputRetrieval => "output_retrieval",
            Self::Verification => "verification",
            Self::Destroy => "destroy",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
            Self::Manifest => "manifest",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The main error type for harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A retryable engine failure.
    #[error("transient engine error in '{module}' during {command}: {message}")]
    Transient {
        /// Module identifier.
        module: String,
        /// Engine subcommand.
        command: String,
        /// Captured error text.
        message: String,
    },

    /// A transient failure kept recurring past the retry budget.
    #[error("retries exhausted for '{module}' during {command} after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Module identifier.
        module: String,
        /// Engine subcommand.
        command: String,
        /// Total attempts made, including the first.
        attempts: usize,
        /// Error text of the last attempt.
        message: String,
    },

    /// A configuration problem: fatal, never retried.
    #[error("configuration error in '{module}': {message}")]
    Configuration {
        /// Module identifier.
        module: String,
        /// Description of the problem.
        message: String,
    },

    /// A non-transient engine failure.
    #[error("engine command `{command}` failed for '{module}': {message}")]
    Engine {
        /// Module identifier.
        module: String,
        /// Engine subcommand.
        command: String,
        /// Captured error text.
        message: String,
    },

    /// A named output was required but is absent.
    #[error("output '{key}' not found for '{module}'")]
    OutputMissing {
        /// Module identifier.
        module: String,
        /// Output name.
        key: String,
    },

    /// Outputs were present but could not be decoded.
    #[error("could not parse outputs of '{module}': {message}")]
    OutputParse {
        /// Module identifier.
        module: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A verification check failed.
    #[error("{0}")]
    Verification(#[from] VerificationError),

    /// Destroying a module failed.
    #[error("destroy failed for '{module}': {message}")]
    Destroy {
        /// Module identifier.
        module: String,
        /// Captured error text.
        message: String,
    },

    /// An operation timed out.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was running.
        operation: String,
        /// The budget that was exceeded.
        seconds: u64,
    },

    /// The run was interrupted.
    #[error("run interrupted: {0}")]
    Interrupted(String),

    /// The run manifest is invalid.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(
        module: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transient {
            module: module.into(),
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a fatal engine error.
    #[must_use]
    pub fn engine(
        module: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Engine {
            module: module.into(),
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates an output-missing error.
    #[must_use]
    pub fn output_missing(module: impl Into<String>, key: impl Into<String>) -> Self {
        Self::OutputMissing {
            module: module.into(),
            key: key.into(),
        }
    }

    /// Creates an output-parse error.
    #[must_use]
    pub fn output_parse(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputParse {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a destroy error.
    #[must_use]
    pub fn destroy(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Destroy {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Returns the coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::RetriesExhausted { .. } | Self::Engine { .. } | Self::Io(_) => {
                ErrorKind::Provisioning
            }
            Self::OutputMissing { .. } | Self::OutputParse { .. } => ErrorKind::OutputRetrieval,
            Self::Verification(_) => ErrorKind::Verification,
            Self::Destroy { .. } => ErrorKind::Destroy,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Interrupted(_) => ErrorKind::Interrupted,
            Self::Manifest(_) => ErrorKind::Manifest,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the error should be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the bare message without the variant prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Transient { message, .. }
            | Self::RetriesExhausted { message, .. }
            | Self::Configuration { message, .. }
            | Self::Engine { message, .. }
            | Self::OutputParse { message, .. }
            | Self::Destroy { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Manifest(err.to_string())
    }
}

/// Error raised when verification of a stage fails.
///
/// All failed checks of a stage are collected, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("verification failed for stage '{stage}': {}", failures.join("; "))]
pub struct VerificationError {
    /// The stage being verified.
    pub stage: String,
    /// One message per failed check.
    pub failures: Vec<String>,
}

impl VerificationError {
    /// Creates a verification error with a single failure.
    #[must_use]
    pub fn new(stage: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            failures: vec![failure.into()],
        }
    }

    /// Creates a verification error from several failures.
    #[must_use]
    pub fn with_failures(stage: impl Into<String>, failures: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            failures,
        }
    }
}

/// Serializable record of why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Stage that failed.
    pub stage: String,
    /// Error kind.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
        }
    }

    /// Builds a stage error from a harness error.
    #[must_use]
    pub fn from_harness(stage: impl Into<String>, err: &HarnessError) -> Self {
        Self::new(stage, err.kind(), err.to_string())
    }

    /// Returns true if this was a verification failure rather than a provisioning one.
    #[must_use]
    pub fn is_verification(&self) -> bool {
        self.kind == ErrorKind::Verification
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("kind".to_string(), serde_json::json!(self.kind.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage {} failed ({}): {}", self.stage, self.kind, self.message)
    }
}

impl std::error::Error for StageError {}
