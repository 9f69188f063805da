//! Classification of engine failures into transient, configuration and fatal.

use crate::errors::{HarnessError, HarnessResult};
use regex::RegexSet;

/// Built-in patterns for failures that go away on their own.
///
/// Covers provider registry and network hiccups plus cloud API throttling and
/// eventual-consistency races.
pub fn default_retryable_patterns() -> Vec<String> {
    [
        r"read: connection reset by peer",
        r"TLS handshake timeout",
        r"Client\.Timeout exceeded while awaiting headers",
        r"unexpected EOF",
        r"(?i)error installing provider",
        r"Failed to query available provider packages",
        r"could not query provider registry",
        r"timeout while waiting for plugin to start",
        r"429 Too Many Requests",
        r"Throttling(Exception)?",
        r"RequestLimitExceeded",
        r"(?i)rate exceeded",
        r"TooManyRequestsException",
        r"(?i)request limit exceeded",
        r"ConcurrentModificationException",
        r"OperationAbortedException",
        r"InvalidInstanceProfile\.NotFound",
        r"Invalid IAM Instance Profile",
        r"(?i)role .* cannot be assumed",
        r"(?i)is not authorized to perform: sts:AssumeRole",
        r"(?i)dependencyviolation",
        r"(?i)eventual consistency",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Patterns that identify harness or module contract problems.
const CONFIGURATION_PATTERNS: &[&str] = &[
    r"No value for required variable",
    r"Value for undeclared variable",
    r"Invalid value for (input )?variable",
    r"Reference to undeclared",
    r"Invalid reference",
    r"Unsupported argument",
    r"Missing required argument",
    r"Module not installed",
    r"(?i)no configuration files",
    r"Unreadable module directory",
];

/// How a failed engine command should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry with backoff.
    Transient,
    /// Fatal, and the fault lies with the inputs or module contract.
    Configuration,
    /// Fatal for any other reason.
    Fatal,
}

/// Compiled classifier for engine error text.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    retryable: RegexSet,
    configuration: RegexSet,
}

impl ErrorClassifier {
    /// Compiles a classifier from the given retryable patterns.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming `module` if any pattern is not a
    /// valid regular expression.
    pub fn new(module: &str, retryable: &[String]) -> HarnessResult<Self> {
        let retryable = RegexSet::new(retryable).map_err(|e| {
            HarnessError::configuration(module, format!("invalid retryable error pattern: {e}"))
        })?;
        let configuration = RegexSet::new(CONFIGURATION_PATTERNS)
            .map_err(|e| HarnessError::Internal(e.to_string()))?;
        Ok(Self {
            retryable,
            configuration,
        })
    }

    /// Classifies error text. Configuration matches win over transient ones.
    #[must_use]
    pub fn classify(&self, text: &str) -> FailureClass {
        if self.configuration.is_match(text) {
            FailureClass::Configuration
        } else if self.retryable.is_match(text) {
            FailureClass::Transient
        } else {
            FailureClass::Fatal
        }
    }

    /// Builds the matching [`HarnessError`] for a failed command.
    #[must_use]
    pub fn to_error(&self, module: &str, command: &str, text: &str) -> HarnessError {
        let message = summarize(text);
        match self.classify(text) {
            FailureClass::Transient => HarnessError::transient(module, command, message),
            FailureClass::Configuration => HarnessError::configuration(module, message),
            FailureClass::Fatal => HarnessError::engine(module, command, message),
        }
    }
}

/// Keeps the lines that carry the diagnosis, dropping blank lines and
/// box-drawing decoration the engine puts around errors.
fn summarize(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim_start_matches(['│', '╷', '╵', ' ']).trim_end())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        "engine exited with a failure status and no output".to_string()
    } else {
        lines.join("\n")
    }
}
