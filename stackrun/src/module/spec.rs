//! Module specification.

use crate::driver::RetryPolicy;
use crate::errors::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine binary used when a module does not name one.
pub const DEFAULT_BINARY: &str = "terraform";

/// Input variables keyed by name.
///
/// Ordered so that generated command lines are deterministic.
pub type VarMap = BTreeMap<String, serde_json::Value>;

/// Everything needed to drive one infrastructure module.
///
/// A `ModuleSpec` is treated as immutable once handed to a stage; the `with_*`
/// methods consume and return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Unique identifier of the module within a run.
    pub identifier: String,
    /// Directory containing the module's configuration.
    pub location: PathBuf,
    /// Engine binary to invoke.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Input variables passed on the command line.
    #[serde(default)]
    pub vars: VarMap,
    /// Extra environment variables for the engine process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-command timeout in seconds. Falls back to the driver default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
}

fn default_binary() -> String {
    DEFAULT_BINARY.to_string()
}

impl ModuleSpec {
    /// Creates a module spec with the default binary and retry policy.
    #[must_use]
    pub fn new(identifier: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            location: location.into(),
            binary: default_binary(),
            vars: VarMap::new(),
            env: BTreeMap::new(),
            retry: RetryPolicy::default(),
            command_timeout_secs: None,
        }
    }

    /// Sets the engine binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets a single input variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Merges input variables, overriding existing names.
    #[must_use]
    pub fn with_vars(mut self, vars: VarMap) -> Self {
        self.vars.extend(vars);
        self
    }

    /// Sets an environment variable for the engine process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-command timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Returns the per-command timeout, if one is set.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Resolves a relative location against `base`.
    #[must_use]
    pub fn relative_to(mut self, base: &Path) -> Self {
        if self.location.is_relative() {
            self.location = base.join(&self.location);
        }
        self
    }

    /// Validates the specification.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the identifier, location or binary is empty.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.identifier.trim().is_empty() {
            return Err(HarnessError::configuration(
                "<unnamed>",
                "module identifier cannot be empty or whitespace-only",
            ));
        }
        if self.location.as_os_str().is_empty() {
            return Err(HarnessError::configuration(
                &self.identifier,
                "module location cannot be empty",
            ));
        }
        if self.binary.trim().is_empty() {
            return Err(HarnessError::configuration(
                &self.identifier,
                "engine binary cannot be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let spec = ModuleSpec::new("vpc", "envs/test/vpc")
            .with_binary("tofu")
            .with_var("vpc_cidr", "10.0.0.0/16")
            .with_var("availability_zones", json!(["eu-north-1a"]))
            .with_env("AWS_REGION", "eu-north-1")
            .with_command_timeout(Duration::from_secs(600));

        assert_eq!(spec.identifier, "vpc");
        assert_eq!(spec.binary, "tofu");
        assert_eq!(spec.vars.get("vpc_cidr"), Some(&json!("10.0.0.0/16")));
        assert_eq!(spec.env.get("AWS_REGION").map(String::as_str), Some("eu-north-1"));
        assert_eq!(spec.command_timeout(), Some(Duration::from_secs(600)));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_with_vars_overrides() {
        let mut extra = VarMap::new();
        extra.insert("environment".to_string(), json!("prod"));

        let spec = ModuleSpec::new("bootstrap", "b")
            .with_var("environment", "test")
            .with_vars(extra);

        assert_eq!(spec.vars.get("environment"), Some(&json!("prod")));
    }

    #[test]
    fn test_validate_rejects_blank_identifier() {
        let err = ModuleSpec::new("  ", "dir").validate().unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));
    }

    #[test]
    fn test_relative_to() {
        let spec = ModuleSpec::new("vpc", "envs/vpc").relative_to(Path::new("/repo"));
        assert_eq!(spec.location, PathBuf::from("/repo/envs/vpc"));

        let absolute = ModuleSpec::new("vpc", "/abs/vpc").relative_to(Path::new("/repo"));
        assert_eq!(absolute.location, PathBuf::from("/abs/vpc"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let spec: ModuleSpec =
            serde_json::from_str(r#"{"identifier":"vpc","location":"envs/vpc"}"#).unwrap();
        assert_eq!(spec.binary, DEFAULT_BINARY);
        assert_eq!(spec.retry, RetryPolicy::default());
        assert!(spec.vars.is_empty());
    }
}
