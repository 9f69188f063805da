//! Harness settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::driver::RetryPolicy;
use crate::errors::{HarnessError, HarnessResult};
use crate::module::DEFAULT_BINARY;

/// Disables failsafe cleanup when true.
pub const ENV_SKIP_CLEANUP: &str = "STACKRUN_SKIP_CLEANUP";
/// Older name for [`ENV_SKIP_CLEANUP`], still honoured.
pub const ENV_LEGACY_SKIP_CLEANUP: &str = "SKIP_E2E_CLEANUP";
/// Overall run timeout in seconds.
pub const ENV_RUN_TIMEOUT: &str = "STACKRUN_RUN_TIMEOUT_SECS";
/// Engine binary used by stages that do not name one.
pub const ENV_BINARY: &str = "STACKRUN_BINARY";

/// Settings shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Engine binary.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Leave deployed modules up after a failed run.
    #[serde(default)]
    pub skip_cleanup: bool,
    /// Leave deployed modules up after a successful run.
    #[serde(default = "default_true")]
    pub keep_on_success: bool,
    /// Abort the run after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    /// Timeout of a single engine command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Timeout of a single destroy during cleanup.
    #[serde(default = "default_destroy_timeout")]
    pub destroy_timeout_secs: u64,
    /// Seconds an in-flight stage may keep running once the run is stopped.
    #[serde(default)]
    pub grace_period_secs: u64,
    /// Abort and clean up on Ctrl-C.
    #[serde(default = "default_true")]
    pub handle_interrupt: bool,
    /// Retry policy for stages that do not set one.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_binary() -> String {
    DEFAULT_BINARY.to_string()
}

fn default_true() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    3600
}

fn default_destroy_timeout() -> u64 {
    1800
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            skip_cleanup: false,
            keep_on_success: true,
            run_timeout_secs: None,
            command_timeout_secs: default_command_timeout(),
            destroy_timeout_secs: default_destroy_timeout(),
            grace_period_secs: 0,
            handle_interrupt: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl HarnessConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Enables or disables skipping cleanup.
    #[must_use]
    pub fn with_skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }

    /// Sets whether successful runs keep their resources.
    #[must_use]
    pub fn with_keep_on_success(mut self, keep: bool) -> Self {
        self.keep_on_success = keep;
        self
    }

    /// Sets the overall run timeout.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Sets the grace period for an in-flight stage when the run is stopped.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_secs = grace.as_secs();
        self
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unparsable values.
    pub fn with_process_env(self) -> HarnessResult<Self> {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unparsable values.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in [ENV_LEGACY_SKIP_CLEANUP, ENV_SKIP_CLEANUP] {
            if let Some(raw) = lookup(key) {
                match env_flag(&raw) {
                    Some(skip) => self.skip_cleanup = skip,
                    None => warn!(variable = key, value = %raw, "Ignoring unrecognised boolean"),
                }
            }
        }

        if let Some(raw) = lookup(ENV_RUN_TIMEOUT) {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                HarnessError::configuration("config", format!("{ENV_RUN_TIMEOUT}={raw}: {e}"))
            })?;
            self.run_timeout_secs = (secs > 0).then_some(secs);
        }

        if let Some(binary) = lookup(ENV_BINARY).filter(|b| !b.trim().is_empty()) {
            self.binary = binary;
        }

        Ok(self)
    }

    /// Returns true unless cleanup is suppressed.
    #[must_use]
    pub fn cleanup_enabled(&self) -> bool {
        !self.skip_cleanup
    }

    /// The overall run timeout.
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// The per-command timeout.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// The grace period for an in-flight stage after a stop.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// The per-module destroy timeout.
    #[must_use]
    pub fn destroy_timeout(&self) -> Duration {
        Duration::from_secs(self.destroy_timeout_secs)
    }
}

/// Parses a boolean environment value. Unrecognised text yields `None`.
#[must_use]
pub fn env_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.binary, "terraform");
        assert!(config.cleanup_enabled());
        assert!(config.keep_on_success);
        assert_eq!(config.run_timeout(), None);
        assert_eq!(config.grace_period(), Duration::ZERO);
        assert_eq!(config.command_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_env_flag() {
        assert_eq!(env_flag("TRUE"), Some(true));
        assert_eq!(env_flag(" 1 "), Some(true));
        assert_eq!(env_flag("off"), Some(false));
        assert_eq!(env_flag("maybe"), None);
    }

    #[test]
    fn test_skip_cleanup_env() {
        let config = HarnessConfig::default()
            .with_env_overrides(env(&[(ENV_SKIP_CLEANUP, "true")]))
            .unwrap();
        assert!(!config.cleanup_enabled());

        let legacy = HarnessConfig::default()
            .with_env_overrides(env(&[(ENV_LEGACY_SKIP_CLEANUP, "true")]))
            .unwrap();
        assert!(legacy.skip_cleanup);

        let newer_wins = HarnessConfig::default()
            .with_env_overrides(env(&[(ENV_LEGACY_SKIP_CLEANUP, "true"), (ENV_SKIP_CLEANUP, "false")]))
            .unwrap();
        assert!(!newer_wins.skip_cleanup);
    }

    #[test]
    fn test_timeout_and_binary_env() {
        let config = HarnessConfig::default()
            .with_env_overrides(env(&[(ENV_RUN_TIMEOUT, "900"), (ENV_BINARY, "tofu")]))
            .unwrap();
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(900)));
        assert_eq!(config.binary, "tofu");

        let err = HarnessConfig::default()
            .with_env_overrides(env(&[(ENV_RUN_TIMEOUT, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_RUN_TIMEOUT));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: HarnessConfig = serde_yaml::from_str("keep_on_success: false\nretry:\n  max_retries: 5\n").unwrap();
        assert!(!config.keep_on_success);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.binary, "terraform");
    }
}
