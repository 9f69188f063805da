//! Ordered record of deployed modules.
//!
//! Each run owns its own [`DeploymentTracker`]. Sharing one between concurrent
//! runs would interleave their teardown order.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::module::ModuleSpec;

/// One deployed module.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployedModule {
    /// The spec the module was applied with, vars included.
    pub spec: ModuleSpec,
    /// When the apply returned.
    pub deployed_at: DateTime<Utc>,
}

/// Insertion-ordered, thread-safe record of successfully applied modules.
#[derive(Debug, Default)]
pub struct DeploymentTracker {
    entries: RwLock<Vec<DeployedModule>>,
}

impl DeploymentTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything. Called at the start of every run.
    pub fn reset(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            debug!(stale = entries.len(), "Discarding stale deployment records");
        }
        entries.clear();
    }

    /// Records a module whose apply returned success.
    ///
    /// Re-recording an identifier replaces the earlier entry in place, so
    /// teardown position follows the first deployment.
    pub fn mark_deployed(&self, spec: &ModuleSpec) {
        let entry = DeployedModule {
            spec: spec.clone(),
            deployed_at: Utc::now(),
        };
        let mut entries = self.entries.write();
        match entries
            .iter_mut()
            .find(|e| e.spec.identifier == spec.identifier)
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    /// Identifiers in deployment order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.spec.identifier.clone())
            .collect()
    }

    /// Entries in deployment order.
    #[must_use]
    pub fn entries(&self) -> Vec<DeployedModule> {
        self.entries.read().clone()
    }

    /// Returns true if the module is recorded.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.spec.identifier == identifier)
    }

    /// Number of recorded modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Empties the record after cleanup.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(id: &str) -> ModuleSpec {
        ModuleSpec::new(id, format!("modules/{id}"))
    }

    #[test]
    fn test_insertion_order() {
        let tracker = DeploymentTracker::new();
        tracker.mark_deployed(&spec("bootstrap"));
        tracker.mark_deployed(&spec("security"));
        tracker.mark_deployed(&spec("network"));

        assert_eq!(tracker.snapshot(), vec!["bootstrap", "security", "network"]);
        assert!(tracker.contains("security"));
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_redeploy_keeps_position() {
        let tracker = DeploymentTracker::new();
        tracker.mark_deployed(&spec("a"));
        tracker.mark_deployed(&spec("b"));
        tracker.mark_deployed(&spec("a").with_var("x", 1));

        assert_eq!(tracker.snapshot(), vec!["a", "b"]);
        assert!(tracker.entries()[0].spec.vars.contains_key("x"));
    }

    #[test]
    fn test_reset_and_clear() {
        let tracker = DeploymentTracker::new();
        tracker.mark_deployed(&spec("a"));
        tracker.reset();
        assert!(tracker.is_empty());

        tracker.mark_deployed(&spec("b"));
        tracker.clear();
        assert!(tracker.snapshot().is_empty());
    }
}
