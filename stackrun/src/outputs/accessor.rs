//! Strict and safe output accessors.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::parse::{render_list, render_scalar, type_name, OutputMap};
use crate::driver::LifecycleDriver;
use crate::errors::{HarnessError, HarnessResult};
use crate::module::ModuleSpec;

/// Read-only view over the outputs a module already published.
#[derive(Debug, Clone, Copy)]
pub struct OutputView<'a> {
    module: &'a str,
    outputs: &'a OutputMap,
}

impl<'a> OutputView<'a> {
    /// Creates a view over `outputs` published by `module`.
    #[must_use]
    pub fn new(module: &'a str, outputs: &'a OutputMap) -> Self {
        Self { module, outputs }
    }

    /// The module the outputs belong to.
    #[must_use]
    pub fn module(&self) -> &str {
        self.module
    }

    /// Returns true if the output exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.outputs.contains_key(key)
    }

    /// Returns the raw JSON value of an output.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.outputs.get(key)
    }

    /// Returns an output rendered as text.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::OutputMissing`] if the output is absent.
    pub fn get(&self, key: &str) -> HarnessResult<String> {
        self.outputs
            .get(key)
            .map(render_scalar)
            .ok_or_else(|| HarnessError::output_missing(self.module, key))
    }

    /// Like [`get`](Self::get) but returns an empty string on failure.
    #[must_use]
    pub fn get_safe(&self, key: &str) -> String {
        self.get(key).unwrap_or_else(|err| {
            warn!(module = %self.module, key = %key, error = %err, "Output unavailable, using empty string");
            String::new()
        })
    }

    /// Returns a list output with each element rendered as text.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::OutputMissing`] if the output is absent and
    /// [`HarnessError::OutputParse`] if it is not a list.
    pub fn list(&self, key: &str) -> HarnessResult<Vec<String>> {
        let value = self
            .outputs
            .get(key)
            .ok_or_else(|| HarnessError::output_missing(self.module, key))?;
        render_list(value).ok_or_else(|| {
            HarnessError::output_parse(
                self.module,
                format!("output '{key}' is a {}, not a list", type_name(value)),
            )
        })
    }

    /// Like [`list`](Self::list) but returns an empty list on failure.
    #[must_use]
    pub fn list_safe(&self, key: &str) -> Vec<String> {
        self.list(key).unwrap_or_else(|err| {
            warn!(module = %self.module, key = %key, error = %err, "Output unavailable, using empty list");
            Vec::new()
        })
    }

    /// Returns every output.
    #[must_use]
    pub fn all(&self) -> OutputMap {
        self.outputs.clone()
    }
}

/// Reads outputs of deployed modules through a [`LifecycleDriver`].
#[derive(Clone)]
pub struct OutputAccessor {
    driver: Arc<dyn LifecycleDriver>,
}

impl std::fmt::Debug for OutputAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputAccessor").finish_non_exhaustive()
    }
}

impl OutputAccessor {
    /// Creates an accessor backed by `driver`.
    #[must_use]
    pub fn new(driver: Arc<dyn LifecycleDriver>) -> Self {
        Self { driver }
    }

    /// Reads every output of the module.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if retrieval or parsing fails.
    pub async fn output_all(&self, spec: &ModuleSpec) -> HarnessResult<OutputMap> {
        self.driver.outputs(spec).await
    }

    /// Like [`output_all`](Self::output_all) but returns an empty map on failure.
    pub async fn output_all_safe(&self, spec: &ModuleSpec) -> OutputMap {
        match self.output_all(spec).await {
            Ok(outputs) => outputs,
            Err(err) => {
                warn!(module = %spec.identifier, error = %err, "Outputs unavailable, using empty map");
                OutputMap::new()
            }
        }
    }

    /// Reads one output as text.
    ///
    /// # Errors
    ///
    /// Fails if retrieval fails or the output is absent.
    pub async fn output(&self, spec: &ModuleSpec, key: &str) -> HarnessResult<String> {
        let outputs = self.output_all(spec).await?;
        OutputView::new(&spec.identifier, &outputs).get(key)
    }

    /// Like [`output`](Self::output) but returns an empty string on failure.
    pub async fn output_safe(&self, spec: &ModuleSpec, key: &str) -> String {
        match self.output(spec, key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(module = %spec.identifier, key = %key, error = %err, "Output unavailable, using empty string");
                String::new()
            }
        }
    }

    /// Reads one list output.
    ///
    /// # Errors
    ///
    /// Fails if retrieval fails, the output is absent or it is not a list.
    pub async fn output_list(&self, spec: &ModuleSpec, key: &str) -> HarnessResult<Vec<String>> {
        let outputs = self.output_all(spec).await?;
        OutputView::new(&spec.identifier, &outputs).list(key)
    }

    /// Like [`output_list`](Self::output_list) but returns an empty list on failure.
    pub async fn output_list_safe(&self, spec: &ModuleSpec, key: &str) -> Vec<String> {
        match self.output_list(spec, key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(module = %spec.identifier, key = %key, error = %err, "Output unavailable, using empty list");
                Vec::new()
            }
        }
    }
}
