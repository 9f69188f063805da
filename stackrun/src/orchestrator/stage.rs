//! Stage definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::verify::Verifier;
use crate::module::ModuleSpec;

/// Feeds an output of an earlier stage into an input variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Variable of this stage's module to set.
    pub variable: String,
    /// Identifier of the earlier stage publishing the value.
    pub from_stage: String,
    /// Output name on that stage.
    pub output_key: String,
    /// Fail the stage when the value cannot be resolved.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl InputBinding {
    /// Creates a required binding.
    #[must_use]
    pub fn new(
        variable: impl Into<String>,
        from_stage: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            variable: variable.into(),
            from_stage: from_stage.into(),
            output_key: output_key.into(),
            required: true,
        }
    }

    /// Marks the binding optional: unresolved values are omitted.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

impl fmt::Display for InputBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- {}.{}", self.variable, self.from_stage, self.output_key)
    }
}

/// What a stage does with its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// init, apply, read outputs, verify.
    #[default]
    Apply,
    /// init, plan, verify the plan. Nothing is deployed.
    PlanOnly,
}

/// One step of a run: a module plus how to wire and verify it.
#[derive(Clone)]
pub struct StageDef {
    /// The module to drive. Bound inputs are merged into its vars.
    pub module: ModuleSpec,
    /// Inputs resolved from earlier stages.
    pub bindings: Vec<InputBinding>,
    /// Apply or plan only.
    pub mode: StageMode,
    /// Checks run after a successful apply or plan.
    pub verifiers: Vec<Arc<dyn Verifier>>,
}

impl fmt::Debug for StageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDef")
            .field("module", &self.module.identifier)
            .field("bindings", &self.bindings)
            .field("mode", &self.mode)
            .field(
                "verifiers",
                &self.verifiers.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl StageDef {
    /// Creates an apply stage for `module`.
    #[must_use]
    pub fn new(module: ModuleSpec) -> Self {
        Self {
            module,
            bindings: Vec::new(),
            mode: StageMode::Apply,
            verifiers: Vec::new(),
        }
    }

    /// Identifier of the stage (its module's identifier).
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.module.identifier
    }

    /// Adds a required binding.
    #[must_use]
    pub fn bind(
        self,
        variable: impl Into<String>,
        from_stage: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        self.with_binding(InputBinding::new(variable, from_stage, output_key))
    }

    /// Adds a binding.
    #[must_use]
    pub fn with_binding(mut self, binding: InputBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Sets the stage mode.
    #[must_use]
    pub fn with_mode(mut self, mode: StageMode) -> Self {
        self.mode = mode;
        self
    }

    /// Adds a verifier.
    #[must_use]
    pub fn verify_with(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FnVerifier;

    #[test]
    fn test_stage_builder() {
        let stage = StageDef::new(ModuleSpec::new("network", "modules/network"))
            .bind("instance_profile_name", "security", "bastion_instance_profile_name")
            .with_binding(InputBinding::new("kms_key_arn", "security", "kms_key_arn").optional())
            .verify_with(Arc::new(FnVerifier::new("noop", |_| Ok(()))));

        assert_eq!(stage.identifier(), "network");
        assert_eq!(stage.bindings.len(), 2);
        assert!(stage.bindings[0].required);
        assert!(!stage.bindings[1].required);
        assert_eq!(stage.mode, StageMode::Apply);
        assert!(format!("{stage:?}").contains("noop"));
    }

    #[test]
    fn test_binding_display_and_default() {
        let binding: InputBinding =
            serde_json::from_str(r#"{"variable":"v","from_stage":"a","output_key":"k"}"#).unwrap();
        assert!(binding.required);
        assert_eq!(binding.to_string(), "v <- a.k");
    }
}
