//! YAML run manifests.
//!
//! ```yaml
//! name: e2e
//! settings:
//!   keep_on_success: false
//! defaults:
//!   vars:
//!     environment: test
//! stages:
//!   - name: security
//!     dir: envs/test/security
//!     expect:
//!       - check: not_empty
//!         output: bastion_instance_profile_name
//!   - name: network
//!     dir: envs/test/network
//!     inputs:
//!       - variable: instance_profile_name
//!         from: security
//!         output: bastion_instance_profile_name
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::settings::HarnessConfig;
use crate::driver::RetryPolicy;
use crate::errors::{HarnessError, HarnessResult};
use crate::module::{ModuleSpec, VarMap};
use crate::orchestrator::{
    Expectation, ExpectationVerifier, InputBinding, Orchestrator, StageDef, StageMode,
};

/// A run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunManifest {
    /// Name used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Harness settings; unset fields keep their defaults.
    #[serde(default)]
    pub settings: HarnessConfig,
    /// Values shared by every stage.
    #[serde(default)]
    pub defaults: ManifestDefaults,
    /// Stages in execution order.
    pub stages: Vec<StageManifest>,
    /// Directory relative stage paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_name() -> String {
    "stackrun".to_string()
}

/// Values shared by every stage of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestDefaults {
    /// Variables passed to every stage; stage vars win.
    #[serde(default)]
    pub vars: VarMap,
    /// Environment passed to every stage; stage env wins.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Retry policy for stages without their own.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

/// One stage of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageManifest {
    /// Stage identifier.
    pub name: String,
    /// Module directory.
    pub dir: PathBuf,
    /// Engine binary, if different from the harness setting.
    #[serde(default)]
    pub binary: Option<String>,
    /// Input variables.
    #[serde(default)]
    pub vars: VarMap,
    /// Extra engine environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Inputs bound to outputs of earlier stages.
    #[serde(default)]
    pub inputs: Vec<BindingDef>,
    /// Apply or plan only.
    #[serde(default)]
    pub mode: StageMode,
    /// Retry policy override.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Per-command timeout override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Declarative checks run after apply or plan.
    #[serde(default)]
    pub expect: Vec<Expectation>,
}

/// An input binding as written in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingDef {
    /// Variable to set.
    pub variable: String,
    /// Stage publishing the value.
    pub from: String,
    /// Output name on that stage.
    pub output: String,
    /// Fail when unresolved.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl From<&BindingDef> for InputBinding {
    fn from(def: &BindingDef) -> Self {
        Self {
            variable: def.variable.clone(),
            from_stage: def.from.clone(),
            output_key: def.output.clone(),
            required: def.required,
        }
    }
}

impl RunManifest {
    /// Parses a manifest. Relative stage directories resolve against the
    /// current directory.
    ///
    /// # Errors
    ///
    /// Returns a manifest error for malformed YAML or an invalid stage list.
    pub fn from_yaml_str(text: &str) -> HarnessResult<Self> {
        let manifest: Self = serde_yaml::from_str(text)?;
        manifest.check()?;
        Ok(manifest)
    }

    /// Reads a manifest file. Relative stage directories resolve against the
    /// file's directory.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or a manifest error.
    pub fn from_path(path: &Path) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Manifest(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut manifest = Self::from_yaml_str(&text)?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    fn check(&self) -> HarnessResult<()> {
        if self.stages.is_empty() {
            return Err(HarnessError::Manifest("no stages declared".to_string()));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(HarnessError::Manifest("stage name cannot be empty".to_string()));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(HarnessError::Manifest(format!(
                    "stage '{}' is declared twice",
                    stage.name
                )));
            }
        }
        Ok(())
    }

    /// Resolves every stage into a module spec, without bindings.
    #[must_use]
    pub fn module_specs(&self, config: &HarnessConfig) -> Vec<ModuleSpec> {
        self.stages.iter().map(|s| self.module_spec(s, config)).collect()
    }

    fn module_spec(&self, stage: &StageManifest, config: &HarnessConfig) -> ModuleSpec {
        let mut vars = self.defaults.vars.clone();
        vars.extend(stage.vars.clone());

        let retry = stage
            .retry
            .clone()
            .or_else(|| self.defaults.retry.clone())
            .unwrap_or_else(|| config.retry.clone());

        let mut spec = ModuleSpec::new(&stage.name, &stage.dir)
            .with_binary(stage.binary.clone().unwrap_or_else(|| config.binary.clone()))
            .with_vars(vars)
            .with_retry(retry)
            .with_command_timeout(Duration::from_secs(
                stage.timeout_secs.unwrap_or(config.command_timeout_secs),
            ))
            .relative_to(&self.base_dir);

        for (key, value) in self.defaults.env.iter().chain(&stage.env) {
            spec = spec.with_env(key, value);
        }
        spec
    }

    /// Builds the stage list.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if bindings reference unknown or later
    /// stages.
    pub fn into_stages(&self, config: &HarnessConfig) -> HarnessResult<Vec<StageDef>> {
        let stages: Vec<StageDef> = self
            .stages
            .iter()
            .map(|stage| {
                let mut def = StageDef::new(self.module_spec(stage, config)).with_mode(stage.mode);
                for binding in &stage.inputs {
                    def = def.with_binding(binding.into());
                }
                if !stage.expect.is_empty() {
                    def = def.verify_with(Arc::new(ExpectationVerifier::new(stage.expect.clone())));
                }
                def
            })
            .collect();

        Orchestrator::validate(&stages)?;
        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const MANIFEST: &str = r#"
name: e2e
settings:
  keep_on_success: false
defaults:
  vars:
    environment: test
    region: eu-north-1
  env:
    AWS_REGION: eu-north-1
stages:
  - name: bootstrap
    dir: envs/test/bootstrap
  - name: security
    dir: envs/test/security
    vars:
      environment: staging
    retry:
      max_retries: 5
      backoff_ms: 10000
    expect:
      - check: not_empty
        output: bastion_instance_profile_name
  - name: network
    dir: /abs/envs/test/network
    binary: tofu
    timeout_secs: 600
    inputs:
      - variable: instance_profile_name
        from: security
        output: bastion_instance_profile_name
      - variable: kms_key_arn
        from: security
        output: kms_key_arn
        required: false
  - name: compute
    dir: envs/test/compute
    mode: plan_only
    expect:
      - check: resource_planned
        address: aws_instance.bastion
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = RunManifest::from_yaml_str(MANIFEST).unwrap();
        assert_eq!(manifest.name, "e2e");
        assert!(!manifest.settings.keep_on_success);
        assert_eq!(manifest.stages.len(), 4);
        assert_eq!(manifest.stages[3].mode, StageMode::PlanOnly);
        assert!(!manifest.stages[2].inputs[1].required);
    }

    #[test]
    fn test_into_stages_merges_defaults() {
        let mut manifest = RunManifest::from_yaml_str(MANIFEST).unwrap();
        manifest.base_dir = PathBuf::from("/repo/tests");
        let stages = manifest.into_stages(&manifest.settings.clone()).unwrap();

        let security = &stages[1].module;
        assert_eq!(security.vars.get("environment"), Some(&json!("staging")));
        assert_eq!(security.vars.get("region"), Some(&json!("eu-north-1")));
        assert_eq!(security.retry.max_retries, 5);
        assert_eq!(security.location, PathBuf::from("/repo/tests/envs/test/security"));
        assert_eq!(security.env.get("AWS_REGION").map(String::as_str), Some("eu-north-1"));
        assert_eq!(stages[1].verifiers.len(), 1);

        let network = &stages[2].module;
        assert_eq!(network.binary, "tofu");
        assert_eq!(network.location, PathBuf::from("/abs/envs/test/network"));
        assert_eq!(network.command_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(stages[2].bindings.len(), 2);

        assert_eq!(stages[0].module.binary, "terraform");
        assert_eq!(stages[0].module.retry, RetryPolicy::default());
    }

    #[test]
    fn test_forward_binding_rejected() {
        let text = r"
stages:
  - name: network
    dir: network
    inputs:
      - variable: profile
        from: security
        output: name
  - name: security
    dir: security
";
        let manifest = RunManifest::from_yaml_str(text).unwrap();
        assert!(manifest.into_stages(&HarnessConfig::default()).is_err());
    }

    #[test]
    fn test_invalid_manifests() {
        assert!(matches!(
            RunManifest::from_yaml_str("stages: []"),
            Err(HarnessError::Manifest(_))
        ));
        assert!(matches!(
            RunManifest::from_yaml_str("stages:\n  - name: a\n    dir: a\n  - name: a\n    dir: b\n"),
            Err(HarnessError::Manifest(_))
        ));
        assert!(matches!(
            RunManifest::from_yaml_str("stages:\n  - name: a\n    dir: a\n    colour: red\n"),
            Err(HarnessError::Manifest(_))
        ));
    }

    #[test]
    fn test_from_path_resolves_relative_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, "stages:\n  - name: vpc\n    dir: modules/vpc\n").unwrap();

        let manifest = RunManifest::from_path(&path).unwrap();
        let specs = manifest.module_specs(&HarnessConfig::default());
        assert_eq!(specs[0].location, dir.path().join("modules/vpc"));
    }
}
