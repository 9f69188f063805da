//! In-stage verification.
//!
//! Verifiers run after a successful apply (or plan) and before the run
//! advances. Every failing check of a stage is collected.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::PlanDiff;
use crate::outputs::{is_empty_value, render_scalar, type_name, OutputView};

/// What a verifier can inspect.
#[derive(Debug, Clone, Copy)]
pub struct VerificationContext<'a> {
    /// Stage being verified.
    pub stage: &'a str,
    /// Outputs the stage published. Empty for plan-only stages.
    pub outputs: OutputView<'a>,
    /// The plan, for plan-only stages.
    pub plan: Option<&'a PlanDiff>,
}

/// A check over a stage's outputs or plan.
pub trait Verifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Runs the check, returning one message per failed assertion.
    ///
    /// # Errors
    ///
    /// Returns the failure messages when the check does not hold.
    fn verify(&self, ctx: &VerificationContext<'_>) -> Result<(), Vec<String>>;
}

type CheckFn = dyn Fn(&VerificationContext<'_>) -> Result<(), String> + Send + Sync;

/// Verifier backed by a closure.
pub struct FnVerifier {
    name: String,
    check: Box<CheckFn>,
}

impl FnVerifier {
    /// Wraps `check` under `name`.
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&VerificationContext<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

impl std::fmt::Debug for FnVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnVerifier").field("name", &self.name).finish()
    }
}

impl Verifier for FnVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn verify(&self, ctx: &VerificationContext<'_>) -> Result<(), Vec<String>> {
        (self.check)(ctx).map_err(|failure| vec![failure])
    }
}

/// Declarative check, as written in a run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Expectation {
    /// The output exists and is not null, "", [] or {}.
    NotEmpty {
        /// Output name.
        output: String,
    },
    /// The output equals a value exactly.
    Equals {
        /// Output name.
        output: String,
        /// Expected value.
        value: Value,
    },
    /// A string output contains a substring, or a list output contains an element.
    Contains {
        /// Output name.
        output: String,
        /// Substring or element.
        value: String,
    },
    /// The output's text matches a regular expression.
    Matches {
        /// Output name.
        output: String,
        /// Regular expression.
        pattern: String,
    },
    /// A list or map output has at least `count` entries.
    MinItems {
        /// Output name.
        output: String,
        /// Minimum number of entries.
        count: usize,
    },
    /// The output is not published.
    Absent {
        /// Output name.
        output: String,
    },
    /// The plan has a change for the resource address.
    ResourcePlanned {
        /// Resource address, e.g. `aws_instance.bastion`.
        address: String,
    },
}

impl Expectation {
    /// Evaluates the expectation.
    ///
    /// # Errors
    ///
    /// Returns a message describing the mismatch.
    pub fn check(&self, ctx: &VerificationContext<'_>) -> Result<(), String> {
        match self {
            Self::NotEmpty { output } => {
                let value = required(ctx, output)?;
                if is_empty_value(value) {
                    Err(format!("output '{output}' is empty"))
                } else {
                    Ok(())
                }
            }
            Self::Equals { output, value } => {
                let actual = required(ctx, output)?;
                if actual == value || matches!(actual, Value::String(_)) && render_scalar(value) == render_scalar(actual) {
                    Ok(())
                } else {
                    Err(format!("output '{output}' is {actual}, expected {value}"))
                }
            }
            Self::Contains { output, value } => match required(ctx, output)? {
                Value::Array(items) if items.iter().any(|i| render_scalar(i) == *value) => Ok(()),
                Value::String(s) if s.contains(value.as_str()) => Ok(()),
                other => Err(format!("output '{output}' ({}) does not contain '{value}'", type_name(other))),
            },
            Self::Matches { output, pattern } => {
                let re = Regex::new(pattern).map_err(|e| format!("invalid pattern for '{output}': {e}"))?;
                let text = render_scalar(required(ctx, output)?);
                if re.is_match(&text) {
                    Ok(())
                } else {
                    Err(format!("output '{output}' = '{text}' does not match /{pattern}/"))
                }
            }
            Self::MinItems { output, count } => {
                let len = match required(ctx, output)? {
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    other => return Err(format!("output '{output}' is a {}, not a collection", type_name(other))),
                };
                if len >= *count {
                    Ok(())
                } else {
                    Err(format!("output '{output}' has {len} items, expected at least {count}"))
                }
            }
            Self::Absent { output } => {
                if ctx.outputs.contains(output) {
                    Err(format!("output '{output}' should not be published"))
                } else {
                    Ok(())
                }
            }
            Self::ResourcePlanned { address } => match ctx.plan {
                Some(plan) if plan.contains(address) => Ok(()),
                Some(_) => Err(format!("resource '{address}' is not in the plan")),
                None => Err(format!("no plan available to check resource '{address}'")),
            },
        }
    }
}

fn required<'a>(ctx: &VerificationContext<'a>, output: &str) -> Result<&'a Value, String> {
    ctx.outputs
        .raw(output)
        .ok_or_else(|| format!("output '{output}' is missing"))
}

/// Runs a list of [`Expectation`]s, collecting every failure.
#[derive(Debug, Clone, Default)]
pub struct ExpectationVerifier {
    expectations: Vec<Expectation>,
}

impl ExpectationVerifier {
    /// Creates a verifier over `expectations`.
    #[must_use]
    pub fn new(expectations: Vec<Expectation>) -> Self {
        Self { expectations }
    }

    /// Returns true if there is nothing to check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expectations.is_empty()
    }
}

impl Verifier for ExpectationVerifier {
    fn name(&self) -> &str {
        "expectations"
    }

    fn verify(&self, ctx: &VerificationContext<'_>) -> Result<(), Vec<String>> {
        let failures: Vec<String> = self
            .expectations
            .iter()
            .filter_map(|e| e.check(ctx).err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::OutputMap;
    use serde_json::json;

    fn outputs() -> OutputMap {
        let mut map = OutputMap::new();
        map.insert("role_name".to_string(), json!("bastion-role"));
        map.insert("subnet_ids".to_string(), json!(["subnet-a", "subnet-b"]));
        map.insert("port".to_string(), json!(22));
        map.insert("empty".to_string(), json!(""));
        map
    }

    fn check(expectation: &Expectation, outputs: &OutputMap) -> Result<(), String> {
        let ctx = VerificationContext {
            stage: "security",
            outputs: OutputView::new("security", outputs),
            plan: None,
        };
        expectation.check(&ctx)
    }

    #[test]
    fn test_expectations_pass() {
        let o = outputs();
        let passing = vec![
            Expectation::NotEmpty { output: "role_name".into() },
            Expectation::Equals { output: "port".into(), value: json!(22) },
            Expectation::Equals { output: "role_name".into(), value: json!("bastion-role") },
            Expectation::Contains { output: "subnet_ids".into(), value: "subnet-b".into() },
            Expectation::Contains { output: "role_name".into(), value: "bastion".into() },
            Expectation::Matches { output: "role_name".into(), pattern: "^bastion-".into() },
            Expectation::MinItems { output: "subnet_ids".into(), count: 2 },
            Expectation::Absent { output: "password".into() },
        ];
        for e in &passing {
            assert!(check(e, &o).is_ok(), "{e:?}");
        }
    }

    #[test]
    fn test_expectations_fail() {
        let o = outputs();
        assert!(check(&Expectation::NotEmpty { output: "empty".into() }, &o).is_err());
        assert!(check(&Expectation::NotEmpty { output: "missing".into() }, &o)
            .unwrap_err()
            .contains("missing"));
        assert!(check(&Expectation::MinItems { output: "subnet_ids".into(), count: 3 }, &o).is_err());
        assert!(check(&Expectation::MinItems { output: "port".into(), count: 1 }, &o).is_err());
        assert!(check(&Expectation::Absent { output: "port".into() }, &o).is_err());
        assert!(check(&Expectation::ResourcePlanned { address: "aws_vpc.main".into() }, &o).is_err());
    }

    #[test]
    fn test_expectation_verifier_collects_all_failures() {
        let o = outputs();
        let verifier = ExpectationVerifier::new(vec![
            Expectation::NotEmpty { output: "empty".into() },
            Expectation::NotEmpty { output: "role_name".into() },
            Expectation::Absent { output: "port".into() },
        ]);
        let ctx = VerificationContext {
            stage: "security",
            outputs: OutputView::new("security", &o),
            plan: None,
        };
        assert_eq!(verifier.verify(&ctx).unwrap_err().len(), 2);
    }

    #[test]
    fn test_resource_planned_against_plan() {
        let plan = PlanDiff::parse(
            r#"{"resource_changes":[{"address":"aws_instance.bastion","type":"aws_instance","name":"bastion","change":{"actions":["create"]}}]}"#,
        )
        .unwrap();
        let o = OutputMap::new();
        let ctx = VerificationContext {
            stage: "compute",
            outputs: OutputView::new("compute", &o),
            plan: Some(&plan),
        };
        assert!(Expectation::ResourcePlanned { address: "aws_instance.bastion".into() }
            .check(&ctx)
            .is_ok());
    }

    #[test]
    fn test_expectation_from_yaml() {
        let e: Expectation = serde_yaml::from_str("check: min_items\noutput: subnet_ids\ncount: 2\n").unwrap();
        assert_eq!(e, Expectation::MinItems { output: "subnet_ids".into(), count: 2 });
    }

    #[test]
    fn test_fn_verifier() {
        let verifier = FnVerifier::new("role-present", |ctx| {
            ctx.outputs.get("role_name").map(|_| ()).map_err(|e| e.to_string())
        });
        let o = OutputMap::new();
        let ctx = VerificationContext {
            stage: "security",
            outputs: OutputView::new("security", &o),
            plan: None,
        };
        assert_eq!(verifier.name(), "role-present");
        assert_eq!(verifier.verify(&ctx).unwrap_err().len(), 1);
    }
}
