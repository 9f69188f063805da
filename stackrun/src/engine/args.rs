//! Engine command-line formatting.

use crate::module::ModuleSpec;
use std::fmt;

/// Plan file written into the module directory by `plan` and read by `show`.
pub const PLAN_FILE: &str = "stackrun.tfplan";

/// The engine subcommands the harness issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCommand {
    /// `init`
    Init,
    /// `plan -out=<PLAN_FILE>`
    Plan,
    /// `show -json <PLAN_FILE>`
    Show,
    /// `apply -auto-approve`
    Apply,
    /// `destroy -auto-approve`
    Destroy,
    /// `output -json`
    Output,
}

impl EngineCommand {
    /// The subcommand name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Show => "show",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Output => "output",
        }
    }

    /// Whether the command takes `-var` arguments.
    #[must_use]
    pub fn takes_vars(&self) -> bool {
        matches!(self, Self::Plan | Self::Apply | Self::Destroy)
    }

    /// Builds the argument list for `spec`.
    #[must_use]
    pub fn args(&self, spec: &ModuleSpec) -> Vec<String> {
        let mut args: Vec<String> = match self {
            Self::Init => vec!["init", "-input=false"],
            Self::Plan => vec!["plan", "-input=false"],
            Self::Show => vec!["show", "-json"],
            Self::Apply => vec!["apply", "-input=false", "-auto-approve"],
            Self::Destroy => vec!["destroy", "-input=false", "-auto-approve"],
            Self::Output => vec!["output", "-json"],
        }
        .into_iter()
        .map(String::from)
        .collect();

        args.push("-no-color".to_string());

        if self.takes_vars() {
            for (name, value) in &spec.vars {
                args.push("-var".to_string());
                args.push(format_var(name, value));
            }
        }

        match self {
            Self::Plan => args.push(format!("-out={PLAN_FILE}")),
            Self::Show => args.push(PLAN_FILE.to_string()),
            _ => {}
        }

        args
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Formats one `-var` value.
///
/// Strings are passed raw; every other value is rendered as JSON, which the
/// engine parses as an HCL expression (lists, maps, numbers, bools).
#[must_use]
pub fn format_var(name: &str, value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("{name}={s}"),
        serde_json::Value::Null => format!("{name}=null"),
        other => format!("{name}={other}"),
    }
}
