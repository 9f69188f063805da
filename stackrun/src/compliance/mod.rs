//! Static policy checks over module sources.
//!
//! Rules are regular expressions evaluated per `*.tf` file; the engine is
//! never invoked.

mod rules;
mod scan;

pub use rules::{default_rules, PolicyRule, RuleKind, Severity};
pub use scan::{ComplianceScanner, ScanReport, Violation};
