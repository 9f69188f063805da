//! Rule evaluation over a directory tree.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::rules::{PolicyRule, RuleKind, Severity};
use crate::errors::{HarnessError, HarnessResult};

/// One rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Rule that was violated.
    pub rule: String,
    /// Severity of the rule.
    pub severity: Severity,
    /// File containing the violation.
    pub file: PathBuf,
    /// 1-based line of the offending text.
    pub line: usize,
    /// Rule description.
    pub message: String,
    /// The offending line, trimmed.
    pub excerpt: String,
}

/// Result of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Number of files evaluated.
    pub files_scanned: usize,
    /// Violations in file order.
    pub violations: Vec<Violation>,
}

impl ScanReport {
    /// Returns true if nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns true if any error-severity violation was found.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Error)
    }

    /// Violations of a single rule.
    #[must_use]
    pub fn for_rule(&self, rule: &str) -> Vec<&Violation> {
        self.violations.iter().filter(|v| v.rule == rule).collect()
    }

    /// Number of violations at `severity`.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.violations.iter().filter(|v| v.severity == severity).count()
    }
}

#[derive(Debug)]
enum Compiled {
    Forbid(Regex),
    Require { when: Regex, then: Regex },
}

/// Evaluates a rule set over module sources.
#[derive(Debug)]
pub struct ComplianceScanner {
    rules: Vec<(PolicyRule, Compiled)>,
}

impl ComplianceScanner {
    /// Compiles `rules`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the rule with an invalid pattern.
    pub fn new(rules: Vec<PolicyRule>) -> HarnessResult<Self> {
        let compile = |rule: &PolicyRule, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                HarnessError::configuration(&rule.id, format!("invalid rule pattern: {e}"))
            })
        };

        let rules = rules
            .into_iter()
            .map(|rule| {
                let compiled = match &rule.kind {
                    RuleKind::Forbid { pattern } => Compiled::Forbid(compile(&rule, pattern)?),
                    RuleKind::Require { when, then } => Compiled::Require {
                        when: compile(&rule, when)?,
                        then: compile(&rule, then)?,
                    },
                };
                Ok((rule, compiled))
            })
            .collect::<HarnessResult<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Scans every `*.tf` file under `root`, skipping `.terraform` and hidden
    /// directories. Unreadable files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an IO error if `root` does not exist.
    pub fn scan(&self, root: &Path) -> HarnessResult<ScanReport> {
        if !root.exists() {
            return Err(HarnessError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", root.display()),
            )));
        }

        let mut report = ScanReport::default();
        let files = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "tf"));

        for entry in files {
            match std::fs::read_to_string(entry.path()) {
                Ok(source) => {
                    report.files_scanned += 1;
                    report.violations.extend(self.scan_source(entry.path(), &source));
                }
                Err(e) => warn!(file = %entry.path().display(), error = %e, "Skipping unreadable file"),
            }
        }

        debug!(
            files = report.files_scanned,
            violations = report.violations.len(),
            "Compliance scan finished"
        );
        Ok(report)
    }

    /// Evaluates every rule against one file's contents.
    #[must_use]
    pub fn scan_source(&self, file: &Path, source: &str) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (rule, compiled) in &self.rules {
            let offsets: Vec<usize> = match compiled {
                Compiled::Forbid(re) => re.find_iter(source).map(|m| m.start()).collect(),
                Compiled::Require { when, then } => match when.find(source) {
                    Some(m) if !then.is_match(source) => vec![m.start()],
                    _ => Vec::new(),
                },
            };

            violations.extend(offsets.into_iter().map(|offset| {
                let (line, excerpt) = locate(source, offset);
                Violation {
                    rule: rule.id.clone(),
                    severity: rule.severity,
                    file: file.to_path_buf(),
                    line,
                    message: rule.description.clone(),
                    excerpt,
                }
            }));
        }
        violations.sort_by_key(|v| v.line);
        violations
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// Returns the 1-based line number and trimmed text of the line at `offset`.
fn locate(source: &str, offset: usize) -> (usize, String) {
    let start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = source[offset..].find('\n').map_or(source.len(), |i| offset + i);
    let line = source[..offset].matches('\n').count() + 1;
    (line, source[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::default_rules;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn scanner() -> ComplianceScanner {
        ComplianceScanner::new(default_rules()).unwrap()
    }

    fn rules_hit(source: &str) -> Vec<String> {
        scanner()
            .scan_source(Path::new("main.tf"), source)
            .into_iter()
            .map(|v| v.rule)
            .collect()
    }

    #[test]
    fn test_compliant_bucket() {
        let source = r#"
resource "aws_s3_bucket" "state" {
  bucket = "terraform-state"
}

resource "aws_s3_bucket_server_side_encryption_configuration" "state" {
  bucket = aws_s3_bucket.state.id
  rule {
    apply_server_side_encryption_by_default {
      sse_algorithm = "aws:kms"
    }
  }
}

resource "aws_s3_bucket_public_access_block" "state" {
  bucket            = aws_s3_bucket.state.id
  block_public_acls = true
}
"#;
        assert!(rules_hit(source).is_empty());
    }

    #[test]
    fn test_unencrypted_bucket() {
        let hits = rules_hit("resource \"aws_s3_bucket\" \"logs\" {\n  bucket = \"logs\"\n}\n");
        assert_eq!(hits, vec!["s3-encryption", "s3-public-access-block"]);
    }

    #[test]
    fn test_wildcard_action_and_line_number() {
        let source = "data \"aws_iam_policy_document\" \"x\" {}\n\npolicy = jsonencode({\n  Statement = [{\n    Action = \"*\"\n  }]\n})\n";
        let violations = scanner().scan_source(Path::new("iam.tf"), source);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "iam-wildcard-action");
        assert_eq!(violations[0].line, 5);
        assert_eq!(violations[0].excerpt, "Action = \"*\"");
    }

    #[test]
    fn test_scoped_actions_pass() {
        assert!(rules_hit("Action = [\"s3:GetObject\", \"s3:*\"]\n").is_empty());
    }

    #[test]
    fn test_open_ssh() {
        let source = r#"
resource "aws_security_group" "bastion" {
  ingress {
    from_port   = 22
    to_port     = 22
    protocol    = "tcp"
    cidr_blocks = ["0.0.0.0/0"]
  }
}
"#;
        assert!(rules_hit(source).contains(&"ssh-open-to-world".to_string()));

        let restricted = source.replace("0.0.0.0/0", "10.0.0.0/16");
        assert!(!rules_hit(&restricted).contains(&"ssh-open-to-world".to_string()));
    }

    #[test]
    fn test_hardcoded_secret_but_not_references() {
        assert!(rules_hit("password = \"hunter2\"\n").contains(&"hardcoded-secret".to_string()));
        assert!(rules_hit("password = var.db_password\n").is_empty());
        assert!(rules_hit("password = \"${random_password.db.result}\"\n").is_empty());
    }

    #[test]
    fn test_rds_rules() {
        let source = "resource \"aws_db_instance\" \"main\" {\n  publicly_accessible = true\n}\n";
        let hits = rules_hit(source);
        assert!(hits.contains(&"rds-public".to_string()));
        assert!(hits.contains(&"rds-encryption".to_string()));
    }

    #[test]
    fn test_kms_and_cloudtrail() {
        let hits = rules_hit("resource \"aws_kms_key\" \"main\" {\n}\nresource \"aws_cloudtrail\" \"main\" {\n}\n");
        assert!(hits.contains(&"kms-rotation".to_string()));
        assert!(hits.contains(&"cloudtrail-hardening".to_string()));
    }

    #[test]
    fn test_warnings_do_not_fail_scan() {
        let report = ScanReport {
            files_scanned: 1,
            violations: scanner().scan_source(
                Path::new("main.tf"),
                "resource \"null_resource\" \"wait\" {}\naccount = \"123456789012\"\n",
            ),
        };
        assert_eq!(report.count(Severity::Warning), 2);
        assert!(!report.has_errors());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_scan_directory_skips_dot_terraform() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("modules/storage")).unwrap();
        fs::create_dir_all(dir.path().join("modules/storage/.terraform/modules")).unwrap();
        fs::write(
            dir.path().join("modules/storage/main.tf"),
            "resource \"aws_dynamodb_table\" \"locks\" {\n  name = \"locks\"\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("modules/storage/.terraform/modules/vendored.tf"),
            "resource \"null_resource\" \"x\" {}\n",
        )
        .unwrap();
        fs::write(dir.path().join("modules/storage/README.md"), "password = \"x\"").unwrap();

        let report = scanner().scan(dir.path()).unwrap();
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.for_rule("dynamodb-encryption").len(), 1);
        assert!(report.for_rule("null-resource").is_empty());
        assert!(report.has_errors());
    }

    #[test]
    fn test_missing_root_is_error() {
        assert!(scanner().scan(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let err = ComplianceScanner::new(vec![PolicyRule::forbid("bad", "bad", "(")]).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
