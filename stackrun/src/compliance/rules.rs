//! Policy rules and the built-in rule set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Reported, but does not fail a scan.
    Warning,
    /// Fails a scan.
    #[default]
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What a rule checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Every match of `pattern` is a violation.
    Forbid {
        /// Regular expression.
        pattern: String,
    },
    /// A file matching `when` must also match `then`.
    Require {
        /// Regular expression selecting files the rule applies to.
        when: String,
        /// Regular expression the file must also match.
        then: String,
    },
}

/// A named policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Stable identifier, e.g. `s3-encryption`.
    pub id: String,
    /// Message shown for violations.
    pub description: String,
    /// Severity of violations.
    #[serde(default)]
    pub severity: Severity,
    /// The check.
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl PolicyRule {
    /// Creates a rule forbidding `pattern`.
    #[must_use]
    pub fn forbid(id: impl Into<String>, description: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            severity: Severity::Error,
            kind: RuleKind::Forbid {
                pattern: pattern.into(),
            },
        }
    }

    /// Creates a rule requiring `then` in files matching `when`.
    #[must_use]
    pub fn require(
        id: impl Into<String>,
        description: impl Into<String>,
        when: impl Into<String>,
        then: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            severity: Severity::Error,
            kind: RuleKind::Require {
                when: when.into(),
                then: then.into(),
            },
        }
    }

    /// Downgrades the rule to a warning.
    #[must_use]
    pub fn warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }
}

/// The built-in rule set for AWS-flavoured modules.
#[must_use]
pub fn default_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule::forbid(
            "iam-wildcard-action",
            "IAM policy grants every action",
            r#""?Action"?\s*[=:]\s*\[?\s*"\*""#,
        ),
        PolicyRule::forbid(
            "iam-wildcard-resource",
            "IAM policy applies to every resource",
            r#""?Resource"?\s*[=:]\s*\[\s*"\*"\s*\]"#,
        )
        .warning(),
        PolicyRule::require(
            "s3-encryption",
            "S3 bucket without server-side encryption",
            r#"resource\s+"aws_s3_bucket"\s"#,
            r"aws_s3_bucket_server_side_encryption_configuration|sse_algorithm",
        ),
        PolicyRule::require(
            "s3-public-access-block",
            "S3 bucket without a public access block",
            r#"resource\s+"aws_s3_bucket"\s"#,
            r"aws_s3_bucket_public_access_block|block_public_acls\s*=\s*true",
        ),
        PolicyRule::require(
            "dynamodb-encryption",
            "DynamoDB table without server-side encryption",
            r#"resource\s+"aws_dynamodb_table""#,
            r"server_side_encryption|sse_specification|kms_key_arn",
        ),
        PolicyRule::require(
            "rds-encryption",
            "RDS instance without storage encryption",
            r#"resource\s+"aws_db_instance""#,
            r"storage_encrypted\s*=\s*true",
        ),
        PolicyRule::forbid(
            "rds-public",
            "Database is publicly accessible",
            r"publicly_accessible\s*=\s*true",
        ),
        PolicyRule::require(
            "kms-rotation",
            "KMS key without automatic rotation",
            r#"resource\s+"aws_kms_key""#,
            r"enable_key_rotation\s*=\s*true",
        ),
        PolicyRule::require(
            "cloudtrail-hardening",
            "CloudTrail without log file validation or multi-region coverage",
            r#"resource\s+"aws_cloudtrail""#,
            r"is_multi_region_trail\s*=\s*true|enable_log_file_validation\s*=\s*true",
        ),
        PolicyRule::require(
            "vpc-flow-logs",
            "VPC without flow logs",
            r#"resource\s+"aws_vpc"\s"#,
            r"aws_flow_log",
        )
        .warning(),
        PolicyRule::forbid(
            "ssh-open-to-world",
            "SSH ingress open to 0.0.0.0/0",
            r#"(?s)from_port\s*=\s*22\b[^}]*?cidr_blocks\s*=\s*\[\s*"0\.0\.0\.0/0"\s*\]"#,
        ),
        PolicyRule::forbid(
            "hardcoded-account-id",
            "Hard-coded AWS account id",
            r#"["']\d{12}["']"#,
        )
        .warning(),
        PolicyRule::forbid(
            "hardcoded-secret",
            "Hard-coded secret value",
            r#"(?i)\b(password|secret|api_key)\s*=\s*"[^"$]+""#,
        ),
        PolicyRule::require(
            "sensitive-variable",
            "Secret-like variable not marked sensitive",
            r#"variable\s+"(password|secret|key|token)"#,
            r"sensitive\s*=\s*true",
        )
        .warning(),
        PolicyRule::require(
            "sensitive-output",
            "Secret-like output not marked sensitive",
            r#"output\s+"(password|secret|private_key|api_key)""#,
            r"sensitive\s*=\s*true",
        ),
        PolicyRule::forbid(
            "null-resource",
            "null_resource used instead of native resources",
            r#"resource\s+"null_resource""#,
        )
        .warning(),
        PolicyRule::forbid(
            "deprecated-policy-attachment",
            "aws_iam_policy_attachment is exclusive; use aws_iam_role_policy_attachment",
            r#"resource\s+"aws_iam_policy_attachment""#,
        )
        .warning(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_rule_ids_unique() {
        let rules = default_rules();
        let ids: HashSet<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), rules.len());
    }

    #[test]
    fn test_rule_from_yaml() {
        let rule: PolicyRule = serde_yaml::from_str(
            "id: no-default-vpc\ndescription: default VPC used\nkind: forbid\npattern: aws_default_vpc\n",
        )
        .unwrap();
        assert_eq!(rule.severity, Severity::Error);
        assert_eq!(
            rule.kind,
            RuleKind::Forbid {
                pattern: "aws_default_vpc".to_string()
            }
        );
    }
}
