use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter};

use crate::errors::{HarnessError, HarnessResult};

/// Environment variable holding the log filter directive.
pub const ENV_LOG: &str = "STACKRUN_LOG";

/// Environment variable selecting the log format.
pub const ENV_LOG_FORMAT: &str = "STACKRUN_LOG_FORMAT";

/// Filter used when `STACKRUN_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, colored when attached to a terminal.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(HarnessError::configuration(
                ENV_LOG_FORMAT,
                format!("unknown log format '{other}'"),
            )),
        }
    }
}

/// Installs the global subscriber.
///
/// `filter` overrides `STACKRUN_LOG`; when both are absent [`DEFAULT_FILTER`]
/// is used.
///
/// # Errors
///
/// Returns a configuration error if the filter directive is invalid or a
/// global subscriber is already installed.
pub fn init_logging(format: LogFormat, filter: Option<&str>) -> HarnessResult<()> {
    let directive = filter
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_LOG).ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());

    let env_filter = EnvFilter::try_new(&directive).map_err(|e| {
        HarnessError::configuration(ENV_LOG, format!("invalid filter '{directive}': {e}"))
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                tfmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tfmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| HarnessError::configuration("logging", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let err = init_logging(LogFormat::Pretty, Some("stackrun=loud")).unwrap_err();
        assert!(err.to_string().contains("invalid filter"));
    }
}
