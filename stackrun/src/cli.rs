//! Command-line interface.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use stackrun::cleanup::{run_with_failsafe, FailsafeCleanup, FailsafeOptions};
use stackrun::config::{HarnessConfig, RunManifest};
use stackrun::driver::{EngineDriver, LifecycleDriver};
use stackrun::events::LoggingEventSink;
use stackrun::observability::{init_logging, LogFormat, ENV_LOG, ENV_LOG_FORMAT};
use stackrun::orchestrator::Orchestrator;
use stackrun::tracker::DeploymentTracker;

/// Exit code for a failed stage, cleanup failure or error-level scan finding.
const EXIT_FAILED: u8 = 1;
/// Exit code for usage and manifest errors.
pub const EXIT_USAGE: u8 = 2;

/// Staged deploy, verify and failsafe teardown for infrastructure stacks
#[derive(Debug, Parser)]
#[command(name = "stackrun", version, propagate_version = true)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, env = ENV_LOG_FORMAT, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Log filter directive, e.g. `stackrun=debug`
    #[arg(long, global = true, env = ENV_LOG)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy every stage in order, verify it, and clean up on failure
    Deploy(DeployArgs),

    /// Plan every stage with its static variables, without applying
    Plan(ManifestArgs),

    /// Destroy every stage of a manifest in reverse order
    Teardown(ManifestArgs),

    /// Check module sources against compliance rules
    #[cfg(feature = "compliance")]
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
pub struct ManifestArgs {
    /// Path to the run manifest
    #[arg(default_value = "stackrun.yaml")]
    pub manifest: PathBuf,

    /// Engine binary, overrides the manifest and `STACKRUN_BINARY`
    #[arg(long)]
    pub binary: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Leave deployed modules up when the run fails
    #[arg(long)]
    pub skip_cleanup: bool,

    /// Destroy everything even when the run succeeds
    #[arg(long, conflicts_with = "keep")]
    pub destroy_on_success: bool,

    /// Keep resources after a successful run
    #[arg(long)]
    pub keep: bool,

    /// Abort the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub run_timeout: Option<u64>,

    /// Let an in-flight stage run this many seconds after a timeout or Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub grace_period: Option<u64>,

    /// Write the run report as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[cfg(feature = "compliance")]
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// YAML file with rules replacing the built-in set
    #[arg(long, value_name = "FILE")]
    pub rules: Option<PathBuf>,
}

impl Cli {
    /// Executes the selected command.
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable manifests, invalid configuration or
    /// logging setup failures. Stage failures are reported through the exit
    /// code instead.
    pub async fn run(self) -> Result<ExitCode> {
        init_logging(self.log_format, self.log.as_deref()).context("cannot initialise logging")?;

        match self.command {
            Command::Deploy(args) => deploy(args).await,
            Command::Plan(args) => plan(&args).await,
            Command::Teardown(args) => teardown(&args).await,
            #[cfg(feature = "compliance")]
            Command::Scan(args) => scan(&args),
        }
    }
}

fn load(args: &ManifestArgs) -> Result<(RunManifest, HarnessConfig)> {
    let manifest = RunManifest::from_path(&args.manifest)
        .with_context(|| format!("cannot load manifest {}", args.manifest.display()))?;
    let mut config = manifest
        .settings
        .clone()
        .with_process_env()
        .context("invalid environment configuration")?;
    if let Some(binary) = &args.binary {
        config = config.with_binary(binary.clone());
    }
    Ok((manifest, config))
}

fn engine_driver(config: &HarnessConfig) -> Arc<dyn LifecycleDriver> {
    Arc::new(
        EngineDriver::default()
            .with_default_timeout(config.command_timeout())
            .with_event_sink(Arc::new(LoggingEventSink::debug())),
    )
}

async fn deploy(args: DeployArgs) -> Result<ExitCode> {
    let (manifest, mut config) = load(&args.manifest)?;
    if args.skip_cleanup {
        config = config.with_skip_cleanup(true);
    }
    if args.destroy_on_success {
        config = config.with_keep_on_success(false);
    } else if args.keep {
        config = config.with_keep_on_success(true);
    }
    if let Some(secs) = args.run_timeout {
        config = config.with_run_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.grace_period {
        config = config.with_grace_period(Duration::from_secs(secs));
    }

    let stages = manifest
        .into_stages(&config)
        .context("invalid stage configuration")?;

    let events = Arc::new(LoggingEventSink::default());
    let driver = engine_driver(&config);
    let orchestrator = Orchestrator::new(Arc::clone(&driver)).with_event_sink(events.clone());
    let cleanup = FailsafeCleanup::new(driver)
        .with_enabled(config.cleanup_enabled())
        .with_module_timeout(config.destroy_timeout())
        .with_event_sink(events);

    let mut options = FailsafeOptions::default()
        .with_interrupt_handling(config.handle_interrupt)
        .with_keep_on_success(config.keep_on_success)
        .with_grace_period(config.grace_period());
    if let Some(timeout) = config.run_timeout() {
        options = options.with_run_timeout(timeout);
    }

    info!(manifest = %manifest.name, stages = stages.len(), "Deploying");
    let tracker = Arc::new(DeploymentTracker::new());
    let outcome = run_with_failsafe(orchestrator, stages, tracker, &cleanup, options)
        .await
        .context("run rejected")?;

    if let (Some(path), Some(report)) = (&args.report, &outcome.report) {
        write_report(path, report)?;
    }

    println!("{}", outcome.summary());
    let cleanup_clean = match &outcome.cleanup {
        Some(report) => {
            if let Some(warning) = report.warning_report() {
                eprintln!("{warning}");
            }
            report.skipped || report.is_clean()
        }
        None => true,
    };

    Ok(if outcome.is_success() && cleanup_clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}

fn write_report(path: &Path, report: &stackrun::orchestrator::RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("cannot serialise run report")?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))
}

async fn plan(args: &ManifestArgs) -> Result<ExitCode> {
    let (manifest, config) = load(args)?;
    let driver = engine_driver(&config);

    let mut failed = false;
    for spec in manifest.module_specs(&config) {
        let planned = match driver.initialize(&spec).await {
            Ok(()) => driver.plan(&spec).await,
            Err(err) => Err(err),
        };
        match planned {
            Ok(diff) => {
                println!("{}: {} change(s)", spec.identifier, diff.resource_changes.len());
                for change in &diff.resource_changes {
                    println!("  {} {:?}", change.address, change.actions);
                }
            }
            Err(err) => {
                error!(stage = %spec.identifier, error = %err, "Plan failed");
                println!("{}: plan failed ({}): {err}", spec.identifier, err.kind());
                failed = true;
            }
        }
    }

    Ok(if failed {
        ExitCode::from(EXIT_FAILED)
    } else {
        ExitCode::SUCCESS
    })
}

async fn teardown(args: &ManifestArgs) -> Result<ExitCode> {
    let (manifest, config) = load(args)?;
    let cleanup = FailsafeCleanup::new(engine_driver(&config))
        .with_module_timeout(config.destroy_timeout())
        .with_event_sink(Arc::new(LoggingEventSink::default()));

    let report = cleanup.teardown(&manifest.module_specs(&config)).await;
    for module in &report.destroyed {
        println!("destroyed {module}");
    }
    if let Some(warning) = report.warning_report() {
        eprintln!("{warning}");
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}

#[cfg(feature = "compliance")]
fn scan(args: &ScanArgs) -> Result<ExitCode> {
    use stackrun::compliance::{default_rules, ComplianceScanner, PolicyRule};

    let rules = match &args.rules {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read rules {}", path.display()))?;
            serde_yaml::from_str::<Vec<PolicyRule>>(&text)
                .with_context(|| format!("invalid rules in {}", path.display()))?
        }
        None => default_rules(),
    };

    let scanner = ComplianceScanner::new(rules).context("invalid rule set")?;
    let report = scanner
        .scan(&args.path)
        .with_context(|| format!("cannot scan {}", args.path.display()))?;

    for v in &report.violations {
        println!(
            "{}:{} [{}] {}: {}\n    {}",
            v.file.display(),
            v.line,
            v.severity,
            v.rule,
            v.message,
            v.excerpt
        );
    }
    println!(
        "{} file(s) scanned, {} violation(s)",
        report.files_scanned,
        report.violations.len()
    );

    if report.has_errors() {
        warn!(violations = report.violations.len(), "Compliance scan failed");
        return Ok(ExitCode::from(EXIT_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_flags() {
        let cli = Cli::try_parse_from([
            "stackrun",
            "deploy",
            "e2e.yaml",
            "--skip-cleanup",
            "--destroy-on-success",
            "--run-timeout",
            "900",
            "--grace-period",
            "120",
        ])
        .unwrap();
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.manifest.manifest, PathBuf::from("e2e.yaml"));
        assert!(args.skip_cleanup);
        assert!(args.destroy_on_success);
        assert_eq!(args.run_timeout, Some(900));
        assert_eq!(args.grace_period, Some(120));
    }

    #[test]
    fn test_keep_conflicts_with_destroy() {
        assert!(Cli::try_parse_from(["stackrun", "deploy", "--keep", "--destroy-on-success"]).is_err());
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::try_parse_from(["stackrun", "--log-format", "json", "teardown"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
