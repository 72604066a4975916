//! CLI configuration, argument parsing and the YAML run file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::error::OphopError;
use crate::orchestrator::{TeardownPolicy, Timeouts};
use crate::validate::ValidationWindow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

const DEFAULT_NAMESPACE: &str = "default";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Multi-hop operator upgrade orchestrator.
///
/// Deploys a starting version with a workload, walks it through every
/// upgrade hop in order, validates each step, then tears everything down.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ophop")]
#[command(about = "Multi-hop operator upgrade orchestrator")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Upgrade hops as image references, in upgrade order (e.g., quay.io/acme/operator:1.7.0)
    #[arg(value_name = "HOP")]
    pub hops: Vec<String>,

    /// Starting version reference deployed before the first hop (defaults to the first hop)
    #[arg(short, long)]
    pub initial: Option<String>,

    /// YAML run file
    #[arg(short = 'f', long = "config", env = "OPHOP_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, env = "OPHOP_CONTEXT")]
    pub context: Option<String>,

    /// Namespace of the operator Deployment
    #[arg(short, long, env = "OPHOP_NAMESPACE")]
    pub namespace: Option<String>,

    /// Name of the operator Deployment
    #[arg(short, long)]
    pub deployment: Option<String>,

    /// Container carrying the operator image (defaults to the first container)
    #[arg(long)]
    pub container: Option<String>,

    /// Deployment manifest used to create the operator when it does not exist
    #[arg(long)]
    pub operator_manifest: Option<PathBuf>,

    /// Deployment manifest of the workload under test
    #[arg(long)]
    pub workload_manifest: Option<PathBuf>,

    /// Skip the run when the starting version is below this version
    #[arg(long)]
    pub min_start_version: Option<String>,

    /// Run even when no upgrade hops are given
    #[arg(long, default_value = "false")]
    pub allow_empty: bool,

    /// Deploy validation timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub deploy_timeout: Option<u64>,

    /// Deploy validation poll interval in seconds
    #[arg(long, value_name = "SECS")]
    pub deploy_interval: Option<u64>,

    /// Upgrade validation timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub upgrade_timeout: Option<u64>,

    /// Upgrade validation poll interval in seconds
    #[arg(long, value_name = "SECS")]
    pub upgrade_interval: Option<u64>,

    /// Uninstall validation timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub uninstall_timeout: Option<u64>,

    /// Uninstall validation poll interval in seconds
    #[arg(long, value_name = "SECS")]
    pub uninstall_interval: Option<u64>,

    /// Wait between an upgrade and its validation, in seconds
    #[arg(long, value_name = "SECS")]
    pub stabilization: Option<u64>,

    /// Tear down even when the run failed
    #[arg(long, default_value = "false")]
    pub always_teardown: bool,

    /// Simulate the run in memory without touching the cluster
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Skip confirmation prompts
    #[arg(short, long, default_value = "false")]
    pub yes: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "OPHOP_LOG_LEVEL")]
    pub log_level: String,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "OPHOP_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Timeout and interval pair in the run file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowFile {
    pub timeout: Option<u64>,
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsFile {
    pub deploy: Option<WindowFile>,
    pub upgrade: Option<WindowFile>,
    pub uninstall: Option<WindowFile>,
    pub stabilization: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetFile {
    pub context: Option<String>,
    pub namespace: Option<String>,
    pub deployment: Option<String>,
    pub container: Option<String>,
    pub operator_manifest: Option<PathBuf>,
    pub workload_manifest: Option<PathBuf>,
}

/// YAML run file. Every field is optional and CLI values take precedence.
///
/// ```yaml
/// initial: quay.io/acme/operator:1.5.0
/// hops:
///   - quay.io/acme/operator:1.6.0
///   - quay.io/acme/operator:1.7.0
/// target:
///   namespace: operators
///   deployment: acme-operator
/// timeouts:
///   upgrade: { timeout: 1400, interval: 10 }
///   stabilization: 15
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunFile {
    pub hops: Vec<String>,
    pub initial: Option<String>,
    pub min_start_version: Option<String>,
    pub allow_empty: Option<bool>,
    pub always_teardown: Option<bool>,
    pub target: TargetFile,
    pub timeouts: TimeoutsFile,
}

impl RunFile {
    /// Load a run file from disk.
    pub fn load(path: &Path) -> Result<Self, OphopError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OphopError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
            .map_err(|e| OphopError::Config(format!("{}: {e}", path.display())))
    }

    fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}

/// Where the operator runs on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub context: Option<String>,
    pub namespace: String,
    pub deployment: Option<String>,
    pub container: Option<String>,
    pub operator_manifest: Option<PathBuf>,
    pub workload_manifest: Option<PathBuf>,
}

/// Application configuration derived from CLI args and the run file.
#[derive(Debug, Clone)]
pub struct Config {
    pub hops: Vec<String>,
    pub initial: Option<String>,
    pub min_start_version: Option<String>,
    pub allow_empty: bool,
    pub target: TargetConfig,
    pub timeouts: Timeouts,
    pub teardown_policy: TeardownPolicy,
    pub dry_run: bool,
    pub yes: bool,
    pub report: Option<PathBuf>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Create config from CLI arguments, reading the run file if one is given.
    pub fn from_args(args: Args) -> Result<Self, OphopError> {
        let file = match &args.config_file {
            Some(path) => RunFile::load(path)?,
            None => RunFile::default(),
        };
        Self::merge(args, file)
    }

    /// Merge CLI arguments over run file values.
    pub fn merge(args: Args, file: RunFile) -> Result<Self, OphopError> {
        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            deploy: window(
                "deploy",
                defaults.deploy,
                file.timeouts.deploy.as_ref(),
                args.deploy_timeout,
                args.deploy_interval,
            )?,
            upgrade: window(
                "upgrade",
                defaults.upgrade,
                file.timeouts.upgrade.as_ref(),
                args.upgrade_timeout,
                args.upgrade_interval,
            )?,
            uninstall: window(
                "uninstall",
                defaults.uninstall,
                file.timeouts.uninstall.as_ref(),
                args.uninstall_timeout,
                args.uninstall_interval,
            )?,
            stabilization: args
                .stabilization
                .or(file.timeouts.stabilization)
                .map_or(defaults.stabilization, Duration::from_secs),
        };

        let always_teardown = args.always_teardown || file.always_teardown.unwrap_or(false);
        let teardown_policy = if always_teardown {
            TeardownPolicy::Always
        } else {
            TeardownPolicy::OnSuccess
        };

        let target = TargetConfig {
            context: args.context.or(file.target.context),
            namespace: args
                .namespace
                .or(file.target.namespace)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            deployment: args.deployment.or(file.target.deployment),
            container: args.container.or(file.target.container),
            operator_manifest: args.operator_manifest.or(file.target.operator_manifest),
            workload_manifest: args.workload_manifest.or(file.target.workload_manifest),
        };

        Ok(Self {
            hops: if args.hops.is_empty() {
                file.hops
            } else {
                args.hops
            },
            initial: args.initial.or(file.initial),
            min_start_version: args.min_start_version.or(file.min_start_version),
            allow_empty: args.allow_empty || file.allow_empty.unwrap_or(false),
            target,
            timeouts,
            teardown_policy,
            dry_run: args.dry_run,
            yes: args.yes,
            report: args.report,
            log_level: args.log_level,
            log_format: args.log_format,
        })
    }

    /// Check if the user must confirm before the run starts.
    pub const fn needs_confirmation(&self) -> bool {
        !self.yes && !self.dry_run
    }
}

fn window(
    name: &str,
    default: ValidationWindow,
    file: Option<&WindowFile>,
    timeout: Option<u64>,
    interval: Option<u64>,
) -> Result<ValidationWindow, OphopError> {
    let timeout = timeout
        .or_else(|| file.and_then(|w| w.timeout))
        .map_or(default.timeout, Duration::from_secs);
    let interval = interval
        .or_else(|| file.and_then(|w| w.interval))
        .map_or(default.interval, Duration::from_secs);

    if interval.is_zero() {
        return Err(OphopError::Config(format!(
            "{name} interval must be greater than zero"
        )));
    }

    Ok(ValidationWindow { timeout, interval })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(hops: &[&str]) -> Args {
        Args {
            hops: hops.iter().map(|s| s.to_string()).collect(),
            log_level: "info".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::merge(args(&["op:1.7.0"]), RunFile::default()).unwrap();
        assert_eq!(config.hops, vec!["op:1.7.0"]);
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.teardown_policy, TeardownPolicy::OnSuccess);
        assert_eq!(config.target.namespace, "default");
        assert!(config.needs_confirmation());
    }

    #[test]
    fn test_cli_overrides_run_file() {
        let file = RunFile::parse(
            r"
hops: [op:1.6.0, op:1.7.0]
initial: op:1.5.0
target:
  namespace: operators
  deployment: acme-operator
timeouts:
  upgrade: { timeout: 600, interval: 20 }
  stabilization: 30
",
        )
        .unwrap();

        let mut cli = args(&["op:2.0.0"]);
        cli.namespace = Some("staging".to_string());
        cli.upgrade_interval = Some(5);

        let config = Config::merge(cli, file).unwrap();
        assert_eq!(config.hops, vec!["op:2.0.0"]);
        assert_eq!(config.initial.as_deref(), Some("op:1.5.0"));
        assert_eq!(config.target.namespace, "staging");
        assert_eq!(config.target.deployment.as_deref(), Some("acme-operator"));
        assert_eq!(
            config.timeouts.upgrade,
            ValidationWindow::from_secs(600, 5)
        );
        assert_eq!(config.timeouts.stabilization, Duration::from_secs(30));
        assert_eq!(config.timeouts.deploy, ValidationWindow::from_secs(900, 10));
    }

    #[test]
    fn test_hops_from_run_file_when_cli_has_none() {
        let file = RunFile {
            hops: vec!["op:1.6.0".to_string()],
            ..Default::default()
        };
        let config = Config::merge(args(&[]), file).unwrap();
        assert_eq!(config.hops, vec!["op:1.6.0"]);
    }

    #[test]
    fn test_always_teardown() {
        let mut cli = args(&[]);
        cli.always_teardown = true;
        let config = Config::merge(cli, RunFile::default()).unwrap();
        assert_eq!(config.teardown_policy, TeardownPolicy::Always);

        let file = RunFile {
            always_teardown: Some(true),
            ..Default::default()
        };
        let config = Config::merge(args(&[]), file).unwrap();
        assert_eq!(config.teardown_policy, TeardownPolicy::Always);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cli = args(&[]);
        cli.deploy_interval = Some(0);
        let err = Config::merge(cli, RunFile::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: deploy interval must be greater than zero"
        );
    }

    #[test]
    fn test_dry_run_skips_confirmation() {
        let mut cli = args(&[]);
        cli.dry_run = true;
        let config = Config::merge(cli, RunFile::default()).unwrap();
        assert!(!config.needs_confirmation());
    }

    #[test]
    fn test_load_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(
            &path,
            "hops:\n  - quay.io/acme/operator:1.6.0\nmin_start_version: '1.5'\nallow_empty: true\n",
        )
        .unwrap();

        let mut cli = args(&[]);
        cli.config_file = Some(path);
        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.hops, vec!["quay.io/acme/operator:1.6.0"]);
        assert_eq!(config.min_start_version.as_deref(), Some("1.5"));
        assert!(config.allow_empty);
    }

    #[test]
    fn test_load_run_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, "hopz: []\n").unwrap();
        assert!(matches!(RunFile::load(&path), Err(OphopError::Config(_))));

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(RunFile::load(&missing), Err(OphopError::Config(_))));
    }

    #[test]
    fn test_empty_run_file() {
        assert_eq!(RunFile::parse("  \n").unwrap(), RunFile::default());
    }
}
