//! ophop - multi-hop operator upgrade orchestrator.
//!
//! Deploys a starting operator version with a workload, walks it through
//! every upgrade hop in order with validation after each step, and tears
//! the system down at the end.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ophop::backend::Installer;
use ophop::backend::k8s::{DeploymentInstaller, DeploymentTarget, build_client, load_manifest};
use ophop::backend::memory::MemoryInstaller;
use ophop::config::{Args, Config, LogFormat, TargetConfig};
use ophop::eligibility::Eligibility;
use ophop::error::OphopError;
use ophop::output::{RunReport, print_plan, print_summary, save_report};
use ophop::{Hop, Orchestrator, Version, plan};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    if let Err(e) = init_tracing(&config.log_level, config.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    debug!("Starting ophop - multi-hop operator upgrade orchestrator");

    match run(&config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    let builder = fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().with_target(true).init(),
        LogFormat::Text => builder
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
    }

    Ok(())
}

/// Phase names printed as headers.
const STEPS: &[&str] = &["Plan Hops", "Check Eligibility", "Run Upgrade", "Summary"];

/// Prints a step header in "Phase [current/total]: name" format.
fn print_step(index: usize) {
    println!();
    println!(
        "{}",
        format!("Phase [{}/{}]: {}", index + 1, STEPS.len(), STEPS[index])
            .cyan()
            .bold()
    );
}

/// Main application logic. Returns whether the run succeeded or was skipped.
async fn run(config: &Config) -> Result<bool> {
    // Step 1: Plan
    print_step(0);

    let hops = plan(config.hops.as_slice())?;
    let initial = config
        .initial
        .as_deref()
        .map(Hop::from_reference)
        .transpose()?;
    let bootstrap = initial.as_ref().or_else(|| hops.first());
    print_plan(&hops, initial.as_ref());

    // Step 2: Eligibility
    print_step(1);

    let min_start = config
        .min_start_version
        .as_deref()
        .map(Version::parse)
        .transpose()?;
    let eligibility = Eligibility::evaluate(
        &hops,
        bootstrap.map(|h| &h.target_version),
        min_start.as_ref(),
        config.allow_empty,
    );

    if !eligibility.eligible {
        let reason = eligibility.reason.unwrap_or_default();
        warn!("Run is not eligible: {}", reason);
        println!("{} Skipping run: {}", "⚠".yellow(), reason);
        return Ok(true);
    }
    println!("  {} Run is eligible", "✓".green());

    if config.needs_confirmation() {
        println!(
            "{}",
            "This will deploy, upgrade and finally delete the operator on the cluster."
                .yellow()
                .bold()
        );
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Proceed with the staged upgrade?")
            .default(false)
            .interact()?;
        if !proceed {
            println!("{}", "Upgrade cancelled.".red());
            return Err(OphopError::Cancelled.into());
        }
    }

    // Step 3: Run
    print_step(2);

    let mut timeouts = config.timeouts;
    let installer: Box<dyn Installer> = if config.dry_run {
        println!("{}", "[DRY RUN] Simulating the run in memory.".yellow());
        timeouts.stabilization = Duration::ZERO;
        Box::new(MemoryInstaller::new())
    } else {
        Box::new(build_installer(&config.target).await?)
    };

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current hop");
            token.cancel();
        }
    });

    let result = Orchestrator::new(installer.as_ref(), timeouts)
        .with_teardown_policy(config.teardown_policy)
        .with_cancellation(cancel)
        .run(&hops, initial.as_ref())
        .await;

    // Step 4: Summary
    print_step(3);
    print_summary(&result);

    if let Some(path) = &config.report {
        let report = RunReport::new(&result, installer.name(), config.teardown_policy);
        save_report(&report, path)?;
        info!("Run report written to {}", path.display());
    }

    Ok(result.is_success())
}

/// Build the Kubernetes installer for the configured target.
async fn build_installer(target: &TargetConfig) -> Result<DeploymentInstaller> {
    let operator_manifest = target
        .operator_manifest
        .as_deref()
        .map(load_manifest)
        .transpose()?;
    let workload_manifest = target
        .workload_manifest
        .as_deref()
        .map(load_manifest)
        .transpose()?;

    let name = target
        .deployment
        .clone()
        .or_else(|| {
            operator_manifest
                .as_ref()
                .and_then(|m| m.metadata.name.clone())
        })
        .ok_or_else(|| {
            OphopError::Config(
                "--deployment is required unless the operator manifest names it".to_string(),
            )
        })?;

    let client = build_client(target.context.as_deref()).await?;
    info!(
        "Targeting Deployment {}/{}",
        target.namespace, name
    );

    Ok(DeploymentInstaller::new(
        client,
        DeploymentTarget {
            namespace: target.namespace.clone(),
            name,
            container: target.container.clone(),
            operator_manifest,
            workload_manifest,
        },
    ))
}
