//! JSON run report.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::VERSION;
use crate::orchestrator::{RunOutcome, RunPhase, RunResult, TeardownPolicy, TeardownStatus};
use crate::stage::StageReport;

/// Failure details in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// `bootstrap`, `hop` or `teardown`.
    pub stage: &'static str,
    pub hop_index: Option<usize>,
    pub target: Option<String>,
    pub kind: &'static str,
    pub message: String,
}

/// Serializable summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub ophop_version: &'static str,
    pub installer: &'a str,
    pub success: bool,
    pub phase: RunPhase,
    pub teardown_policy: TeardownPolicy,
    pub final_version: Option<String>,
    pub failure: Option<FailureReport>,
    pub teardown: &'a TeardownStatus,
    pub stages: &'a [StageReport],
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'a> RunReport<'a> {
    pub fn new(result: &'a RunResult, installer: &'a str, policy: TeardownPolicy) -> Self {
        let failure = match &result.outcome {
            RunOutcome::Success => None,
            RunOutcome::FailedAtBootstrap { reference, error } => Some(FailureReport {
                stage: "bootstrap",
                hop_index: None,
                target: Some(reference.clone()),
                kind: error.kind(),
                message: error.to_string(),
            }),
            RunOutcome::FailedAtHop {
                index,
                target,
                error,
            } => Some(FailureReport {
                stage: "hop",
                hop_index: Some(*index),
                target: Some(target.to_string()),
                kind: error.kind(),
                message: error.to_string(),
            }),
            RunOutcome::FailedAtTeardown { error } => Some(FailureReport {
                stage: "teardown",
                hop_index: None,
                target: None,
                kind: error.kind(),
                message: error.to_string(),
            }),
        };

        Self {
            ophop_version: VERSION,
            installer,
            success: result.is_success(),
            phase: result.phase,
            teardown_policy: policy,
            final_version: result.final_version.as_ref().map(ToString::to_string),
            failure,
            teardown: &result.teardown,
            stages: &result.stages,
            started_at: result.started_at,
            completed_at: result.completed_at,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }
}

/// Write the report as pretty JSON to `path`.
pub fn save_report(report: &RunReport<'_>, path: &Path) -> Result<()> {
    let json = report.to_json()?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}
