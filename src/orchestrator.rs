//! Multi-hop upgrade orchestration.
//!
//! Runs the hop sequence strictly in order against a single installer:
//! bootstrap with the starting version, then one stage per hop, then
//! teardown. The first failure halts the remaining hops.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::{ExpectedState, Installer};
use crate::error::OphopError;
use crate::plan::{Hop, HopSequence};
use crate::stage::{StageExecutor, StageReport};
use crate::validate::{ValidationWindow, Validator};
use crate::version::Version;

/// Delay between an upgrade action and its validation.
pub const STABILIZATION_INTERVAL: Duration = Duration::from_secs(15);

/// Validation windows and stabilization delay for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub deploy: ValidationWindow,
    pub upgrade: ValidationWindow,
    pub uninstall: ValidationWindow,
    pub stabilization: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            deploy: ValidationWindow::from_secs(900, 10),
            upgrade: ValidationWindow::from_secs(1400, 10),
            uninstall: ValidationWindow::from_secs(900, 10),
            stabilization: STABILIZATION_INTERVAL,
        }
    }
}

/// When to tear the system down at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TeardownPolicy {
    /// Only after every hop succeeded. A failed run leaves the system as-is
    /// for inspection.
    #[default]
    OnSuccess,
    /// Also after a failure. The teardown status is reported separately and
    /// never replaces the original failure.
    Always,
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    NotStarted,
    Bootstrapped,
    Stage(usize),
    TearingDown,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Bootstrapped => write!(f, "Bootstrapped"),
            Self::Stage(i) => write!(f, "Stage({i})"),
            Self::TearingDown => write!(f, "TearingDown"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// How the run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Success,
    FailedAtBootstrap {
        reference: String,
        error: OphopError,
    },
    FailedAtHop {
        index: usize,
        target: Version,
        error: OphopError,
    },
    FailedAtTeardown {
        error: OphopError,
    },
}

/// Teardown result, reported independently of the run outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TeardownStatus {
    NotAttempted,
    Completed,
    Failed(String),
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub phase: RunPhase,
    pub stages: Vec<StageReport>,
    pub final_version: Option<Version>,
    pub teardown: TeardownStatus,
    /// Every phase entered, in order, starting with `NotStarted`.
    pub history: Vec<RunPhase>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunResult {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Success,
            phase: RunPhase::NotStarted,
            stages: Vec::new(),
            final_version: None,
            teardown: TeardownStatus::NotAttempted,
            history: vec![RunPhase::NotStarted],
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Success)
    }

    /// Index of the hop that failed, if any.
    pub fn failed_hop(&self) -> Option<usize> {
        match self.outcome {
            RunOutcome::FailedAtHop { index, .. } => Some(index),
            _ => None,
        }
    }

    /// The error that ended the run, if any.
    pub fn error(&self) -> Option<&OphopError> {
        match &self.outcome {
            RunOutcome::Success => None,
            RunOutcome::FailedAtBootstrap { error, .. }
            | RunOutcome::FailedAtHop { error, .. }
            | RunOutcome::FailedAtTeardown { error } => Some(error),
        }
    }

    fn transition(&mut self, next: RunPhase) {
        info!("Run phase: {} -> {}", self.phase, next);
        self.phase = next;
        self.history.push(next);
    }

    fn fail(&mut self, outcome: RunOutcome) {
        match &outcome {
            RunOutcome::FailedAtHop {
                index,
                target,
                error,
            } => error!("Hop {} to [{}] failed: {}", index, target, error),
            RunOutcome::FailedAtBootstrap { reference, error } => {
                error!("Bootstrap of {} failed: {}", reference, error);
            }
            RunOutcome::FailedAtTeardown { error } => error!("Teardown failed: {}", error),
            RunOutcome::Success => {}
        }
        self.outcome = outcome;
        self.transition(RunPhase::Failed);
    }
}

/// Drives an installer through a hop sequence.
pub struct Orchestrator<'a, I: Installer + ?Sized> {
    installer: &'a I,
    timeouts: Timeouts,
    teardown_policy: TeardownPolicy,
    cancel: CancellationToken,
}

impl<'a, I: Installer + ?Sized> Orchestrator<'a, I> {
    pub fn new(installer: &'a I, timeouts: Timeouts) -> Self {
        Self {
            installer,
            timeouts,
            teardown_policy: TeardownPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    /// Honor `token` between hops. A hop in flight always runs to completion.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the whole sequence.
    ///
    /// The starting version is `initial` when given, otherwise the first
    /// hop. It is deployed and validated before stage 0, whose report counts
    /// the bootstrap polls. With no hops and no `initial` the run only tears
    /// down.
    pub async fn run(&self, hops: &HopSequence, initial: Option<&Hop>) -> RunResult {
        let mut result = RunResult::new();
        let executor = StageExecutor::new(self.installer, &self.timeouts);
        let bootstrap = initial.or_else(|| hops.first());

        info!(
            "Starting staged upgrade via {} ({} hops, teardown: {:?})",
            self.installer.name(),
            hops.len(),
            self.teardown_policy
        );

        if let Some(first) = hops.first()
            && self.cancel.is_cancelled()
        {
            result.fail(RunOutcome::FailedAtHop {
                index: 0,
                target: first.target_version.clone(),
                error: OphopError::Cancelled,
            });
            return self.finish(result).await;
        }

        let mut bootstrap_polls = None;
        match bootstrap {
            Some(hop) => match executor.bootstrap(hop).await {
                Ok(polls) => {
                    bootstrap_polls = Some(polls);
                    result.final_version = Some(hop.target_version.clone());
                    result.transition(RunPhase::Bootstrapped);
                }
                Err(error) => {
                    result.fail(RunOutcome::FailedAtBootstrap {
                        reference: hop.reference.clone(),
                        error,
                    });
                    return self.finish(result).await;
                }
            },
            None => warn!("No hops and no starting version, skipping bootstrap"),
        }

        for (index, hop) in hops.iter().enumerate() {
            if self.cancel.is_cancelled() {
                result.fail(RunOutcome::FailedAtHop {
                    index,
                    target: hop.target_version.clone(),
                    error: OphopError::Cancelled,
                });
                break;
            }

            result.transition(RunPhase::Stage(index));

            match executor.execute(index, hop, bootstrap_polls.take()).await {
                Ok(report) => {
                    result.final_version = Some(report.version_after.clone());
                    result.stages.push(report);
                }
                Err(error) => {
                    result.fail(RunOutcome::FailedAtHop {
                        index,
                        target: hop.target_version.clone(),
                        error,
                    });
                    break;
                }
            }
        }

        self.finish(result).await
    }

    async fn finish(&self, mut result: RunResult) -> RunResult {
        let failed = !result.is_success();

        if failed && self.teardown_policy == TeardownPolicy::OnSuccess {
            warn!("Run failed, leaving the system in place for inspection");
            result.completed_at = Some(Utc::now());
            return result;
        }

        if failed {
            warn!("Run failed, tearing down anyway (policy: Always)");
        } else {
            result.transition(RunPhase::TearingDown);
        }

        match self.teardown().await {
            Ok(()) => {
                info!("Teardown completed");
                result.teardown = TeardownStatus::Completed;
                if !failed {
                    result.transition(RunPhase::Done);
                }
            }
            Err(error) => {
                result.teardown = TeardownStatus::Failed(error.to_string());
                if failed {
                    warn!("Teardown after failed run also failed: {}", error);
                } else {
                    result.fail(RunOutcome::FailedAtTeardown { error });
                }
            }
        }

        result.completed_at = Some(Utc::now());
        result
    }

    async fn teardown(&self) -> Result<(), OphopError> {
        info!("Tearing down workload and software via {}", self.installer.name());

        self.installer
            .teardown()
            .await
            .map_err(|e| OphopError::TeardownFailed(format!("{e:#}")))?;

        Validator::new(self.installer)
            .validate(&ExpectedState::Absent, self.timeouts.uninstall)
            .await
            .into_result()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.deploy, ValidationWindow::from_secs(900, 10));
        assert_eq!(timeouts.upgrade, ValidationWindow::from_secs(1400, 10));
        assert_eq!(timeouts.uninstall, ValidationWindow::from_secs(900, 10));
        assert_eq!(timeouts.stabilization, Duration::from_secs(15));
    }

    #[test]
    fn test_teardown_policy_default() {
        assert_eq!(TeardownPolicy::default(), TeardownPolicy::OnSuccess);
    }

    #[test]
    fn test_run_phase_display() {
        assert_eq!(RunPhase::Stage(2).to_string(), "Stage(2)");
        assert_eq!(RunPhase::TearingDown.to_string(), "TearingDown");
    }

    #[test]
    fn test_run_result_accessors() {
        let mut result = RunResult::new();
        assert!(result.is_success());
        assert!(result.error().is_none());

        result.fail(RunOutcome::FailedAtHop {
            index: 1,
            target: Version::parse("2.1.0").unwrap(),
            error: OphopError::Cancelled,
        });
        assert!(!result.is_success());
        assert_eq!(result.failed_hop(), Some(1));
        assert_eq!(result.phase, RunPhase::Failed);
        assert_eq!(result.error().map(OphopError::kind), Some("Cancelled"));
    }
}
