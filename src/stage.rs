//! Single-hop execution: bootstrap, skip-or-upgrade, stabilize, validate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tracing::info;

use crate::backend::{ExpectedState, Installer};
use crate::error::OphopError;
use crate::orchestrator::Timeouts;
use crate::plan::Hop;
use crate::validate::Validator;
use crate::version::Version;

/// What a stage did to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageAction {
    /// Target was not newer than the installed version.
    Skipped,
    /// Upgrade applied and validated.
    Upgraded,
}

impl std::fmt::Display for StageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "Skipped"),
            Self::Upgraded => write!(f, "Upgraded"),
        }
    }
}

/// Record of one completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub index: usize,
    pub target: Version,
    pub reference: String,
    pub bootstrapped: bool,
    pub action: StageAction,
    pub version_before: Version,
    pub version_after: Version,
    /// Validation polls issued by this stage, bootstrap included.
    pub polls: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StageReport {
    pub fn duration_secs(&self) -> i64 {
        (self.completed_at - self.started_at).num_seconds()
    }
}

/// Executes one hop against an installer.
pub struct StageExecutor<'a, I: Installer + ?Sized> {
    installer: &'a I,
    timeouts: &'a Timeouts,
}

impl<'a, I: Installer + ?Sized> StageExecutor<'a, I> {
    pub const fn new(installer: &'a I, timeouts: &'a Timeouts) -> Self {
        Self {
            installer,
            timeouts,
        }
    }

    /// Deploy the starting version plus workload and wait until it is ready.
    ///
    /// Returns the number of validation polls used.
    pub async fn bootstrap(&self, hop: &Hop) -> Result<u32, OphopError> {
        info!("Deploying starting version [{}]", hop.target_version);

        self.installer
            .deploy(&hop.reference)
            .await
            .map_err(|e| OphopError::deploy(&hop.reference, &e))?;

        let outcome = Validator::new(self.installer)
            .validate(
                &ExpectedState::Installed {
                    version: hop.target_version.clone(),
                },
                self.timeouts.deploy,
            )
            .await
            .into_result()?;

        info!(
            "Starting version [{}] deployed and validated",
            hop.target_version
        );
        Ok(outcome.attempts)
    }

    /// Run one hop.
    ///
    /// `bootstrap_polls` is set for the first hop when the starting version
    /// was just deployed, and is counted into the stage's polls. Upgrade
    /// failures are returned as-is, without retry.
    pub async fn execute(
        &self,
        index: usize,
        hop: &Hop,
        bootstrap_polls: Option<u32>,
    ) -> Result<StageReport, OphopError> {
        let started_at = Utc::now();
        let mut polls = bootstrap_polls.unwrap_or(0);

        let current = self
            .installer
            .current_version()
            .await
            .map_err(|e| OphopError::VersionUnavailable(format!("{e:#}")))?;
        info!("Hop {}: current version [{}]", index, current);

        let report = |action, version_after: Version, polls| StageReport {
            index,
            target: hop.target_version.clone(),
            reference: hop.reference.clone(),
            bootstrapped: bootstrap_polls.is_some(),
            action,
            version_before: current.clone(),
            version_after,
            polls,
            started_at,
            completed_at: Utc::now(),
        };

        if hop.target_version <= current {
            info!(
                "Skipping upgrade from [{}] to [{}], shouldn't upgrade to same or lower version",
                current, hop.target_version
            );
            return Ok(report(StageAction::Skipped, current.clone(), polls));
        }

        info!("Upgrading from [{}] to [{}]", current, hop.target_version);
        self.installer
            .upgrade(&hop.reference)
            .await
            .map_err(|e| OphopError::upgrade(&hop.reference, &e))?;

        info!(
            "Upgraded from [{}] to [{}], waiting {}s to stabilize",
            current,
            hop.target_version,
            self.timeouts.stabilization.as_secs()
        );
        sleep(self.timeouts.stabilization).await;

        let outcome = Validator::new(self.installer)
            .validate(
                &ExpectedState::Installed {
                    version: hop.target_version.clone(),
                },
                self.timeouts.upgrade,
            )
            .await
            .into_result()?;
        polls += outcome.attempts;

        Ok(report(
            StageAction::Upgraded,
            hop.target_version.clone(),
            polls,
        ))
    }
}
