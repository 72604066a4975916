//! Installer collaborators driven by the orchestrator.
//!
//! The orchestrator never mutates the target system directly. Every change
//! goes through an [`Installer`], and every check reads a [`SystemState`]
//! snapshot from it.

pub mod k8s;
pub mod memory;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::version::Version;

/// Install, upgrade and remove the orchestrated software.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install the software at `reference` and deploy the workload under test.
    async fn deploy(&self, reference: &str) -> Result<()>;

    /// Upgrade the already installed software to `reference`.
    async fn upgrade(&self, reference: &str) -> Result<()>;

    /// Remove the workload and the software.
    async fn teardown(&self) -> Result<()>;

    /// Read the installed version.
    async fn current_version(&self) -> Result<Version>;

    /// Take one snapshot of the system state.
    async fn observe(&self) -> Result<SystemState>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

/// Snapshot of the externally owned system state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemState {
    /// Installed version, `None` when the software is absent.
    pub installed_version: Option<Version>,
    /// Whether the orchestrated software is rolled out and ready.
    pub ready: bool,
    /// Workload readiness, `None` when no workload is present.
    pub workload_ready: Option<bool>,
    /// Free-form status detail from the backend.
    pub detail: Option<String>,
}

impl SystemState {
    /// Nothing installed.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Installed and healthy at `version`.
    pub fn healthy(version: Version, workload_ready: Option<bool>) -> Self {
        Self {
            installed_version: Some(version),
            ready: true,
            workload_ready,
            detail: None,
        }
    }
}

/// What the validator waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedState {
    /// Installed at exactly this version, software and workload healthy.
    Installed { version: Version },
    /// Software and workload removed.
    Absent,
}

impl ExpectedState {
    /// Check a snapshot against this expectation.
    ///
    /// Returns a description of the first mismatch found.
    pub fn check(&self, state: &SystemState) -> std::result::Result<(), String> {
        match self {
            Self::Installed { version } => {
                let installed = state
                    .installed_version
                    .as_ref()
                    .ok_or_else(|| "software is not installed".to_string())?;
                if installed != version {
                    return Err(format!(
                        "installed version is {installed}, expected {version}"
                    ));
                }
                if !state.ready {
                    return Err(match &state.detail {
                        Some(detail) => format!("software at {installed} is not ready: {detail}"),
                        None => format!("software at {installed} is not ready"),
                    });
                }
                if state.workload_ready == Some(false) {
                    return Err("workload is not ready".to_string());
                }
                Ok(())
            }
            Self::Absent => {
                if let Some(installed) = &state.installed_version {
                    return Err(format!("software is still installed at {installed}"));
                }
                if state.workload_ready.is_some() {
                    return Err("workload is still present".to_string());
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ExpectedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { version } => write!(f, "version {version} ready"),
            Self::Absent => f.write_str("uninstall"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_expected_installed_matches_healthy() {
        let expected = ExpectedState::Installed { version: v("1.7.0") };
        assert!(expected.check(&SystemState::healthy(v("1.7"), Some(true))).is_ok());
        assert!(expected.check(&SystemState::healthy(v("1.7.0"), None)).is_ok());
    }

    #[test]
    fn test_expected_installed_reports_mismatch() {
        let expected = ExpectedState::Installed { version: v("1.7.0") };

        let err = expected.check(&SystemState::healthy(v("1.6.0"), None)).unwrap_err();
        assert_eq!(err, "installed version is 1.6.0, expected 1.7.0");

        assert_eq!(
            expected.check(&SystemState::absent()).unwrap_err(),
            "software is not installed"
        );

        let rolling = SystemState {
            ready: false,
            detail: Some("1/3 replicas updated".to_string()),
            ..SystemState::healthy(v("1.7.0"), None)
        };
        assert_eq!(
            expected.check(&rolling).unwrap_err(),
            "software at 1.7.0 is not ready: 1/3 replicas updated"
        );

        let workload_down = SystemState::healthy(v("1.7.0"), Some(false));
        assert_eq!(
            expected.check(&workload_down).unwrap_err(),
            "workload is not ready"
        );
    }

    #[test]
    fn test_expected_absent() {
        assert!(ExpectedState::Absent.check(&SystemState::absent()).is_ok());
        assert!(
            ExpectedState::Absent
                .check(&SystemState::healthy(v("1.0.0"), None))
                .is_err()
        );
        let workload_left = SystemState {
            workload_ready: Some(true),
            ..SystemState::absent()
        };
        assert_eq!(
            ExpectedState::Absent.check(&workload_left).unwrap_err(),
            "workload is still present"
        );
    }

    #[test]
    fn test_expected_display() {
        let expected = ExpectedState::Installed { version: v("3.0") };
        assert_eq!(expected.to_string(), "version 3.0 ready");
        assert_eq!(ExpectedState::Absent.to_string(), "uninstall");
    }
}
