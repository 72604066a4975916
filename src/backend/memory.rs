//! In-process simulated installer.
//!
//! Backs `--dry-run` and the test suite. Keeps the installed version and
//! readiness in memory and journals every call it receives.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tracing::debug;

use super::{Installer, SystemState};
use crate::plan::version_tag;
use crate::version::Version;

/// One call received by the simulated installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Deploy(String),
    Upgrade(String),
    Teardown,
    CurrentVersion,
    Observe,
}

#[derive(Debug, Default)]
struct MemoryState {
    installed: Option<Version>,
    workload: bool,
    unready_polls: u32,
    journal: Vec<Call>,
}

/// Simulated system with injectable failures.
#[derive(Debug, Default)]
pub struct MemoryInstaller {
    state: Mutex<MemoryState>,
    failing: HashSet<String>,
    stuck: HashSet<String>,
    fail_teardown: bool,
    leave_workload: bool,
    settle_polls: u32,
}

impl MemoryInstaller {
    /// Empty system, nothing installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// System with the software already installed at `version`.
    pub fn with_installed(version: Version) -> Self {
        let installer = Self::default();
        if let Ok(mut state) = installer.state.lock() {
            state.installed = Some(version);
        }
        installer
    }

    /// Make deploys and upgrades to `reference` fail.
    #[must_use]
    pub fn fail_on(mut self, reference: &str) -> Self {
        self.failing.insert(reference.to_string());
        self
    }

    /// Accept upgrades to `reference` without ever changing the version.
    #[must_use]
    pub fn stuck_on(mut self, reference: &str) -> Self {
        self.stuck.insert(reference.to_string());
        self
    }

    /// Make teardown fail.
    #[must_use]
    pub const fn fail_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    /// Let teardown succeed but keep the workload running.
    #[must_use]
    pub const fn leave_workload_on_teardown(mut self) -> Self {
        self.leave_workload = true;
        self
    }

    /// Report not-ready for `polls` observations after every mutation.
    #[must_use]
    pub const fn settle_after(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    /// All calls received so far.
    pub fn journal(&self) -> Vec<Call> {
        self.state
            .lock()
            .map(|s| s.journal.clone())
            .unwrap_or_default()
    }

    /// References passed to `upgrade`, in order.
    pub fn upgrades(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upgrade(reference) => Some(reference),
                _ => None,
            })
            .collect()
    }

    /// Number of `observe` calls so far.
    pub fn observe_count(&self) -> usize {
        self.journal()
            .iter()
            .filter(|c| matches!(c, Call::Observe))
            .count()
    }

    /// Currently installed version, if any.
    pub fn installed(&self) -> Option<Version> {
        self.state.lock().ok().and_then(|s| s.installed.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory installer state is poisoned"))
    }

    fn apply(&self, state: &mut MemoryState, reference: &str) -> Result<()> {
        if self.failing.contains(reference) {
            bail!("simulated failure for {reference}");
        }
        let version = Version::parse(version_tag(reference)?)?;
        if !self.stuck.contains(reference) {
            state.installed = Some(version);
        }
        state.unready_polls = self.settle_polls;
        Ok(())
    }
}

#[async_trait]
impl Installer for MemoryInstaller {
    async fn deploy(&self, reference: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.journal.push(Call::Deploy(reference.to_string()));
        self.apply(&mut state, reference)?;
        state.workload = true;
        debug!("Simulated deploy of {}", reference);
        Ok(())
    }

    async fn upgrade(&self, reference: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.journal.push(Call::Upgrade(reference.to_string()));
        if state.installed.is_none() {
            bail!("cannot upgrade to {reference}: nothing is installed");
        }
        self.apply(&mut state, reference)?;
        debug!("Simulated upgrade to {}", reference);
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.journal.push(Call::Teardown);
        if self.fail_teardown {
            bail!("simulated teardown failure");
        }
        state.installed = None;
        state.workload &= self.leave_workload;
        state.unready_polls = 0;
        Ok(())
    }

    async fn current_version(&self) -> Result<Version> {
        let mut state = self.lock()?;
        state.journal.push(Call::CurrentVersion);
        state
            .installed
            .clone()
            .ok_or_else(|| anyhow!("software is not installed"))
    }

    async fn observe(&self) -> Result<SystemState> {
        let mut state = self.lock()?;
        state.journal.push(Call::Observe);

        let Some(version) = state.installed.clone() else {
            return Ok(SystemState {
                workload_ready: state.workload.then_some(true),
                ..SystemState::absent()
            });
        };

        let workload_ready = state.workload.then_some(true);
        if state.unready_polls > 0 {
            state.unready_polls -= 1;
            return Ok(SystemState {
                ready: false,
                detail: Some("rollout in progress".to_string()),
                ..SystemState::healthy(version, workload_ready)
            });
        }

        Ok(SystemState::healthy(version, workload_ready))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_deploy_installs_version_and_workload() {
        let installer = MemoryInstaller::new();
        installer.deploy("quay.io/acme/operator:1.5.0").await.unwrap();

        assert_eq!(installer.current_version().await.unwrap(), v("1.5.0"));
        let state = installer.observe().await.unwrap();
        assert_eq!(state, SystemState::healthy(v("1.5.0"), Some(true)));
    }

    #[tokio::test]
    async fn test_upgrade_requires_installation() {
        let installer = MemoryInstaller::new();
        assert!(installer.upgrade("op:1.7.0").await.is_err());
    }

    #[tokio::test]
    async fn test_failing_and_stuck_references() {
        let installer = MemoryInstaller::with_installed(v("1.5.0"))
            .fail_on("op:1.6.0")
            .stuck_on("op:1.7.0");

        assert!(installer.upgrade("op:1.6.0").await.is_err());
        installer.upgrade("op:1.7.0").await.unwrap();
        assert_eq!(installer.installed(), Some(v("1.5.0")));
        assert_eq!(installer.upgrades(), vec!["op:1.6.0", "op:1.7.0"]);
    }

    #[tokio::test]
    async fn test_settle_after_reports_unready() {
        let installer = MemoryInstaller::with_installed(v("1.5.0")).settle_after(2);
        installer.upgrade("op:1.6.0").await.unwrap();

        assert!(!installer.observe().await.unwrap().ready);
        assert!(!installer.observe().await.unwrap().ready);
        assert!(installer.observe().await.unwrap().ready);
        assert_eq!(installer.observe_count(), 3);
    }

    #[tokio::test]
    async fn test_teardown() {
        let installer = MemoryInstaller::new();
        installer.deploy("op:2.0.0").await.unwrap();
        installer.teardown().await.unwrap();
        assert_eq!(installer.observe().await.unwrap(), SystemState::absent());
        assert!(installer.current_version().await.is_err());

        let leaky = MemoryInstaller::new().leave_workload_on_teardown();
        leaky.deploy("op:2.0.0").await.unwrap();
        leaky.teardown().await.unwrap();
        let state = leaky.observe().await.unwrap();
        assert!(state.installed_version.is_none());
        assert_eq!(state.workload_ready, Some(true));

        let failing = MemoryInstaller::new().fail_teardown();
        assert!(failing.teardown().await.is_err());
        assert_eq!(failing.journal(), vec![Call::Teardown]);
    }
}
