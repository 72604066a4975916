//! Custom error types for ophop.

use thiserror::Error;

/// Errors that can occur while planning or running a staged upgrade.
#[derive(Error, Debug)]
pub enum OphopError {
    #[error("Invalid version format: {0}")]
    InvalidVersionFormat(String),

    #[error("Deploy of {reference} failed: {details}")]
    DeployActionFailed { reference: String, details: String },

    #[error("Upgrade to {reference} failed: {details}")]
    UpgradeActionFailed { reference: String, details: String },

    #[error("Teardown failed: {0}")]
    TeardownFailed(String),

    #[error(
        "Timeout waiting for {expected} after {elapsed_secs}s ({attempts} polls): {last_error}"
    )]
    ValidationTimeout {
        expected: String,
        elapsed_secs: u64,
        attempts: u32,
        last_error: String,
    },

    #[error("Unable to read installed version: {0}")]
    VersionUnavailable(String),

    #[error("Run cancelled before the next hop")]
    Cancelled,

    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OphopError {
    /// Short, stable name of the error kind used in run reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidVersionFormat(_) => "InvalidVersionFormat",
            Self::DeployActionFailed { .. } => "DeployActionFailed",
            Self::UpgradeActionFailed { .. } => "UpgradeActionFailed",
            Self::TeardownFailed(_) => "TeardownFailed",
            Self::ValidationTimeout { .. } => "ValidationTimeout",
            Self::VersionUnavailable(_) => "VersionUnavailable",
            Self::Cancelled => "Cancelled",
            Self::KubernetesApi(_) => "KubernetesApi",
            Self::Kubeconfig(_) => "Kubeconfig",
            Self::Manifest(_) => "Manifest",
            Self::Config(_) => "Config",
        }
    }

    /// Wrap a collaborator failure as a deploy error.
    pub fn deploy(reference: &str, err: &anyhow::Error) -> Self {
        Self::DeployActionFailed {
            reference: reference.to_string(),
            details: format!("{err:#}"),
        }
    }

    /// Wrap a collaborator failure as an upgrade error.
    pub fn upgrade(reference: &str, err: &anyhow::Error) -> Self {
        Self::UpgradeActionFailed {
            reference: reference.to_string(),
            details: format!("{err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_version() {
        let err = OphopError::InvalidVersionFormat("1.x".to_string());
        assert_eq!(err.to_string(), "Invalid version format: 1.x");
    }

    #[test]
    fn test_error_display_upgrade_failed() {
        let err = OphopError::upgrade(
            "registry.example.com/operator:1.7.0",
            &anyhow::anyhow!("image pull backoff"),
        );
        assert_eq!(
            err.to_string(),
            "Upgrade to registry.example.com/operator:1.7.0 failed: image pull backoff"
        );
        assert_eq!(err.kind(), "UpgradeActionFailed");
    }

    #[test]
    fn test_error_deploy_keeps_context_chain() {
        let source = anyhow::anyhow!("connection refused").context("create Deployment");
        let err = OphopError::deploy("operator:1.5.0", &source);
        assert!(err.to_string().contains("create Deployment"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_display_validation_timeout() {
        let err = OphopError::ValidationTimeout {
            expected: "version 3.0.0".to_string(),
            elapsed_secs: 20,
            attempts: 5,
            last_error: "installed version is 2.0.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Timeout waiting for version 3.0.0 after 20s (5 polls): installed version is 2.0.0"
        );
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(OphopError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            OphopError::TeardownFailed("x".into()).kind(),
            "TeardownFailed"
        );
        assert_eq!(
            OphopError::KubernetesApi("x".into()).to_string(),
            "Kubernetes API error: x"
        );
    }
}
