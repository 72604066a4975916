//! Kubernetes backend: the orchestrated software is an operator Deployment
//! whose container image is the hop reference.
//!
//! Bootstrap creates the operator Deployment from a manifest (or retags an
//! existing one) and creates the optional workload Deployment under test.
//! Upgrades patch the container image. Readiness follows the same rules as
//! `kubectl rollout status`.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Api;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use tracing::{debug, info};

use super::{Installer, SystemState};
use crate::error::OphopError;
use crate::plan::version_tag;
use crate::version::Version;

const FIELD_MANAGER: &str = "ophop";

/// Build a Kubernetes client from kubeconfig.
///
/// Uses the specified context if provided, otherwise uses the default context.
pub async fn build_client(context: Option<&str>) -> Result<kube::Client> {
    let client = match context {
        Some(ctx) => {
            debug!("Using kubeconfig context: {}", ctx);
            let kubeconfig = kube::config::Kubeconfig::read()
                .map_err(|e| OphopError::Kubeconfig(e.to_string()))?;
            let config = kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions {
                    context: Some(ctx.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| OphopError::Kubeconfig(format!("context '{ctx}': {e}")))?;
            kube::Client::try_from(config)
                .map_err(|e| OphopError::Kubeconfig(format!("context '{ctx}': {e}")))?
        }
        None => {
            debug!("Using default kubeconfig context");
            kube::Client::try_default()
                .await
                .map_err(|e| OphopError::Kubeconfig(e.to_string()))?
        }
    };

    Ok(client)
}

/// Load a Deployment manifest from a YAML file.
pub fn load_manifest(path: &Path) -> Result<Deployment> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let deployment: Deployment = serde_yaml::from_str(&content)
        .map_err(|e| OphopError::Manifest(format!("{}: {e}", path.display())))?;
    Ok(deployment)
}

/// Where the operator lives and how to create it.
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub namespace: String,
    pub name: String,
    /// Container carrying the operator image. Defaults to the first container.
    pub container: Option<String>,
    /// Manifest used when the operator Deployment does not exist yet.
    pub operator_manifest: Option<Deployment>,
    /// Workload under test, created on bootstrap and removed on teardown.
    pub workload_manifest: Option<Deployment>,
}

/// Installer backed by the Kubernetes API.
pub struct DeploymentInstaller {
    client: kube::Client,
    target: DeploymentTarget,
}

impl DeploymentInstaller {
    pub const fn new(client: kube::Client, target: DeploymentTarget) -> Self {
        Self { client, target }
    }

    fn operator_api(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.target.namespace)
    }

    fn workload(&self) -> Result<Option<(Api<Deployment>, String)>> {
        let Some(workload) = &self.target.workload_manifest else {
            return Ok(None);
        };
        let name = workload.metadata.name.clone().ok_or_else(|| {
            OphopError::Manifest("workload manifest has no metadata.name".to_string())
        })?;
        let namespace = workload
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(&self.target.namespace);
        Ok(Some((Api::namespaced(self.client.clone(), namespace), name)))
    }

    async fn get_operator(&self) -> Result<Option<Deployment>> {
        let deployment = self
            .operator_api()
            .get_opt(&self.target.name)
            .await
            .map_err(|e| {
                OphopError::KubernetesApi(format!(
                    "Failed to get Deployment {}/{}: {e}",
                    self.target.namespace, self.target.name
                ))
            })?;
        Ok(deployment)
    }

    async fn require_operator(&self) -> Result<Deployment> {
        self.get_operator().await?.ok_or_else(|| {
            OphopError::KubernetesApi(format!(
                "Deployment {}/{} not found",
                self.target.namespace, self.target.name
            ))
            .into()
        })
    }

    async fn patch_image(&self, deployment: &Deployment, reference: &str) -> Result<()> {
        let container = container_name(deployment, self.target.container.as_deref())?;
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{ "name": container, "image": reference }]
                    }
                }
            }
        });

        debug!(
            "Patching {}/{} container {} to {}",
            self.target.namespace, self.target.name, container, reference
        );
        self.operator_api()
            .patch(
                &self.target.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Strategic(&patch),
            )
            .await
            .map_err(|e| {
                OphopError::KubernetesApi(format!(
                    "Failed to patch Deployment {}/{}: {e}",
                    self.target.namespace, self.target.name
                ))
            })?;
        Ok(())
    }

    async fn create_operator(&self, reference: &str) -> Result<()> {
        let mut deployment = self.target.operator_manifest.clone().ok_or_else(|| {
            OphopError::Manifest(format!(
                "Deployment {}/{} does not exist and no operator manifest was given",
                self.target.namespace, self.target.name
            ))
        })?;
        deployment.metadata.name = Some(self.target.name.clone());
        deployment.metadata.namespace = Some(self.target.namespace.clone());
        set_container_image(&mut deployment, self.target.container.as_deref(), reference)?;

        self.operator_api()
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| {
                OphopError::KubernetesApi(format!(
                    "Failed to create Deployment {}/{}: {e}",
                    self.target.namespace, self.target.name
                ))
            })?;
        Ok(())
    }

    async fn create_workload(&self) -> Result<()> {
        let (Some((api, name)), Some(manifest)) =
            (self.workload()?, self.target.workload_manifest.as_ref())
        else {
            return Ok(());
        };

        let exists = api
            .get_opt(&name)
            .await
            .map_err(|e| OphopError::KubernetesApi(format!("Failed to get workload {name}: {e}")))?
            .is_some();
        if exists {
            info!("Workload {} already exists, reusing it", name);
            return Ok(());
        }

        info!("Deploying workload {}", name);
        api.create(&PostParams::default(), manifest)
            .await
            .map_err(|e| {
                OphopError::KubernetesApi(format!("Failed to create workload {name}: {e}"))
            })?;
        Ok(())
    }
}

#[async_trait]
impl Installer for DeploymentInstaller {
    async fn deploy(&self, reference: &str) -> Result<()> {
        match self.get_operator().await? {
            Some(existing) => {
                info!(
                    "Deployment {}/{} exists, setting image to {}",
                    self.target.namespace, self.target.name, reference
                );
                self.patch_image(&existing, reference).await?;
            }
            None => {
                info!(
                    "Creating Deployment {}/{} with image {}",
                    self.target.namespace, self.target.name, reference
                );
                self.create_operator(reference).await?;
            }
        }

        self.create_workload().await
    }

    async fn upgrade(&self, reference: &str) -> Result<()> {
        let deployment = self.require_operator().await?;
        self.patch_image(&deployment, reference).await
    }

    async fn teardown(&self) -> Result<()> {
        if let Some((api, name)) = self.workload()? {
            info!("Deleting workload {}", name);
            delete_ignoring_missing(&api, &name).await?;
        }

        info!(
            "Deleting Deployment {}/{}",
            self.target.namespace, self.target.name
        );
        delete_ignoring_missing(&self.operator_api(), &self.target.name).await
    }

    async fn current_version(&self) -> Result<Version> {
        let deployment = self.require_operator().await?;
        installed_version(&deployment, self.target.container.as_deref())
    }

    async fn observe(&self) -> Result<SystemState> {
        let workload_ready = match self.workload()? {
            Some((api, name)) => api
                .get_opt(&name)
                .await
                .map_err(|e| {
                    OphopError::KubernetesApi(format!("Failed to get workload {name}: {e}"))
                })?
                .map(|d| rollout_status(&d).is_ok()),
            None => None,
        };

        let Some(operator) = self.get_operator().await? else {
            return Ok(SystemState {
                workload_ready,
                ..SystemState::absent()
            });
        };

        let version = installed_version(&operator, self.target.container.as_deref())?;
        let rollout = rollout_status(&operator);

        Ok(SystemState {
            installed_version: Some(version),
            ready: rollout.is_ok(),
            workload_ready,
            detail: rollout.err(),
        })
    }

    fn name(&self) -> &str {
        "kubernetes"
    }
}

async fn delete_ignoring_missing(api: &Api<Deployment>, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::foreground()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!("Deployment {} already gone", name);
            Ok(())
        }
        Err(e) => {
            Err(OphopError::KubernetesApi(format!("Failed to delete Deployment {name}: {e}")).into())
        }
    }
}

/// Name of the operator container, the configured one or the first.
fn container_name<'a>(deployment: &'a Deployment, container: Option<&'a str>) -> Result<&'a str> {
    if let Some(name) = container {
        return Ok(name);
    }
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .map(|c| c.name.as_str())
        .ok_or_else(|| OphopError::Manifest("Deployment has no containers".to_string()).into())
}

/// Image of the operator container.
fn container_image<'a>(deployment: &'a Deployment, container: Option<&str>) -> Result<&'a str> {
    let containers = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or_default();

    let found = match container {
        Some(name) => containers.iter().find(|c| c.name == name),
        None => containers.first(),
    };

    found
        .and_then(|c| c.image.as_deref())
        .ok_or_else(|| {
            OphopError::Manifest(format!(
                "Deployment has no image for container {}",
                container.unwrap_or("<first>")
            ))
            .into()
        })
}

fn installed_version(deployment: &Deployment, container: Option<&str>) -> Result<Version> {
    let image = container_image(deployment, container)?;
    Ok(Version::parse(version_tag(image)?)?)
}

fn set_container_image(
    deployment: &mut Deployment,
    container: Option<&str>,
    image: &str,
) -> Result<()> {
    let containers = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .map(|p| &mut p.containers)
        .ok_or_else(|| OphopError::Manifest("manifest has no pod spec".to_string()))?;

    let found = match container {
        Some(name) => containers.iter_mut().find(|c| c.name == name),
        None => containers.first_mut(),
    };
    let found = found.ok_or_else(|| {
        OphopError::Manifest(format!(
            "manifest has no container {}",
            container.unwrap_or("<first>")
        ))
    })?;

    found.image = Some(image.to_string());
    Ok(())
}

/// Rollout readiness of a Deployment, with the reason when not ready.
fn rollout_status(deployment: &Deployment) -> std::result::Result<(), String> {
    let generation = deployment.metadata.generation.unwrap_or(0);
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return Err("no status reported yet".to_string());
    };

    if status.observed_generation.unwrap_or(0) < generation {
        return Err("waiting for spec update to be observed".to_string());
    }

    let updated = status.updated_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    if updated < desired {
        return Err(format!("{updated}/{desired} replicas updated"));
    }
    if total > updated {
        return Err(format!(
            "{} old replicas pending termination",
            total - updated
        ));
    }
    if available < updated {
        return Err(format!("{available}/{updated} updated replicas available"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(value: serde_json::Value) -> Deployment {
        serde_json::from_value(value).unwrap()
    }

    fn operator(image: &str, status: serde_json::Value) -> Deployment {
        deployment(serde_json::json!({
            "metadata": { "name": "portworx-operator", "generation": 3 },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": "operator" } },
                "template": {
                    "spec": {
                        "containers": [
                            { "name": "operator", "image": image },
                            { "name": "sidecar", "image": "busybox:1.36" }
                        ]
                    }
                }
            },
            "status": status
        }))
    }

    fn rolled_out() -> serde_json::Value {
        serde_json::json!({
            "observedGeneration": 3,
            "replicas": 2,
            "updatedReplicas": 2,
            "readyReplicas": 2,
            "availableReplicas": 2
        })
    }

    #[test]
    fn test_installed_version_from_first_container() {
        let d = operator("docker.io/portworx/px-operator:23.10.1", rolled_out());
        assert_eq!(
            installed_version(&d, None).unwrap(),
            Version::parse("23.10.1").unwrap()
        );
    }

    #[test]
    fn test_installed_version_from_named_container() {
        let d = operator("docker.io/portworx/px-operator:23.10.1", rolled_out());
        assert_eq!(
            installed_version(&d, Some("sidecar")).unwrap(),
            Version::parse("1.36").unwrap()
        );
        assert!(installed_version(&d, Some("missing")).is_err());
    }

    #[test]
    fn test_container_name() {
        let d = operator("op:1.0.0", rolled_out());
        assert_eq!(container_name(&d, None).unwrap(), "operator");
        assert_eq!(container_name(&d, Some("sidecar")).unwrap(), "sidecar");
    }

    #[test]
    fn test_set_container_image() {
        let mut d = operator("op:1.0.0", rolled_out());
        set_container_image(&mut d, Some("operator"), "op:1.7.0").unwrap();
        assert_eq!(container_image(&d, None).unwrap(), "op:1.7.0");
        assert!(set_container_image(&mut d, Some("missing"), "op:1.7.0").is_err());
    }

    #[test]
    fn test_rollout_complete() {
        let d = operator("op:1.0.0", rolled_out());
        assert!(rollout_status(&d).is_ok());
    }

    #[test]
    fn test_rollout_in_progress() {
        let stale = operator(
            "op:1.0.0",
            serde_json::json!({ "observedGeneration": 2, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 2 }),
        );
        assert_eq!(
            rollout_status(&stale).unwrap_err(),
            "waiting for spec update to be observed"
        );

        let updating = operator(
            "op:1.0.0",
            serde_json::json!({ "observedGeneration": 3, "replicas": 3, "updatedReplicas": 1, "availableReplicas": 2 }),
        );
        assert_eq!(rollout_status(&updating).unwrap_err(), "1/2 replicas updated");

        let terminating = operator(
            "op:1.0.0",
            serde_json::json!({ "observedGeneration": 3, "replicas": 3, "updatedReplicas": 2, "availableReplicas": 2 }),
        );
        assert_eq!(
            rollout_status(&terminating).unwrap_err(),
            "1 old replicas pending termination"
        );

        let unavailable = operator(
            "op:1.0.0",
            serde_json::json!({ "observedGeneration": 3, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 1 }),
        );
        assert_eq!(
            rollout_status(&unavailable).unwrap_err(),
            "1/2 updated replicas available"
        );
    }

    #[test]
    fn test_rollout_without_status() {
        let d = deployment(serde_json::json!({
            "metadata": { "name": "operator" },
            "spec": {
                "selector": {},
                "template": { "spec": { "containers": [{ "name": "operator", "image": "op:1.0.0" }] } }
            }
        }));
        assert_eq!(rollout_status(&d).unwrap_err(), "no status reported yet");
    }

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operator.yaml");
        std::fs::write(
            &path,
            r"apiVersion: apps/v1
kind: Deployment
metadata:
  name: portworx-operator
spec:
  selector:
    matchLabels:
      name: portworx-operator
  template:
    metadata:
      labels:
        name: portworx-operator
    spec:
      containers:
        - name: portworx-operator
          image: docker.io/portworx/px-operator:23.10.1
",
        )
        .unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.metadata.name.as_deref(), Some("portworx-operator"));
        assert_eq!(
            container_image(&manifest, None).unwrap(),
            "docker.io/portworx/px-operator:23.10.1"
        );
    }

    #[test]
    fn test_load_manifest_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "spec: [not, a, deployment").unwrap();
        assert!(load_manifest(&path).is_err());
        assert!(load_manifest(&dir.path().join("missing.yaml")).is_err());
    }
}
