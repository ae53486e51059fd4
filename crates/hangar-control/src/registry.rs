//! Deployment registry.
//!
//! The in-process view of which deployments exist, rebuilt from the
//! manifest store on load and kept current by create, delete and toggle
//! calls. Each process instance holds its own copy.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::DeploymentsConfig;
use crate::error::{ControlError, ControlResult};
use crate::events::{ControlEvent, EventEmitter, CREATE_PAYLOAD};
use crate::infra::InfraEngine;
use crate::manifest::{validate_name, ManifestStore};
use crate::retry::RetryPolicy;
use crate::types::{Deployment, DeploymentType, InfraApplyResult, Manifest};

/// Name of the deployment every installation carries.
pub const DEFAULT_PROXY: &str = "proxy";

/// Registry of deployments.
#[async_trait]
pub trait DeploymentRegistry: Send + Sync {
    /// Rebuild the registry from the manifest store.
    async fn load(&self) -> ControlResult<()>;

    /// Create a manifest from the type's template and apply it.
    async fn create(&self, name: &str, deployment_type: DeploymentType)
        -> ControlResult<Deployment>;

    /// Delete the manifest and destroy its resources.
    async fn delete(&self, name: &str) -> ControlResult<()>;

    /// Look up a deployment by name.
    async fn get_by_name(&self, name: &str) -> Option<Deployment>;

    /// First deployment whose manifest path starts with `prefix`.
    async fn get_by_path(&self, prefix: &Path) -> Option<Deployment>;

    /// Every registered deployment.
    async fn list(&self) -> Vec<Deployment>;

    /// Disable, pause, enable. Each phase retries.
    async fn restart(&self, name: &str) -> ControlResult<()>;

    /// Toggle the enabled flag and apply the result.
    async fn set_enabled(&self, name: &str, enabled: bool) -> ControlResult<Deployment>;

    /// Raw manifest text.
    async fn get_content(&self, name: &str) -> ControlResult<String>;

    /// Replace the manifest text and apply it.
    async fn update_content(&self, name: &str, content: &str) -> ControlResult<Deployment>;

    /// Reconcile every enabled manifest.
    async fn run_apply_all(&self) -> InfraApplyResult;
}

/// Registry held in process memory.
pub struct LocalDeploymentRegistry {
    store: ManifestStore,
    engine: Arc<dyn InfraEngine>,
    events: EventEmitter,
    deployments: RwLock<Vec<Deployment>>,
    restart_policy: RetryPolicy,
    restart_settle: Duration,
}

impl LocalDeploymentRegistry {
    pub fn new(
        store: ManifestStore,
        engine: Arc<dyn InfraEngine>,
        events: EventEmitter,
        config: &DeploymentsConfig,
    ) -> Self {
        Self {
            store,
            engine,
            events,
            deployments: RwLock::new(Vec::new()),
            restart_policy: RetryPolicy::fixed(config.retry_attempts, config.retry_backoff()),
            restart_settle: config.restart_settle(),
        }
    }

    /// The manifest store backing this registry.
    #[must_use]
    pub const fn store(&self) -> &ManifestStore {
        &self.store
    }

    async fn require(&self, name: &str) -> ControlResult<Deployment> {
        self.get_by_name(name)
            .await
            .ok_or_else(|| ControlError::DeploymentNotFound(name.to_owned()))
    }

    /// Replace the cached copy of a deployment.
    async fn replace(&self, deployment: Deployment) {
        let mut deployments = self.deployments.write().await;
        if let Some(slot) = deployments.iter_mut().find(|d| d.name == deployment.name) {
            *slot = deployment;
        }
    }

    async fn load_manifest(&self, deployment: &Deployment) -> ControlResult<Manifest> {
        self.store.load(deployment).await
    }
}

impl std::fmt::Debug for LocalDeploymentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDeploymentRegistry")
            .field("store", &self.store)
            .field("restart_policy", &self.restart_policy)
            .field("restart_settle", &self.restart_settle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DeploymentRegistry for LocalDeploymentRegistry {
    async fn load(&self) -> ControlResult<()> {
        let manifests = self.store.get_all_manifests().await?;
        let mut loaded: Vec<Deployment> = manifests.iter().map(Deployment::from).collect();

        if !loaded.iter().any(|d| d.name == DEFAULT_PROXY) {
            info!("no proxy deployment found, creating default");
            let path = self
                .store
                .create_manifest(DEFAULT_PROXY, DeploymentType::Proxy)
                .await?;
            let manifest = self
                .load_manifest(&Deployment {
                    name: DEFAULT_PROXY.to_owned(),
                    path,
                    deployment_type: DeploymentType::Proxy,
                    enabled: true,
                    data_directory: DEFAULT_PROXY.to_owned(),
                })
                .await?;
            loaded.push(Deployment::from(&manifest));
        }

        info!(count = loaded.len(), "deployments loaded");
        *self.deployments.write().await = loaded;
        Ok(())
    }

    async fn create(
        &self,
        name: &str,
        deployment_type: DeploymentType,
    ) -> ControlResult<Deployment> {
        validate_name(name)?;
        if self.get_by_name(name).await.is_some() {
            return Err(ControlError::AlreadyExists(name.to_owned()));
        }

        let path = self.store.create_manifest(name, deployment_type).await?;
        let manifest = self
            .load_manifest(&Deployment {
                name: name.to_owned(),
                path,
                deployment_type,
                enabled: true,
                data_directory: name.to_owned(),
            })
            .await?;

        if let Err(e) = self.engine.apply_single(&manifest).await {
            warn!(
                deployment = %name,
                path = %manifest.path.display(),
                error = %e,
                "apply failed, manifest left on disk"
            );
            return Err(e);
        }

        let deployment = Deployment::from(&manifest);
        self.deployments.write().await.push(deployment.clone());
        info!(deployment = %name, r#type = %deployment_type, "deployment created");

        self.events
            .emit(ControlEvent::DeploymentModified(CREATE_PAYLOAD.to_owned()))
            .await;
        Ok(deployment)
    }

    async fn delete(&self, name: &str) -> ControlResult<()> {
        let deployment = self.require(name).await?;

        self.store.delete_manifest(&deployment).await?;
        self.deployments.write().await.retain(|d| d.name != name);

        if let Err(e) = self
            .engine
            .destroy_single(name, deployment.deployment_type)
            .await
        {
            warn!(
                deployment = %name,
                error = %e,
                "destroy failed after manifest removal, resources may persist"
            );
            return Err(e);
        }

        info!(deployment = %name, "deployment deleted");
        self.events
            .emit(ControlEvent::DeploymentModified(name.to_owned()))
            .await;
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Option<Deployment> {
        self.deployments
            .read()
            .await
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    async fn get_by_path(&self, prefix: &Path) -> Option<Deployment> {
        self.deployments
            .read()
            .await
            .iter()
            .find(|d| d.path.starts_with(prefix))
            .cloned()
    }

    async fn list(&self) -> Vec<Deployment> {
        self.deployments.read().await.clone()
    }

    async fn restart(&self, name: &str) -> ControlResult<()> {
        self.require(name).await?;
        info!(deployment = %name, "restarting deployment");

        self.restart_policy
            .run("disable", || self.set_enabled(name, false))
            .await?;
        tokio::time::sleep(self.restart_settle).await;
        self.restart_policy
            .run("enable", || self.set_enabled(name, true))
            .await?;

        info!(deployment = %name, "deployment restarted");
        Ok(())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> ControlResult<Deployment> {
        let mut deployment = self.require(name).await?;

        deployment.path = self.store.set_enabled(&deployment, enabled).await?;
        deployment.enabled = enabled;
        self.replace(deployment.clone()).await;

        let manifest = self.load_manifest(&deployment).await?;
        self.engine.apply_single(&manifest).await?;
        Ok(deployment)
    }

    async fn get_content(&self, name: &str) -> ControlResult<String> {
        let deployment = self.require(name).await?;
        self.store.get_content(&deployment).await
    }

    async fn update_content(&self, name: &str, content: &str) -> ControlResult<Deployment> {
        let deployment = self.require(name).await?;
        serde_yaml::from_str::<serde_yaml::Value>(content).map_err(|e| {
            ControlError::Manifest {
                path: deployment.path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        self.store.update_content(&deployment, content).await?;
        let manifest = self.load_manifest(&deployment).await?;
        let refreshed = Deployment::from(&manifest);
        self.replace(refreshed.clone()).await;

        self.engine.apply_single(&manifest).await?;
        Ok(refreshed)
    }

    async fn run_apply_all(&self) -> InfraApplyResult {
        match self.store.get_all_manifests().await {
            Ok(manifests) => self.engine.apply_all(&manifests).await,
            Err(e) => InfraApplyResult::from(Err::<crate::types::ChangeSummary, _>(e)),
        }
    }
}
