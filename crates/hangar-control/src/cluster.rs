//! Cluster and SFTP capability surfaces consumed by the session manager.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::manifest::ManifestStore;
use crate::types::Deployment;

/// Read access to live cluster objects.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// True when the pod is running and every container reports ready.
    /// A pod that does not exist is not ready.
    async fn pod_ready(&self, name: &str, namespace: &str) -> ControlResult<bool>;

    /// Names of the claims matching a label selector, in listing order.
    async fn list_pvcs(&self, selector: &str, namespace: &str) -> ControlResult<Vec<String>>;
}

/// SFTP login assigned to a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpAccount {
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Per-deployment SFTP assignment lookup.
#[async_trait]
pub trait SftpDirectory: Send + Sync {
    /// The deployment's SFTP account, or `None` when no port is assigned.
    async fn lookup(&self, deployment: &Deployment) -> ControlResult<Option<SftpAccount>>;
}

/// Reads the SFTP assignment from the deployment's own manifest.
///
/// ```yaml
/// sftp:
///   port: 2022
///   username: lobby   # defaults to the deployment name
///   password: secret
/// ```
#[derive(Debug, Clone)]
pub struct ManifestSftpDirectory {
    store: ManifestStore,
}

impl ManifestSftpDirectory {
    #[must_use]
    pub const fn new(store: ManifestStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SftpDirectory for ManifestSftpDirectory {
    async fn lookup(&self, deployment: &Deployment) -> ControlResult<Option<SftpAccount>> {
        let manifest = self.store.load(deployment).await?;
        let Some(sftp) = manifest.content.get("sftp") else {
            return Ok(None);
        };
        let Some(port) = sftp
            .get("port")
            .and_then(serde_yaml::Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
        else {
            return Ok(None);
        };

        let field = |key: &str| sftp.get(key).and_then(serde_yaml::Value::as_str);
        Ok(Some(SftpAccount {
            port,
            username: field("username").unwrap_or(deployment.name.as_str()).to_owned(),
            password: field("password").unwrap_or_default().to_owned(),
        }))
    }
}

/// In-memory cluster for tests.
///
/// Pods are ready unless configured otherwise; claims are registered per
/// selector.
#[derive(Debug)]
pub struct MockCluster {
    pods_ready: bool,
    pod_overrides: RwLock<HashMap<String, bool>>,
    pvcs: RwLock<HashMap<String, Vec<String>>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self {
            pods_ready: true,
            pod_overrides: RwLock::default(),
            pvcs: RwLock::default(),
        }
    }
}

impl MockCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A cluster where no pod ever becomes ready.
    #[must_use]
    pub fn with_pods_never_ready() -> Self {
        Self {
            pods_ready: false,
            ..Self::default()
        }
    }

    /// Register a claim under a selector.
    pub fn add_pvc(&self, selector: &str, name: &str) -> ControlResult<()> {
        self.pvcs
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .entry(selector.to_owned())
            .or_default()
            .push(name.to_owned());
        Ok(())
    }

    /// Override readiness for one pod.
    pub fn set_pod_ready(&self, name: &str, ready: bool) -> ControlResult<()> {
        self.pod_overrides
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .insert(name.to_owned(), ready);
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn pod_ready(&self, name: &str, _namespace: &str) -> ControlResult<bool> {
        let overrides = self
            .pod_overrides
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(overrides.get(name).copied().unwrap_or(self.pods_ready))
    }

    async fn list_pvcs(&self, selector: &str, _namespace: &str) -> ControlResult<Vec<String>> {
        let pvcs = self
            .pvcs
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(pvcs.get(selector).cloned().unwrap_or_default())
    }
}

const KUBECTL_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster access through the `kubectl` CLI.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    kubectl: PathBuf,
}

impl KubectlCluster {
    #[must_use]
    pub fn new(kubectl: impl Into<PathBuf>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    /// Run `kubectl get <args> -o json`. `Ok(None)` when the object does
    /// not exist.
    async fn get_json(&self, args: &[&str]) -> ControlResult<Option<Value>> {
        let mut cmd = TokioCommand::new(&self.kubectl);
        cmd.arg("get")
            .args(args)
            .args(["-o", "json"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(kubectl = %self.kubectl.display(), ?args, "running kubectl");
        let output = timeout(KUBECTL_TIMEOUT, cmd.output())
            .await
            .map_err(|_| ControlError::cluster(format!("kubectl get {args:?} timed out")))?
            .map_err(|e| ControlError::cluster(format!("failed to spawn kubectl: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("NotFound") {
                return Ok(None);
            }
            let code = output.status.code().unwrap_or(-1);
            return Err(ControlError::cluster(format!(
                "kubectl get failed (exit code {code}): {}",
                stderr.trim()
            )));
        }

        Ok(Some(serde_json::from_slice(&output.stdout)?))
    }
}

/// Phase `Running` with at least one container and all of them ready.
fn pod_is_ready(pod: &Value) -> bool {
    let status = &pod["status"];
    if status["phase"].as_str() != Some("Running") {
        return false;
    }
    match status["containerStatuses"].as_array() {
        Some(containers) if !containers.is_empty() => containers
            .iter()
            .all(|c| c["ready"].as_bool().unwrap_or(false)),
        _ => false,
    }
}

fn item_names(list: &Value) -> Vec<String> {
    list["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["metadata"]["name"].as_str())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ClusterApi for KubectlCluster {
    async fn pod_ready(&self, name: &str, namespace: &str) -> ControlResult<bool> {
        let pod = self.get_json(&["pod", name, "-n", namespace]).await?;
        Ok(pod.as_ref().is_some_and(pod_is_ready))
    }

    async fn list_pvcs(&self, selector: &str, namespace: &str) -> ControlResult<Vec<String>> {
        let list = self
            .get_json(&["pvc", "-n", namespace, "-l", selector])
            .await?;
        Ok(list.as_ref().map(item_names).unwrap_or_default())
    }
}
