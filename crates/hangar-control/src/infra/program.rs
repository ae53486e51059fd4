//! Desired-state programs handed to the stack backend.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentType, Manifest};

/// What a resource instantiates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResourceKind {
    /// A chart bundle rendered with the resource values.
    ChartRelease {
        /// Bundle directory on disk.
        chart: PathBuf,
    },
    /// A single bare pod.
    Pod,
}

/// One desired resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    /// Stable identity within a stack.
    pub urn: String,
    /// What is instantiated.
    #[serde(flatten)]
    pub kind: ResourceKind,
    /// Rendered values.
    pub values: Value,
}

/// An ordered set of desired resources. An empty program means
/// "nothing desired" and tears down whatever a stack previously held.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Program {
    resources: Vec<Resource>,
}

impl Program {
    /// Program with no resources.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a resource.
    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    /// Resources in insertion order.
    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// anything else in `overlay` replaces what `base` held.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Fixed lookup from deployment type to chart bundle.
#[derive(Debug, Clone)]
pub struct ChartCatalog {
    charts_dir: PathBuf,
}

impl ChartCatalog {
    #[must_use]
    pub fn new(charts_dir: impl Into<PathBuf>) -> Self {
        Self {
            charts_dir: charts_dir.into(),
        }
    }

    /// Bundle name for a type.
    #[must_use]
    pub const fn bundle(deployment_type: DeploymentType) -> &'static str {
        match deployment_type {
            DeploymentType::Proxy => "proxy",
            DeploymentType::Persistent => "persistent",
            DeploymentType::Scalable => "scalable",
            DeploymentType::Process => "process",
        }
    }

    /// Bundle directory for a type, or `None` when it is not on disk.
    pub async fn resolve(&self, deployment_type: DeploymentType) -> Option<PathBuf> {
        let path = self.charts_dir.join(Self::bundle(deployment_type));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Some(path),
            _ => None,
        }
    }
}

/// Builds deployment programs from manifests.
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    catalog: ChartCatalog,
    global_values_path: PathBuf,
}

impl ProgramBuilder {
    #[must_use]
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            catalog: ChartCatalog::new(storage.charts_dir()),
            global_values_path: storage.global_values_path(),
        }
    }

    /// Build one chart release per enabled manifest.
    ///
    /// Disabled manifests contribute nothing. A manifest whose chart
    /// bundle is missing is skipped with a warning.
    pub async fn build(&self, manifests: &[&Manifest]) -> ControlResult<Program> {
        let global = load_global_values(&self.global_values_path).await?;
        let mut program = Program::empty();

        for &manifest in manifests {
            if !manifest.enabled {
                debug!(deployment = %manifest.name, "disabled manifest renders nothing");
                continue;
            }
            let Some(chart) = self.catalog.resolve(manifest.deployment_type).await else {
                warn!(
                    deployment = %manifest.name,
                    bundle = ChartCatalog::bundle(manifest.deployment_type),
                    "chart bundle missing, skipping manifest"
                );
                continue;
            };

            program.push(Resource {
                urn: format!("{}/{}", manifest.deployment_type.id(), manifest.name),
                kind: ResourceKind::ChartRelease { chart },
                values: release_values(manifest, &global)?,
            });
        }

        Ok(program)
    }
}

/// Merge of {name, global values, manifest content, type}, later layers
/// winning.
fn release_values(manifest: &Manifest, global: &Value) -> ControlResult<Value> {
    let mut values = json!({ "name": manifest.name });
    deep_merge(&mut values, global.clone());
    match serde_json::to_value(&manifest.content)? {
        Value::Null => {}
        content => deep_merge(&mut values, content),
    }
    deep_merge(
        &mut values,
        json!({
            "deployment": {
                "type": manifest.deployment_type.id(),
                "kind": manifest.deployment_type.workload_kind(),
            }
        }),
    );
    Ok(values)
}

async fn load_global_values(path: &Path) -> ControlResult<Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let yaml: serde_yaml::Value =
                serde_yaml::from_str(&raw).map_err(|e| ControlError::Manifest {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            match serde_json::to_value(yaml)? {
                Value::Null => Ok(Value::Object(Map::new())),
                values => Ok(values),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Map::new())),
        Err(e) => Err(e.into()),
    }
}

/// Everything needed to stand up a file-edit session pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPod {
    pub session_id: String,
    pub deployment_name: String,
    pub pod_name: String,
    pub pvc_name: String,
    pub namespace: String,
    pub image: String,
}

impl SessionPod {
    /// Mount point of the deployment volume inside the pod.
    pub const MOUNT_PATH: &'static str = "/data";

    /// Label identifying the session a pod belongs to.
    pub const SESSION_LABEL: &'static str = "hangar.dev/file-session";

    /// Single-pod program for this session.
    #[must_use]
    pub fn program(&self) -> Program {
        let mut program = Program::empty();
        program.push(Resource {
            urn: format!("pod/{}/{}", self.namespace, self.pod_name),
            kind: ResourceKind::Pod,
            values: json!({
                "name": self.pod_name,
                "namespace": self.namespace,
                "labels": {
                    "app": self.deployment_name,
                    Self::SESSION_LABEL: self.session_id,
                },
                "image": self.image,
                "volume": {
                    "claimName": self.pvc_name,
                    "mountPath": Self::MOUNT_PATH,
                },
            }),
        });
        program
    }
}
