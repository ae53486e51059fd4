//! Core types for hangar-control.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cluster primitive a deployment type scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// Stateless replicas.
    Deployment,
    /// Replicas with stable identity and per-replica volumes.
    StatefulSet,
}

/// The closed set of deployment types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    /// Edge proxy in front of every other deployment.
    Proxy,
    /// Single long-lived instance with durable data.
    Persistent,
    /// Horizontally scaled instances sharing a template.
    Scalable,
    /// Plain background process.
    Process,
}

impl DeploymentType {
    /// Every type, in manifest scan order.
    pub const ALL: [Self; 4] = [Self::Proxy, Self::Persistent, Self::Scalable, Self::Process];

    /// Stable identifier used in paths and stack names.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Persistent => "persistent",
            Self::Scalable => "scalable",
            Self::Process => "process",
        }
    }

    /// Human readable name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Proxy => "Proxy",
            Self::Persistent => "Persistent",
            Self::Scalable => "Scalable",
            Self::Process => "Process",
        }
    }

    /// The cluster primitive this type scales.
    #[must_use]
    pub const fn workload_kind(&self) -> WorkloadKind {
        match self {
            Self::Proxy | Self::Process => WorkloadKind::Deployment,
            Self::Persistent | Self::Scalable => WorkloadKind::StatefulSet,
        }
    }

    /// Look up a type by its identifier.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// An on-disk manifest, parsed.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Deployment name derived from the file name.
    pub name: String,
    /// Current file path.
    pub path: PathBuf,
    /// Parsed manifest body.
    pub content: serde_yaml::Value,
    /// False when the file carries the `disabled-` prefix.
    pub enabled: bool,
    /// Type directory the manifest lives in.
    pub deployment_type: DeploymentType,
}

impl Manifest {
    /// The `dataDirectory` field, falling back to the deployment name.
    #[must_use]
    pub fn data_directory(&self) -> String {
        self.content
            .get("dataDirectory")
            .and_then(serde_yaml::Value::as_str)
            .map_or_else(|| self.name.clone(), ToOwned::to_owned)
    }
}

/// A registered deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Unique name across all types.
    pub name: String,
    /// Path of the backing manifest.
    pub path: PathBuf,
    /// Deployment type.
    #[serde(rename = "type")]
    pub deployment_type: DeploymentType,
    /// Whether the deployment should be running.
    pub enabled: bool,
    /// Directory inside the volume holding the deployment's data.
    pub data_directory: String,
}

impl From<&Manifest> for Deployment {
    fn from(manifest: &Manifest) -> Self {
        Self {
            name: manifest.name.clone(),
            path: manifest.path.clone(),
            deployment_type: manifest.deployment_type,
            enabled: manifest.enabled,
            data_directory: manifest.data_directory(),
        }
    }
}

/// Resource counts reported by one or more stack applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Resources created.
    pub created: u64,
    /// Resources whose desired state changed.
    pub updated: u64,
    /// Resources removed.
    pub deleted: u64,
    /// Resources left as they were.
    pub unchanged: u64,
}

impl ChangeSummary {
    /// Add another summary's counts to this one.
    pub fn absorb(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
    }

    /// True when the apply changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Outcome of an infra apply as reported to callers.
///
/// Either a success with a summary or a failure with an error message;
/// the fields are private so a result is never partially populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfraApplyResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ChangeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl InfraApplyResult {
    /// Whether the apply succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// Change counts, present only on success.
    #[must_use]
    pub const fn summary(&self) -> Option<&ChangeSummary> {
        self.summary.as_ref()
    }

    /// Failure message, present only on failure.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl<E: fmt::Display> From<Result<ChangeSummary, E>> for InfraApplyResult {
    fn from(result: Result<ChangeSummary, E>) -> Self {
        match result {
            Ok(summary) => Self {
                success: true,
                summary: Some(summary),
                error: None,
            },
            Err(e) => Self {
                success: false,
                summary: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Lifecycle state of a file-edit session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Pod is being brought up.
    Creating,
    /// Pod is ready and credentials are usable.
    Ready,
    /// Pod failed to come up; kept for inspection.
    Error,
    /// Teardown in progress.
    Terminating,
}

impl SessionStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Terminating => "terminating",
        }
    }

    /// Statuses a record may move to this one from.
    ///
    /// A fresh record starts out `Creating`. Teardown is reachable from
    /// every state, including a repeated teardown after a failed one.
    #[must_use]
    pub const fn predecessors(&self) -> &'static [SessionStatus] {
        match self {
            Self::Creating => &[],
            Self::Ready | Self::Error => &[Self::Creating],
            Self::Terminating => &[Self::Creating, Self::Ready, Self::Error, Self::Terminating],
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            "terminating" => Ok(Self::Terminating),
            _ => Err(format!("unknown session status: {s}")),
        }
    }
}

/// Connection details for a session's SFTP endpoint.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct SftpCredentials {
    /// Public platform host.
    pub host: String,
    /// SFTP port assigned to the deployment.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for SftpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An ephemeral pod mounted against a deployment's volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEditSession {
    /// Opaque unique token.
    pub id: String,
    /// Deployment whose volume is mounted.
    pub deployment_name: String,
    /// Session pod name.
    pub pod_name: String,
    /// Claim mounted by the pod.
    pub pvc_name: String,
    /// Owning user.
    pub user_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time the session was touched.
    pub last_activity: DateTime<Utc>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Namespace of the pod.
    pub namespace: String,
    /// Present only while the session is ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sftp_credentials: Option<SftpCredentials>,
}

impl FileEditSession {
    /// Generate a new session id.
    #[must_use]
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Pod name for a session: the deployment name plus the id's first
    /// eight characters.
    #[must_use]
    pub fn pod_name_for(deployment_name: &str, id: &str) -> String {
        let prefix: String = id.chars().take(8).collect();
        format!("{deployment_name}-files-{prefix}")
    }
}
