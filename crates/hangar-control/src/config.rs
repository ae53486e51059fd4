//! Configuration for hangar-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use hangar_state::StateConfig;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};
use crate::types::DeploymentType;

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// On-disk layout.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Cluster-facing platform settings.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Deployment behaviour.
    #[serde(default)]
    pub deployments: DeploymentsConfig,

    /// File-edit session behaviour.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Shared state store.
    #[serde(default)]
    pub state: StateConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `HANGAR_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("control.toml"))
            .merge(Env::prefixed("HANGAR_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HANGAR_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8084)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Where manifests, templates and chart bundles live.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage root.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/var/lib/hangar")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `root`.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/manifests`.
    #[must_use]
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// `<root>/manifests/<type>`.
    #[must_use]
    pub fn type_dir(&self, deployment_type: DeploymentType) -> PathBuf {
        self.manifests_dir().join(deployment_type.id())
    }

    /// `<root>/defaults/<type>.yaml`.
    #[must_use]
    pub fn template_path(&self, deployment_type: DeploymentType) -> PathBuf {
        self.root
            .join("defaults")
            .join(format!("{}.yaml", deployment_type.id()))
    }

    /// `<root>/charts`.
    #[must_use]
    pub fn charts_dir(&self) -> PathBuf {
        self.root.join("charts")
    }

    /// `<root>/values.yaml`.
    #[must_use]
    pub fn global_values_path(&self) -> PathBuf {
        self.root.join("values.yaml")
    }
}

/// Cluster-facing settings shared by deployments and sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Namespace all workloads run in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Label carrying the deployment type on platform resources.
    #[serde(default = "default_label_key")]
    pub label_key: String,

    /// Public host users connect to for SFTP.
    #[serde(default = "default_host")]
    pub host: String,

    /// Image run by file-edit session pods.
    #[serde(default = "default_session_image")]
    pub session_image: String,

    /// Reconcile every enabled manifest when the service starts.
    #[serde(default = "default_apply_on_startup")]
    pub apply_on_startup: bool,

    /// `kubectl` binary used for cluster queries and pod stacks.
    #[serde(default = "default_kubectl")]
    pub kubectl: PathBuf,

    /// `helm` binary used for chart releases.
    #[serde(default = "default_helm")]
    pub helm: PathBuf,

    /// Deadline for one `helm` or `kubectl` invocation that changes the
    /// cluster.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Apply stacks to the cluster. When off, stack state is only
    /// recorded in the shared store.
    #[serde(default = "default_actuate")]
    pub actuate: bool,
}

impl PlatformConfig {
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_namespace() -> String {
    "hangar".to_owned()
}

fn default_label_key() -> String {
    "hangar.dev/type".to_owned()
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_session_image() -> String {
    "atmoz/sftp:alpine".to_owned()
}

const fn default_apply_on_startup() -> bool {
    true
}

fn default_kubectl() -> PathBuf {
    PathBuf::from("kubectl")
}

fn default_helm() -> PathBuf {
    PathBuf::from("helm")
}

const fn default_command_timeout_secs() -> u64 {
    300
}

const fn default_actuate() -> bool {
    true
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            label_key: default_label_key(),
            host: default_host(),
            session_image: default_session_image(),
            apply_on_startup: default_apply_on_startup(),
            kubectl: default_kubectl(),
            helm: default_helm(),
            command_timeout_secs: default_command_timeout_secs(),
            actuate: default_actuate(),
        }
    }
}

/// Deployment behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentsConfig {
    /// Pause between the disable and enable phases of a restart.
    #[serde(default = "default_restart_settle_secs")]
    pub restart_settle_secs: u64,

    /// Attempts per restart phase.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Pause between restart attempts in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

const fn default_restart_settle_secs() -> u64 {
    5
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for DeploymentsConfig {
    fn default() -> Self {
        Self {
            restart_settle_secs: default_restart_settle_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl DeploymentsConfig {
    /// Restart settle interval.
    #[must_use]
    pub const fn restart_settle(&self) -> Duration {
        Duration::from_secs(self.restart_settle_secs)
    }

    /// Pause between restart attempts.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// File-edit session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Idle time after which the sweep terminates a session.
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,

    /// Sweep cadence in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long to wait for a session pod to become ready.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Readiness poll cadence in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Time-to-live of session records in the shared store.
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,
}

const fn default_idle_timeout_minutes() -> u64 {
    15
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

const fn default_ready_timeout_secs() -> u64 {
    60
}

const fn default_poll_interval_secs() -> u64 {
    2
}

const fn default_record_ttl_secs() -> u64 {
    1800
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            record_ttl_secs: default_record_ttl_secs(),
        }
    }
}

impl SessionsConfig {
    /// Idle timeout as a duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }

    /// Sweep interval as a duration.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Readiness budget as a duration.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Readiness poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Record time-to-live as a duration.
    #[must_use]
    pub const fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }
}
