//! Test fixtures for control plane integration tests.

use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hangar_control::config::StorageConfig;
use hangar_control::{DeploymentType, FileEditSession, SessionStatus};

/// Template every deployment type starts from.
pub const TEMPLATE: &str = "\
name: template
dataDirectory: template
scaling:
  replicas: 1
volume:
  size: 1Gi
queueing:
  enabled: false
";

/// Write default templates and chart bundles for every type.
pub async fn write_storage_tree(root: &Path) -> StorageConfig {
    let storage = StorageConfig::at(root);
    let defaults = root.join("defaults");
    tokio::fs::create_dir_all(&defaults).await.unwrap();
    for t in DeploymentType::ALL {
        tokio::fs::write(defaults.join(format!("{}.yaml", t.id())), TEMPLATE)
            .await
            .unwrap();
        tokio::fs::create_dir_all(storage.charts_dir().join(t.id()))
            .await
            .unwrap();
    }
    storage
}

/// Manifest body assigning an SFTP port.
pub fn manifest_with_sftp(name: &str, port: u16) -> String {
    format!(
        "name: {name}\ndataDirectory: {name}\nscaling:\n  replicas: 1\nsftp:\n  port: {port}\n  password: secret\n"
    )
}

/// Builder for session records written straight to the store.
pub struct SessionBuilder {
    id: String,
    deployment_name: String,
    user_id: String,
    status: SessionStatus,
    last_activity: DateTime<Utc>,
}

impl SessionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            deployment_name: "lobby".to_owned(),
            user_id: "user-42".to_owned(),
            status: SessionStatus::Ready,
            last_activity: Utc::now(),
        }
    }

    pub fn deployment(mut self, name: &str) -> Self {
        self.deployment_name = name.to_owned();
        self
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_owned();
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Last activity `minutes` ago.
    pub fn idle_for_minutes(mut self, minutes: i64) -> Self {
        self.last_activity = Utc::now() - ChronoDuration::minutes(minutes);
        self
    }

    pub fn build(self) -> FileEditSession {
        FileEditSession {
            pod_name: FileEditSession::pod_name_for(&self.deployment_name, &self.id),
            pvc_name: format!("data-{}-0", self.deployment_name),
            id: self.id,
            deployment_name: self.deployment_name,
            user_id: self.user_id,
            created_at: self.last_activity,
            last_activity: self.last_activity,
            status: self.status,
            namespace: "hangar".to_owned(),
            sftp_credentials: None,
        }
    }
}
