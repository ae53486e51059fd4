//! File-edit session lifecycle.
//!
//! ```text
//! creating ──▶ ready ──▶ terminating ──▶ (removed)
//!     │
//!     ▼
//!   error
//! ```
//!
//! An `error` record stays in the store for inspection until its TTL runs
//! out or it is terminated explicitly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use crate::cluster::{ClusterApi, SftpDirectory};
use crate::config::{PlatformConfig, SessionsConfig};
use crate::error::{ControlError, ControlResult};
use crate::events::{ControlEvent, EventEmitter};
use crate::infra::{InfraEngine, SessionPod};
use crate::registry::DeploymentRegistry;
use crate::types::{Deployment, FileEditSession, SessionStatus, SftpCredentials};

/// Collaborators the session manager drives.
pub struct SessionDeps {
    pub registry: SessionRegistry,
    pub deployments: Arc<dyn DeploymentRegistry>,
    pub engine: Arc<dyn InfraEngine>,
    pub cluster: Arc<dyn ClusterApi>,
    pub sftp: Arc<dyn SftpDirectory>,
    pub events: EventEmitter,
}

/// Creates, reads, validates and tears down file-edit sessions.
pub struct SessionManager {
    registry: SessionRegistry,
    deployments: Arc<dyn DeploymentRegistry>,
    engine: Arc<dyn InfraEngine>,
    cluster: Arc<dyn ClusterApi>,
    sftp: Arc<dyn SftpDirectory>,
    events: EventEmitter,
    platform: PlatformConfig,
    config: SessionsConfig,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, platform: PlatformConfig, config: SessionsConfig) -> Self {
        Self {
            registry: deps.registry,
            deployments: deps.deployments,
            engine: deps.engine,
            cluster: deps.cluster,
            sftp: deps.sftp,
            events: deps.events,
            platform,
            config,
        }
    }

    /// Session configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &SessionsConfig {
        &self.config
    }

    /// Label selector locating a deployment's volume claim.
    #[must_use]
    pub fn pvc_selector(&self, deployment: &Deployment) -> String {
        format!(
            "app={},{}={}",
            deployment.name,
            self.platform.label_key,
            deployment.deployment_type.id()
        )
    }

    /// Bring up a session pod against a deployment's volume and wait for
    /// it to become ready.
    pub async fn create_session(
        &self,
        deployment_name: &str,
        user_id: &str,
    ) -> ControlResult<FileEditSession> {
        let deployment = self
            .deployments
            .get_by_name(deployment_name)
            .await
            .ok_or_else(|| ControlError::DeploymentNotFound(deployment_name.to_owned()))?;
        let account = self
            .sftp
            .lookup(&deployment)
            .await?
            .ok_or_else(|| ControlError::NoSftpPort(deployment_name.to_owned()))?;

        let selector = self.pvc_selector(&deployment);
        let pvcs = self
            .cluster
            .list_pvcs(&selector, &self.platform.namespace)
            .await?;
        let pvc_name = match pvcs.as_slice() {
            [] => return Err(ControlError::PvcNotFound { selector }),
            [only] => only.clone(),
            [first, ..] => {
                warn!(
                    deployment = %deployment_name,
                    selector = %selector,
                    matches = ?pvcs,
                    chosen = %first,
                    "multiple volume claims match, using the first"
                );
                first.clone()
            }
        };

        let id = FileEditSession::generate_id();
        let now = Utc::now();
        let mut session = FileEditSession {
            pod_name: FileEditSession::pod_name_for(deployment_name, &id),
            id,
            deployment_name: deployment_name.to_owned(),
            pvc_name,
            user_id: user_id.to_owned(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Creating,
            namespace: self.platform.namespace.clone(),
            sftp_credentials: None,
        };
        self.registry.put(&session).await?;
        info!(
            session_id = %session.id,
            deployment = %deployment_name,
            user_id = %user_id,
            pvc = %session.pvc_name,
            "creating file session"
        );

        let pod = SessionPod {
            session_id: session.id.clone(),
            deployment_name: deployment_name.to_owned(),
            pod_name: session.pod_name.clone(),
            pvc_name: session.pvc_name.clone(),
            namespace: session.namespace.clone(),
            image: self.platform.session_image.clone(),
        };
        let brought_up = match self.engine.create_file_session(&pod).await {
            Ok(_) => self.wait_ready(&session).await,
            Err(e) => Err(e.to_string()),
        };

        if let Err(reason) = brought_up {
            warn!(session_id = %session.id, reason = %reason, "file session failed");
            if !self.transition(&session.id, SessionStatus::Error).await? {
                return Err(self.abandon(&session).await);
            }
            return Err(ControlError::PodNotReady {
                pod: session.pod_name,
                reason,
            });
        }

        if !self.transition(&session.id, SessionStatus::Ready).await? {
            return Err(self.abandon(&session).await);
        }
        session.status = SessionStatus::Ready;
        session.sftp_credentials = Some(self.credentials(account));
        info!(session_id = %session.id, pod = %session.pod_name, "file session ready");
        Ok(session)
    }

    /// Poll pod readiness until it succeeds or the budget runs out.
    async fn wait_ready(&self, session: &FileEditSession) -> Result<(), String> {
        let budget = self.config.ready_timeout();
        let deadline = Instant::now() + budget;
        loop {
            match self
                .cluster
                .pod_ready(&session.pod_name, &session.namespace)
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(pod = %session.pod_name, "pod not ready yet"),
                Err(e) => debug!(pod = %session.pod_name, error = %e, "readiness check failed"),
            }
            if Instant::now() + self.config.poll_interval() > deadline {
                return Err(format!("not ready after {}s", budget.as_secs()));
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Move a session along its lifecycle, announcing the change.
    ///
    /// Returns false, without an event, when the record is gone or is not
    /// in a state that leads to `status`.
    async fn transition(&self, id: &str, status: SessionStatus) -> ControlResult<bool> {
        if !self.registry.set_status(id, status).await? {
            debug!(session_id = %id, status = %status, "session transition refused");
            return Ok(false);
        }
        self.events
            .emit(ControlEvent::FileSyncChanged {
                session_id: id.to_owned(),
                status,
            })
            .await;
        Ok(true)
    }

    /// A creation whose record was terminated underneath it. The pod
    /// stack may have been brought up after teardown ran, so destroy it
    /// again.
    async fn abandon(&self, session: &FileEditSession) -> ControlError {
        info!(session_id = %session.id, "file session terminated while creating");
        if let Err(e) = self.engine.destroy_file_session(&session.id).await {
            warn!(session_id = %session.id, error = %e, "failed to destroy abandoned session pod");
        }
        ControlError::SessionNotFound(session.id.clone())
    }

    fn credentials(&self, account: crate::cluster::SftpAccount) -> SftpCredentials {
        SftpCredentials {
            host: self.platform.host.clone(),
            port: account.port,
            username: account.username,
            password: account.password,
        }
    }

    /// Attach credentials to a ready session from the live SFTP assignment.
    async fn with_credentials(&self, mut session: FileEditSession) -> FileEditSession {
        session.sftp_credentials = None;
        if session.status != SessionStatus::Ready {
            return session;
        }

        let Some(deployment) = self.deployments.get_by_name(&session.deployment_name).await else {
            warn!(
                session_id = %session.id,
                deployment = %session.deployment_name,
                "ready session references unknown deployment"
            );
            return session;
        };
        match self.sftp.lookup(&deployment).await {
            Ok(Some(account)) => session.sftp_credentials = Some(self.credentials(account)),
            Ok(None) => warn!(session_id = %session.id, "deployment lost its sftp port"),
            Err(e) => warn!(session_id = %session.id, error = %e, "sftp lookup failed"),
        }
        session
    }

    /// Read a session. Credentials are present exactly when it is ready.
    pub async fn get_session(&self, id: &str) -> ControlResult<FileEditSession> {
        let session = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| ControlError::SessionNotFound(id.to_owned()))?;
        Ok(self.with_credentials(session).await)
    }

    /// Mark a session as used now.
    pub async fn refresh_activity(&self, id: &str) -> ControlResult<()> {
        if self.registry.set_last_activity(id, Utc::now()).await? {
            debug!(session_id = %id, "activity refreshed");
            Ok(())
        } else {
            Err(ControlError::SessionNotFound(id.to_owned()))
        }
    }

    /// True only when the record is ready and the pod passes a live readiness check.
    pub async fn validate_session(&self, id: &str) -> ControlResult<bool> {
        let Some(session) = self.registry.get(id).await? else {
            return Ok(false);
        };
        if session.status != SessionStatus::Ready {
            return Ok(false);
        }
        let ready = match self
            .cluster
            .pod_ready(&session.pod_name, &session.namespace)
            .await
        {
            Ok(ready) => ready,
            Err(e) => {
                debug!(session_id = %id, error = %e, "readiness check failed, session invalid");
                false
            }
        };
        if ready {
            self.registry.set_last_activity(id, Utc::now()).await?;
        }
        Ok(ready)
    }

    /// Tear a session down. Infra failures are logged and do not stop
    /// the record from being removed.
    pub async fn terminate_session(&self, id: &str) -> ControlResult<()> {
        let session = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| ControlError::SessionNotFound(id.to_owned()))?;

        if !self.transition(id, SessionStatus::Terminating).await? {
            return Err(ControlError::SessionNotFound(id.to_owned()));
        }
        if let Err(e) = self.engine.destroy_file_session(id).await {
            warn!(
                session_id = %id,
                error = %e,
                "failed to destroy session pod, removing record anyway"
            );
        }
        self.registry.remove(&session).await?;

        info!(session_id = %id, deployment = %session.deployment_name, "file session terminated");
        Ok(())
    }

    /// Sessions mounted against one deployment.
    pub async fn list_for_deployment(&self, name: &str) -> ControlResult<Vec<FileEditSession>> {
        let mut sessions = Vec::new();
        for session in self.registry.list_for_deployment(name).await? {
            sessions.push(self.with_credentials(session).await);
        }
        Ok(sessions)
    }

    /// Sessions owned by one user.
    pub async fn list_for_user(&self, user_id: &str) -> ControlResult<Vec<FileEditSession>> {
        let mut sessions = Vec::new();
        for session in self.registry.list_for_user(user_id).await? {
            sessions.push(self.with_credentials(session).await);
        }
        Ok(sessions)
    }

    /// Every session record in the store, without credentials.
    pub async fn list_all_active_sessions(&self) -> ControlResult<Vec<FileEditSession>> {
        self.registry.list_all().await
    }

    /// Terminate every session idle for longer than `idle_timeout`.
    ///
    /// Returns the ids terminated. A failure on one session is logged and
    /// the rest are still processed.
    pub async fn terminate_idle(&self, idle_timeout: Duration) -> ControlResult<Vec<String>> {
        let now = Utc::now();
        let mut terminated = Vec::new();

        for session in self.registry.list_all().await? {
            let idle = (now - session.last_activity).to_std().unwrap_or_default();
            if idle <= idle_timeout {
                continue;
            }
            info!(
                session_id = %session.id,
                idle_secs = idle.as_secs(),
                "terminating idle file session"
            );
            match self.terminate_session(&session.id).await {
                Ok(()) => terminated.push(session.id),
                Err(e) => warn!(session_id = %session.id, error = %e, "idle termination failed"),
            }
        }

        Ok(terminated)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("registry", &self.registry)
            .field("platform", &self.platform)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
