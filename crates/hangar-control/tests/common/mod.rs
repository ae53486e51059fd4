//! Common test utilities for control plane integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hangar_control::api::AppState;
use hangar_control::config::{DeploymentsConfig, PlatformConfig, SessionsConfig, StorageConfig};
use hangar_control::infra::SessionPod;
use hangar_control::{
    ChangeSummary, ClusterApi, ControlError, ControlResult, Deployment, DeploymentRegistry,
    DeploymentType, EventEmitter, InfraApplyResult, InfraEngine, KvStackBackend,
    LocalDeploymentRegistry, Manifest, ManifestSftpDirectory, ManifestStore, MockCluster,
    ProgramBuilder, SessionDeps, SessionManager, SessionRegistry, StackApplyEngine,
};
use hangar_state::{FieldGuard, KvBackend, KvError, MemoryKv};
use tempfile::TempDir;

/// Complete control plane wired against in-memory collaborators.
pub struct TestControl {
    pub dir: TempDir,
    pub storage: StorageConfig,
    pub kv: Arc<MemoryKv>,
    pub stacks: Arc<KvStackBackend>,
    pub engine: Arc<StackApplyEngine>,
    pub cluster: Arc<MockCluster>,
    pub registry: Arc<LocalDeploymentRegistry>,
    pub session_registry: SessionRegistry,
    pub sessions: Arc<SessionManager>,
}

impl TestControl {
    /// Control plane where every pod becomes ready at once.
    pub async fn new() -> Self {
        Self::with_cluster(MockCluster::new()).await
    }

    pub async fn with_cluster(cluster: MockCluster) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = fixtures::write_storage_tree(dir.path()).await;
        let kv = Arc::new(MemoryKv::new());
        let stacks = Arc::new(KvStackBackend::new(kv.clone()));
        let cluster = Arc::new(cluster);
        let events = EventEmitter::new(kv.clone());
        let store = ManifestStore::new(storage.clone());

        let engine = Arc::new(StackApplyEngine::new(
            stacks.clone(),
            ProgramBuilder::new(&storage),
        ));
        let registry = Arc::new(LocalDeploymentRegistry::new(
            store.clone(),
            engine.clone(),
            events.clone(),
            &DeploymentsConfig {
                restart_settle_secs: 0,
                retry_attempts: 3,
                retry_backoff_ms: 1,
            },
        ));
        registry.load().await.unwrap();

        let session_registry = SessionRegistry::new(kv.clone(), sessions_config().record_ttl());
        let sessions = Arc::new(SessionManager::new(
            SessionDeps {
                registry: session_registry.clone(),
                deployments: registry.clone(),
                engine: engine.clone(),
                cluster: cluster.clone(),
                sftp: Arc::new(ManifestSftpDirectory::new(store)),
                events,
            },
            platform_config(),
            sessions_config(),
        ));

        Self {
            dir,
            storage,
            kv,
            stacks,
            engine,
            cluster,
            registry,
            session_registry,
            sessions,
        }
    }

    /// Session manager over this control plane's deployments, with the
    /// given collaborators swapped in.
    pub fn session_manager(
        &self,
        registry: SessionRegistry,
        engine: Arc<dyn InfraEngine>,
        cluster: Arc<dyn ClusterApi>,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            SessionDeps {
                registry,
                deployments: self.registry.clone(),
                engine,
                cluster,
                sftp: Arc::new(ManifestSftpDirectory::new(ManifestStore::new(
                    self.storage.clone(),
                ))),
                events: EventEmitter::new(self.kv.clone()),
            },
            platform_config(),
            sessions_config(),
        ))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            deployments: self.registry.clone(),
            sessions: self.sessions.clone(),
        }
    }

    /// Create a deployment with an SFTP port and one matching claim.
    pub async fn deployment_with_sftp(
        &self,
        name: &str,
        deployment_type: DeploymentType,
        port: u16,
    ) -> Deployment {
        self.registry.create(name, deployment_type).await.unwrap();
        let deployment = self
            .registry
            .update_content(name, &fixtures::manifest_with_sftp(name, port))
            .await
            .unwrap();
        self.cluster
            .add_pvc(&pvc_selector(name, deployment_type), &format!("data-{name}-0"))
            .unwrap();
        deployment
    }
}

fn sessions_config() -> SessionsConfig {
    SessionsConfig {
        ready_timeout_secs: 0,
        poll_interval_secs: 0,
        ..SessionsConfig::default()
    }
}

fn platform_config() -> PlatformConfig {
    PlatformConfig {
        host: "files.example.com".to_owned(),
        ..PlatformConfig::default()
    }
}

/// Engine that delegates to a real one but fails teardown of chosen
/// session pods.
pub struct FaultyEngine {
    inner: Arc<dyn InfraEngine>,
    failing_sessions: Mutex<HashSet<String>>,
}

impl FaultyEngine {
    pub fn new(inner: Arc<dyn InfraEngine>) -> Self {
        Self {
            inner,
            failing_sessions: Mutex::default(),
        }
    }

    pub fn fail_session_teardown(&self, session_id: &str) {
        self.failing_sessions
            .lock()
            .unwrap()
            .insert(session_id.to_owned());
    }
}

#[async_trait]
impl InfraEngine for FaultyEngine {
    async fn apply_all(&self, manifests: &[Manifest]) -> InfraApplyResult {
        self.inner.apply_all(manifests).await
    }

    async fn apply_single(&self, manifest: &Manifest) -> ControlResult<ChangeSummary> {
        self.inner.apply_single(manifest).await
    }

    async fn destroy_single(
        &self,
        name: &str,
        deployment_type: DeploymentType,
    ) -> ControlResult<ChangeSummary> {
        self.inner.destroy_single(name, deployment_type).await
    }

    async fn create_file_session(&self, pod: &SessionPod) -> ControlResult<ChangeSummary> {
        self.inner.create_file_session(pod).await
    }

    async fn destroy_file_session(&self, session_id: &str) -> ControlResult<ChangeSummary> {
        if self.failing_sessions.lock().unwrap().contains(session_id) {
            return Err(ControlError::apply_failed(
                format!("file-session-{session_id}"),
                "cluster unreachable",
            ));
        }
        self.inner.destroy_file_session(session_id).await
    }
}

/// Store that delegates to a [`MemoryKv`] but refuses to delete chosen keys.
pub struct StickyKv {
    inner: Arc<MemoryKv>,
    sticky: Mutex<HashSet<String>>,
}

impl StickyKv {
    pub fn new(inner: Arc<MemoryKv>) -> Self {
        Self {
            inner,
            sticky: Mutex::default(),
        }
    }

    pub fn refuse_delete(&self, key: &str) {
        self.sticky.lock().unwrap().insert(key.to_owned());
    }
}

#[async_trait]
impl KvBackend for StickyKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        self.inner.put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        if self.sticky.lock().unwrap().contains(key) {
            return Err(KvError::Backend(format!("delete of {key} refused")));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.inner.exists(key).await
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), KvError> {
        self.inner.list(prefix, limit, cursor).await
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        self.inner.hash_set(key, fields, ttl).await
    }

    async fn hash_update(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
        guard: Option<FieldGuard<'_>>,
    ) -> Result<bool, KvError> {
        self.inner.hash_update(key, fields, ttl, guard).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        self.inner.hash_get_all(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        self.inner.expire(key, ttl).await
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.inner.set_add(key, member, ttl).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
        self.inner.set_members(key).await
    }
}

/// Cluster that reports pods ready, but first tears the session's record
/// down behind the manager's back as a concurrent terminate would.
pub struct TerminatingCluster {
    registry: SessionRegistry,
    pub interrupted: Mutex<Option<String>>,
}

impl TerminatingCluster {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            interrupted: Mutex::default(),
        }
    }
}

#[async_trait]
impl ClusterApi for TerminatingCluster {
    async fn pod_ready(&self, name: &str, _namespace: &str) -> ControlResult<bool> {
        let sessions = self.registry.list_all().await?;
        if let Some(session) = sessions.into_iter().find(|s| s.pod_name == name) {
            self.registry
                .set_status(&session.id, hangar_control::SessionStatus::Terminating)
                .await?;
            self.registry.remove(&session).await?;
            *self.interrupted.lock().unwrap() = Some(session.id);
        }
        Ok(true)
    }

    async fn list_pvcs(&self, selector: &str, _namespace: &str) -> ControlResult<Vec<String>> {
        Ok(vec![format!("claim-for-{selector}")])
    }
}

/// Selector the session manager uses with the default platform label.
pub fn pvc_selector(name: &str, deployment_type: DeploymentType) -> String {
    format!("app={name},hangar.dev/type={}", deployment_type.id())
}
