//! Infra apply engine.
//!
//! Translates manifests and session pods into desired-state programs and
//! converges named stacks onto them through a [`StackBackend`]. Teardown
//! is always an apply of an empty program against the same stack.

mod cluster_stack;
mod engine;
pub mod program;
pub mod stack;

pub use cluster_stack::{ClusterStackBackend, CommandRunner, ProcessRunner, STACK_LABEL};
pub use engine::StackApplyEngine;
pub use program::{ChartCatalog, Program, ProgramBuilder, Resource, ResourceKind, SessionPod};
pub use stack::{KvStackBackend, StackBackend};

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::types::{ChangeSummary, DeploymentType, InfraApplyResult, Manifest};

/// Stack holding every enabled manifest of a type.
#[must_use]
pub fn bulk_stack_name(deployment_type: DeploymentType) -> String {
    format!("{}-deployments", deployment_type.id())
}

/// Stack holding a single deployment.
#[must_use]
pub fn single_stack_name(name: &str, deployment_type: DeploymentType) -> String {
    format!("{}-{name}", deployment_type.id())
}

/// Stack holding a file-edit session pod.
#[must_use]
pub fn session_stack_name(session_id: &str) -> String {
    format!("file-session-{session_id}")
}

/// The operations the registries need from the infra layer.
#[async_trait]
pub trait InfraEngine: Send + Sync {
    /// Reconcile every enabled manifest, one stack per type.
    ///
    /// A failure in any type aborts the call and is reported as a failed
    /// result with no summary.
    async fn apply_all(&self, manifests: &[Manifest]) -> InfraApplyResult;

    /// Reconcile one manifest on its own stack. A disabled manifest
    /// renders nothing, which tears its resources down.
    async fn apply_single(&self, manifest: &Manifest) -> ControlResult<ChangeSummary>;

    /// Remove everything previously applied for one deployment.
    async fn destroy_single(
        &self,
        name: &str,
        deployment_type: DeploymentType,
    ) -> ControlResult<ChangeSummary>;

    /// Stand up a file-edit session pod.
    async fn create_file_session(&self, pod: &SessionPod) -> ControlResult<ChangeSummary>;

    /// Tear down a file-edit session pod.
    async fn destroy_file_session(&self, session_id: &str) -> ControlResult<ChangeSummary>;
}
