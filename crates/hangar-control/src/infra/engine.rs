//! Stack-backed implementation of [`InfraEngine`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::program::{Program, ProgramBuilder, SessionPod};
use super::stack::StackBackend;
use super::{bulk_stack_name, session_stack_name, single_stack_name, InfraEngine};
use crate::error::{ControlError, ControlResult};
use crate::types::{ChangeSummary, DeploymentType, InfraApplyResult, Manifest};

/// Infra engine that drives a [`StackBackend`].
pub struct StackApplyEngine {
    backend: Arc<dyn StackBackend>,
    programs: ProgramBuilder,
}

impl StackApplyEngine {
    pub fn new(backend: Arc<dyn StackBackend>, programs: ProgramBuilder) -> Self {
        Self { backend, programs }
    }

    /// Select the stack, preview for the log, then apply.
    async fn converge(&self, stack: &str, program: &Program) -> ControlResult<ChangeSummary> {
        let wrap = |e: ControlError| match e {
            e @ ControlError::ApplyFailed { .. } => e,
            e => ControlError::apply_failed(stack, e),
        };

        self.backend.select_or_create(stack).await.map_err(wrap)?;

        let preview = self.backend.preview(stack, program).await.map_err(wrap)?;
        info!(
            stack = %stack,
            resources = program.len(),
            create = preview.created,
            update = preview.updated,
            delete = preview.deleted,
            same = preview.unchanged,
            "stack preview"
        );

        let summary = self.backend.up(stack, program).await.map_err(wrap)?;
        debug!(stack = %stack, ?summary, "stack applied");
        Ok(summary)
    }

    async fn apply_all_types(&self, manifests: &[Manifest]) -> ControlResult<ChangeSummary> {
        let mut total = ChangeSummary::default();
        for deployment_type in DeploymentType::ALL {
            let stack = bulk_stack_name(deployment_type);
            let of_type: Vec<&Manifest> = manifests
                .iter()
                .filter(|m| m.deployment_type == deployment_type)
                .collect();
            let program = self
                .programs
                .build(&of_type)
                .await
                .map_err(|e| ControlError::apply_failed(&stack, e))?;
            total.absorb(self.converge(&stack, &program).await?);
        }
        Ok(total)
    }
}

impl std::fmt::Debug for StackApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackApplyEngine")
            .field("programs", &self.programs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InfraEngine for StackApplyEngine {
    async fn apply_all(&self, manifests: &[Manifest]) -> InfraApplyResult {
        let result = self.apply_all_types(manifests).await;
        match &result {
            Ok(summary) => info!(?summary, "applied all deployments"),
            Err(e) => tracing::error!(error = %e, "apply of all deployments failed"),
        }
        result.into()
    }

    async fn apply_single(&self, manifest: &Manifest) -> ControlResult<ChangeSummary> {
        let stack = single_stack_name(&manifest.name, manifest.deployment_type);
        let program = self
            .programs
            .build(&[manifest])
            .await
            .map_err(|e| ControlError::apply_failed(&stack, e))?;
        self.converge(&stack, &program).await
    }

    async fn destroy_single(
        &self,
        name: &str,
        deployment_type: DeploymentType,
    ) -> ControlResult<ChangeSummary> {
        let stack = single_stack_name(name, deployment_type);
        self.converge(&stack, &Program::empty()).await
    }

    async fn create_file_session(&self, pod: &SessionPod) -> ControlResult<ChangeSummary> {
        let stack = session_stack_name(&pod.session_id);
        self.converge(&stack, &pod.program()).await
    }

    async fn destroy_file_session(&self, session_id: &str) -> ControlResult<ChangeSummary> {
        let stack = session_stack_name(session_id);
        self.converge(&stack, &Program::empty()).await
    }
}
