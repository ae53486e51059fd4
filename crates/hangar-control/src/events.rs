//! Outbound notifications.
//!
//! Fire-and-forget: a failed publish is logged and otherwise ignored.
//! Nothing here subscribes.

use std::sync::Arc;

use hangar_state::PubSubBackend;
use serde::Serialize;

use crate::types::SessionStatus;

/// Channel carrying deployment create/delete notifications.
pub const DEPLOYMENT_MODIFIED: &str = "deployment-modified";

/// Channel carrying file-edit session status changes.
pub const FILE_SYNC: &str = "file-sync";

/// Payload published on [`DEPLOYMENT_MODIFIED`] after a create.
pub const CREATE_PAYLOAD: &str = "create";

/// Events the control plane publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// `"create"` after a create, the deployment name after a delete.
    DeploymentModified(String),
    /// A file-edit session changed status.
    FileSyncChanged {
        session_id: String,
        status: SessionStatus,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSyncPayload<'a> {
    session_id: &'a str,
    status: SessionStatus,
}

impl ControlEvent {
    /// Channel this event is published on.
    #[must_use]
    pub const fn channel(&self) -> &'static str {
        match self {
            Self::DeploymentModified(_) => DEPLOYMENT_MODIFIED,
            Self::FileSyncChanged { .. } => FILE_SYNC,
        }
    }

    /// Wire payload.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::DeploymentModified(payload) => Ok(payload.clone()),
            Self::FileSyncChanged { session_id, status } => {
                serde_json::to_string(&FileSyncPayload {
                    session_id,
                    status: *status,
                })
            }
        }
    }
}

/// Publishes [`ControlEvent`]s.
#[derive(Clone)]
pub struct EventEmitter {
    pubsub: Arc<dyn PubSubBackend>,
}

impl EventEmitter {
    pub fn new(pubsub: Arc<dyn PubSubBackend>) -> Self {
        Self { pubsub }
    }

    /// Publish an event. Never fails.
    pub async fn emit(&self, event: ControlEvent) {
        let channel = event.channel();
        let payload = match event.payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(channel, error = %e, "failed to encode event");
                return;
            }
        };

        match self.pubsub.publish(channel, &payload).await {
            Ok(receivers) => tracing::debug!(channel, receivers, "event published"),
            Err(e) => tracing::warn!(channel, error = %e, "failed to publish event"),
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}
