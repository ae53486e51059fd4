//! Hangar control plane.
//!
//! Two lifecycles are managed here:
//!
//! - **Deployments**: one manifest file per deployment, registered in
//!   process memory and converged onto the cluster through named infra
//!   stacks. The enabled flag is persisted as the manifest file name.
//! - **File-edit sessions**: ephemeral pods mounting a deployment's volume,
//!   recorded in the shared key-value store so any instance can serve
//!   them, and swept once idle.
//!
//! ```text
//!   HTTP API
//!      │
//!      ├──▶ DeploymentRegistry ──▶ ManifestStore
//!      │            │
//!      │            ▼
//!      │      InfraEngine ──▶ StackBackend
//!      │            ▲
//!      └──▶ SessionManager ──▶ SessionRegistry ──▶ KvBackend
//!                   ▲
//!             SessionSweeper
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod infra;
pub mod manifest;
pub mod registry;
pub mod retry;
pub mod session;
pub mod types;

// Re-export commonly used types at the crate root
pub use cluster::{ClusterApi, KubectlCluster, ManifestSftpDirectory, MockCluster, SftpDirectory};
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use events::{ControlEvent, EventEmitter};
pub use infra::{
    ClusterStackBackend, InfraEngine, KvStackBackend, ProcessRunner, ProgramBuilder,
    StackApplyEngine, StackBackend,
};
pub use manifest::ManifestStore;
pub use registry::{DeploymentRegistry, LocalDeploymentRegistry};
pub use retry::{Backoff, RetryPolicy};
pub use session::{SessionDeps, SessionManager, SessionRegistry, SessionSweeper};
pub use types::{
    ChangeSummary, Deployment, DeploymentType, FileEditSession, InfraApplyResult, Manifest,
    SessionStatus, SftpCredentials,
};
