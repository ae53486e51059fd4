//! Stack backend that changes the cluster.
//!
//! Chart releases go through `helm upgrade --install`, bare pods through
//! `kubectl apply`. The digest ledger from [`KvStackBackend`] decides what
//! changed; it is only written once every cluster call succeeded, so a
//! failed converge is retried in full by the next one.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hangar_state::KvBackend;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, info};

use super::program::{Program, Resource, ResourceKind};
use super::stack::{KvStackBackend, StackBackend};
use crate::config::PlatformConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::ChangeSummary;

/// Label tying cluster objects to the stack that created them.
pub const STACK_LABEL: &str = "hangar.dev/stack";

/// Runs one CLI invocation to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `input` on stdin. Fails on a
    /// non-zero exit.
    async fn run(&self, program: &Path, args: &[String], input: Option<&[u8]>)
        -> ControlResult<()>;
}

/// [`CommandRunner`] that spawns real processes under a deadline.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    deadline: Duration,
}

impl ProcessRunner {
    #[must_use]
    pub const fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        input: Option<&[u8]>,
    ) -> ControlResult<()> {
        let tool = program.display();
        let mut cmd = TokioCommand::new(program);
        cmd.args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(tool = %tool, ?args, "running");
        let mut child = cmd
            .spawn()
            .map_err(|e| ControlError::cluster(format!("failed to spawn {tool}: {e}")))?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(input)
                .await
                .map_err(|e| ControlError::cluster(format!("failed to write to {tool}: {e}")))?;
        }

        let output = timeout(self.deadline, child.wait_with_output())
            .await
            .map_err(|_| ControlError::cluster(format!("{tool} {args:?} timed out")))?
            .map_err(|e| ControlError::cluster(format!("{tool} did not finish: {e}")))?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(ControlError::cluster(format!(
                "{tool} {} failed (exit code {code}): {}",
                args.first().map_or("", String::as_str),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// What a recorded urn points at in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target<'a> {
    Release(&'a str),
    Pod { namespace: &'a str, name: &'a str },
}

/// Chart releases are `<type>/<name>`, pods `pod/<namespace>/<name>`.
fn target(urn: &str) -> ControlResult<Target<'_>> {
    let mut parts = urn.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("pod"), Some(namespace), Some(name), None) => Ok(Target::Pod { namespace, name }),
        (Some(kind), Some(name), None, None) if kind != "pod" && !name.is_empty() => {
            Ok(Target::Release(name))
        }
        _ => Err(ControlError::internal(format!("unrecognised resource urn {urn}"))),
    }
}

/// Kubernetes object for a session pod resource.
fn pod_object(stack: &str, values: &Value) -> Value {
    let mut labels = values["labels"].clone();
    if let Value::Object(map) = &mut labels {
        map.insert(STACK_LABEL.to_owned(), Value::String(stack.to_owned()));
    }
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": values["name"],
            "namespace": values["namespace"],
            "labels": labels,
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [{
                "name": "files",
                "image": values["image"],
                "volumeMounts": [{
                    "name": "data",
                    "mountPath": values["volume"]["mountPath"],
                }],
            }],
            "volumes": [{
                "name": "data",
                "persistentVolumeClaim": { "claimName": values["volume"]["claimName"] },
            }],
        },
    })
}

/// Stack backend applying programs to the cluster with `helm` and `kubectl`.
pub struct ClusterStackBackend {
    ledger: KvStackBackend,
    runner: Arc<dyn CommandRunner>,
    kubectl: PathBuf,
    helm: PathBuf,
    namespace: String,
}

impl ClusterStackBackend {
    pub fn new(
        kv: Arc<dyn KvBackend>,
        runner: Arc<dyn CommandRunner>,
        platform: &PlatformConfig,
    ) -> Self {
        Self {
            ledger: KvStackBackend::new(kv),
            runner,
            kubectl: platform.kubectl.clone(),
            helm: platform.helm.clone(),
            namespace: platform.namespace.clone(),
        }
    }

    async fn apply(&self, stack: &str, resource: &Resource) -> ControlResult<()> {
        match (&resource.kind, target(&resource.urn)?) {
            (ResourceKind::ChartRelease { chart }, Target::Release(release)) => {
                let values = serde_json::to_vec(&resource.values)?;
                let args = vec![
                    "upgrade".to_owned(),
                    "--install".to_owned(),
                    release.to_owned(),
                    chart.display().to_string(),
                    "--namespace".to_owned(),
                    self.namespace.clone(),
                    "--values".to_owned(),
                    "-".to_owned(),
                ];
                self.runner.run(&self.helm, &args, Some(&values)).await
            }
            (ResourceKind::Pod, Target::Pod { .. }) => {
                let object = serde_json::to_vec(&pod_object(stack, &resource.values))?;
                let args = vec!["apply".to_owned(), "-f".to_owned(), "-".to_owned()];
                self.runner.run(&self.kubectl, &args, Some(&object)).await
            }
            _ => Err(ControlError::internal(format!(
                "resource {} does not match its kind",
                resource.urn
            ))),
        }
    }

    async fn remove(&self, urn: &str) -> ControlResult<()> {
        match target(urn)? {
            Target::Release(release) => {
                let args = vec![
                    "uninstall".to_owned(),
                    release.to_owned(),
                    "--namespace".to_owned(),
                    self.namespace.clone(),
                    "--ignore-not-found".to_owned(),
                ];
                self.runner.run(&self.helm, &args, None).await
            }
            Target::Pod { namespace, name } => {
                let args = vec![
                    "delete".to_owned(),
                    "pod".to_owned(),
                    name.to_owned(),
                    "--namespace".to_owned(),
                    namespace.to_owned(),
                    "--ignore-not-found".to_owned(),
                    "--wait=false".to_owned(),
                ];
                self.runner.run(&self.kubectl, &args, None).await
            }
        }
    }
}

impl std::fmt::Debug for ClusterStackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterStackBackend")
            .field("kubectl", &self.kubectl)
            .field("helm", &self.helm)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StackBackend for ClusterStackBackend {
    async fn select_or_create(&self, stack: &str) -> ControlResult<()> {
        self.ledger.select_or_create(stack).await
    }

    async fn preview(&self, stack: &str, program: &Program) -> ControlResult<ChangeSummary> {
        self.ledger.preview(stack, program).await
    }

    async fn up(&self, stack: &str, program: &Program) -> ControlResult<ChangeSummary> {
        let plan = self.ledger.plan(stack, program).await?;

        for resource in program
            .resources()
            .iter()
            .filter(|r| plan.changed.contains(&r.urn))
        {
            self.apply(stack, resource).await?;
            info!(stack = %stack, urn = %resource.urn, "resource applied");
        }
        for urn in &plan.removed {
            self.remove(urn).await?;
            info!(stack = %stack, urn = %urn, "resource removed");
        }

        self.ledger.up(stack, program).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use hangar_state::MemoryKv;

    use super::*;
    use crate::infra::program::SessionPod;

    #[derive(Debug, Clone, PartialEq)]
    struct Invocation {
        tool: String,
        args: Vec<String>,
        input: Option<Value>,
    }

    /// Records every invocation, optionally failing them all.
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Invocation>>,
        fail: bool,
    }

    impl RecordingRunner {
        fn take(&self) -> Vec<Invocation> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(
            &self,
            program: &Path,
            args: &[String],
            input: Option<&[u8]>,
        ) -> ControlResult<()> {
            self.calls.lock().unwrap().push(Invocation {
                tool: program.display().to_string(),
                args: args.to_vec(),
                input: input.map(|raw| serde_json::from_slice(raw).unwrap()),
            });
            if self.fail {
                return Err(ControlError::cluster("connection refused"));
            }
            Ok(())
        }
    }

    fn backend(runner: Arc<RecordingRunner>) -> (Arc<MemoryKv>, ClusterStackBackend) {
        let kv = Arc::new(MemoryKv::new());
        let backend = ClusterStackBackend::new(kv.clone(), runner, &PlatformConfig::default());
        (kv, backend)
    }

    fn release(name: &str, replicas: u32) -> Resource {
        Resource {
            urn: format!("scalable/{name}"),
            kind: ResourceKind::ChartRelease {
                chart: PathBuf::from("/srv/charts/scalable"),
            },
            values: json!({ "name": name, "scaling": { "replicas": replicas } }),
        }
    }

    fn session_pod() -> SessionPod {
        SessionPod {
            session_id: "abc123".into(),
            deployment_name: "lobby".into(),
            pod_name: "lobby-files-abc123".into(),
            pvc_name: "data-lobby-0".into(),
            namespace: "hangar".into(),
            image: "atmoz/sftp:alpine".into(),
        }
    }

    #[test]
    fn urns_resolve_to_targets() {
        assert_eq!(target("scalable/lobby").unwrap(), Target::Release("lobby"));
        assert_eq!(
            target("pod/hangar/lobby-files-1").unwrap(),
            Target::Pod {
                namespace: "hangar",
                name: "lobby-files-1"
            }
        );
        assert!(target("lobby").is_err());
        assert!(target("a/b/c").is_err());
        assert!(target("pod/lobby").is_err());
    }

    #[tokio::test]
    async fn chart_release_is_installed_once() {
        let runner = Arc::new(RecordingRunner::default());
        let (_kv, backend) = backend(runner.clone());
        let mut program = Program::empty();
        program.push(release("lobby", 2));

        let summary = backend.up("scalable-lobby", &program).await.unwrap();
        assert_eq!(summary.created, 1);

        let calls = runner.take();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "helm");
        assert_eq!(
            calls[0].args,
            [
                "upgrade",
                "--install",
                "lobby",
                "/srv/charts/scalable",
                "--namespace",
                "hangar",
                "--values",
                "-"
            ]
        );
        assert_eq!(calls[0].input.as_ref().unwrap()["scaling"]["replicas"], 2);

        let summary = backend.up("scalable-lobby", &program).await.unwrap();
        assert_eq!(summary.unchanged, 1);
        assert!(runner.take().is_empty());
    }

    #[tokio::test]
    async fn session_pod_is_applied_and_deleted() {
        let runner = Arc::new(RecordingRunner::default());
        let (_kv, backend) = backend(runner.clone());

        backend
            .up("file-session-abc123", &session_pod().program())
            .await
            .unwrap();
        let calls = runner.take();
        assert_eq!(calls[0].tool, "kubectl");
        assert_eq!(calls[0].args, ["apply", "-f", "-"]);
        let object = calls[0].input.as_ref().unwrap();
        assert_eq!(object["kind"], "Pod");
        assert_eq!(object["metadata"]["labels"][STACK_LABEL], "file-session-abc123");
        assert_eq!(object["metadata"]["labels"]["app"], "lobby");
        assert_eq!(
            object["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"],
            "data-lobby-0"
        );

        let summary = backend
            .up("file-session-abc123", &Program::empty())
            .await
            .unwrap();
        assert_eq!(summary.deleted, 1);
        let calls = runner.take();
        assert_eq!(
            calls[0].args,
            [
                "delete",
                "pod",
                "lobby-files-abc123",
                "--namespace",
                "hangar",
                "--ignore-not-found",
                "--wait=false"
            ]
        );
    }

    #[tokio::test]
    async fn failed_command_leaves_ledger_untouched() {
        let runner = Arc::new(RecordingRunner {
            fail: true,
            ..RecordingRunner::default()
        });
        let (kv, backend) = backend(runner);
        let mut program = Program::empty();
        program.push(release("lobby", 1));

        let err = backend.up("scalable-lobby", &program).await.unwrap_err();
        assert!(matches!(err, ControlError::Cluster(_)));
        assert!(!kv.exists("stack:scalable-lobby").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_release_is_uninstalled() {
        let runner = Arc::new(RecordingRunner::default());
        let (_kv, backend) = backend(runner.clone());
        let mut program = Program::empty();
        program.push(release("lobby", 1));
        program.push(release("hub", 1));
        backend.up("scalable-deployments", &program).await.unwrap();
        runner.take();

        let mut program = Program::empty();
        program.push(release("lobby", 1));
        backend.up("scalable-deployments", &program).await.unwrap();

        let calls = runner.take();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args,
            ["uninstall", "hub", "--namespace", "hangar", "--ignore-not-found"]
        );
    }
}
