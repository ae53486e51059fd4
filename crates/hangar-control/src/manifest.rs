//! On-disk manifest store.
//!
//! One YAML file per deployment under `<root>/manifests/<type>/`. The
//! enabled flag is the file name itself: `<name>.yaml` is enabled,
//! `disabled-<name>.yaml` is disabled.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{Deployment, DeploymentType, Manifest};

const DISABLED_PREFIX: &str = "disabled-";
const MANIFEST_EXTENSION: &str = ".yaml";
const MAX_NAME_LEN: usize = 63;
/// Names taken by fixed routes under `/deployments/`.
const RESERVED_NAMES: &[&str] = &["apply"];

/// Check that `name` can be used as a deployment name.
///
/// Names must be DNS labels since they end up in resource names and label
/// values, may not start with the disabled prefix, and may not shadow a
/// fixed API route.
pub fn validate_name(name: &str) -> ControlResult<()> {
    let bytes = name.as_bytes();
    let valid_chars = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
    let valid_edges = matches!(
        (bytes.first(), bytes.last()),
        (Some(first), Some(last)) if first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
    );

    if name.len() <= MAX_NAME_LEN
        && valid_chars
        && valid_edges
        && !name.starts_with(DISABLED_PREFIX)
        && !RESERVED_NAMES.contains(&name)
    {
        Ok(())
    } else {
        Err(ControlError::InvalidName(name.to_owned()))
    }
}

/// Split a manifest file name into the deployment name and enabled flag.
fn parse_file_name(file_name: &str) -> Option<(String, bool)> {
    let stem = file_name.strip_suffix(MANIFEST_EXTENSION)?;
    let (name, enabled) = match stem.strip_prefix(DISABLED_PREFIX) {
        Some(rest) => (rest, false),
        None => (stem, true),
    };
    validate_name(name).ok()?;
    Some((name.to_owned(), enabled))
}

/// Rewrite the first `name:` and `dataDirectory:` lines of a template,
/// keeping indentation and every other line untouched.
fn patch_template(template: &str, name: &str) -> String {
    let mut patched_name = false;
    let mut patched_data_dir = false;

    let mut lines: Vec<String> = template
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let indent = &line[..line.len() - trimmed.len()];
            if !patched_name && trimmed.starts_with("name:") {
                patched_name = true;
                format!("{indent}name: {name}")
            } else if !patched_data_dir && trimmed.starts_with("dataDirectory:") {
                patched_data_dir = true;
                format!("{indent}dataDirectory: {name}")
            } else {
                line.to_owned()
            }
        })
        .collect();

    if template.ends_with('\n') {
        lines.push(String::new());
    }
    lines.join("\n")
}

fn file_name(name: &str, enabled: bool) -> String {
    if enabled {
        format!("{name}{MANIFEST_EXTENSION}")
    } else {
        format!("{DISABLED_PREFIX}{name}{MANIFEST_EXTENSION}")
    }
}

/// Reads and writes deployment manifests.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    storage: StorageConfig,
}

impl ManifestStore {
    /// Create a store over the given storage layout.
    #[must_use]
    pub const fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    /// The storage layout this store reads from.
    #[must_use]
    pub const fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Path a manifest for `name` has in the given state.
    #[must_use]
    pub fn manifest_path(
        &self,
        name: &str,
        deployment_type: DeploymentType,
        enabled: bool,
    ) -> PathBuf {
        self.storage
            .type_dir(deployment_type)
            .join(file_name(name, enabled))
    }

    /// Create a manifest for `name` from the type's default template.
    ///
    /// Returns the new manifest path.
    pub async fn create_manifest(
        &self,
        name: &str,
        deployment_type: DeploymentType,
    ) -> ControlResult<PathBuf> {
        validate_name(name)?;

        let path = self.manifest_path(name, deployment_type, true);
        let disabled_path = self.manifest_path(name, deployment_type, false);
        if tokio::fs::try_exists(&path).await? || tokio::fs::try_exists(&disabled_path).await? {
            return Err(ControlError::AlreadyExists(name.to_owned()));
        }

        let template_path = self.storage.template_path(deployment_type);
        let template = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ControlError::Config(format!(
                    "missing default template {}",
                    template_path.display()
                )),
                _ => ControlError::Io(e),
            })?;

        tokio::fs::create_dir_all(self.storage.type_dir(deployment_type)).await?;
        tokio::fs::write(&path, patch_template(&template, name)).await?;

        info!(
            deployment = %name,
            r#type = %deployment_type,
            path = %path.display(),
            "manifest created"
        );
        Ok(path)
    }

    /// Load every manifest across all type directories.
    ///
    /// Directories are created when missing. Files that are not manifests
    /// or fail to parse are skipped. When a name appears more than once the
    /// first occurrence, in type then file name order, wins.
    pub async fn get_all_manifests(&self) -> ControlResult<Vec<Manifest>> {
        let mut manifests = Vec::new();
        let mut seen = HashSet::new();

        for deployment_type in DeploymentType::ALL {
            let dir = self.storage.type_dir(deployment_type);
            tokio::fs::create_dir_all(&dir).await?;

            let mut entries = tokio::fs::read_dir(&dir).await?;
            let mut paths = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    paths.push(entry.path());
                }
            }
            paths.sort();

            for path in paths {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !file_name.ends_with(MANIFEST_EXTENSION) {
                    debug!(path = %path.display(), "skipping non-manifest file");
                    continue;
                }
                let Some((name, enabled)) = parse_file_name(file_name) else {
                    warn!(path = %path.display(), "skipping manifest with invalid name");
                    continue;
                };
                if seen.contains(&name) {
                    warn!(
                        deployment = %name,
                        path = %path.display(),
                        "duplicate manifest name, keeping first occurrence"
                    );
                    continue;
                }

                match read_manifest(&path, name.clone(), enabled, deployment_type).await {
                    Ok(manifest) => {
                        seen.insert(name);
                        manifests.push(manifest);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable manifest");
                    }
                }
            }
        }

        Ok(manifests)
    }

    /// Read and parse the manifest backing a deployment.
    pub async fn load(&self, deployment: &Deployment) -> ControlResult<Manifest> {
        read_manifest(
            &deployment.path,
            deployment.name.clone(),
            deployment.enabled,
            deployment.deployment_type,
        )
        .await
    }

    /// Raw manifest text.
    pub async fn get_content(&self, deployment: &Deployment) -> ControlResult<String> {
        Ok(tokio::fs::read_to_string(&deployment.path).await?)
    }

    /// Overwrite the manifest text. The shape is not validated here.
    pub async fn update_content(&self, deployment: &Deployment, content: &str) -> ControlResult<()> {
        tokio::fs::write(&deployment.path, content).await?;
        debug!(deployment = %deployment.name, "manifest content updated");
        Ok(())
    }

    /// Rename the manifest into the enabled or disabled form.
    ///
    /// Returns the resulting path. Concurrent toggles of the same
    /// deployment are not serialised here.
    pub async fn set_enabled(&self, deployment: &Deployment, enabled: bool) -> ControlResult<PathBuf> {
        let from = self.manifest_path(&deployment.name, deployment.deployment_type, !enabled);
        let to = self.manifest_path(&deployment.name, deployment.deployment_type, enabled);

        if !tokio::fs::try_exists(&from).await? && tokio::fs::try_exists(&to).await? {
            debug!(deployment = %deployment.name, enabled, "manifest already in requested state");
            return Ok(to);
        }

        tokio::fs::rename(&from, &to).await?;
        info!(deployment = %deployment.name, enabled, "manifest state changed");
        Ok(to)
    }

    /// Remove the manifest file.
    pub async fn delete_manifest(&self, deployment: &Deployment) -> ControlResult<()> {
        tokio::fs::remove_file(&deployment.path)
            .await
            .map_err(|source| ControlError::DeleteFailed {
                path: deployment.path.display().to_string(),
                source,
            })?;
        info!(deployment = %deployment.name, "manifest deleted");
        Ok(())
    }
}

async fn read_manifest(
    path: &Path,
    name: String,
    enabled: bool,
    deployment_type: DeploymentType,
) -> ControlResult<Manifest> {
    let raw = tokio::fs::read_to_string(path).await?;
    let content = serde_yaml::from_str(&raw).map_err(|e| ControlError::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(Manifest {
        name,
        path: path.to_path_buf(),
        content,
        enabled,
        deployment_type,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
name: template
dataDirectory: template
scaling:
  replicas: 1
  name: nested
";

    async fn store_with_templates() -> (tempfile::TempDir, ManifestStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig::at(dir.path());
        let defaults = dir.path().join("defaults");
        tokio::fs::create_dir_all(&defaults).await.unwrap();
        for t in DeploymentType::ALL {
            tokio::fs::write(defaults.join(format!("{}.yaml", t.id())), TEMPLATE)
                .await
                .unwrap();
        }
        (dir, ManifestStore::new(storage))
    }

    fn deployment_for(manifest: &Manifest) -> Deployment {
        Deployment::from(manifest)
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("lobby").is_ok());
        assert!(validate_name("survival-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("Lobby").is_err());
        assert!(validate_name("-lobby").is_err());
        assert!(validate_name("lobby-").is_err());
        assert!(validate_name("lobby.yaml").is_err());
        assert!(validate_name("disabled-lobby").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
        assert!(validate_name("apply").is_err());
        assert!(validate_name("apply-2").is_ok());
    }

    #[test]
    fn file_name_parsing() {
        assert_eq!(parse_file_name("lobby.yaml"), Some(("lobby".into(), true)));
        assert_eq!(
            parse_file_name("disabled-lobby.yaml"),
            Some(("lobby".into(), false))
        );
        assert_eq!(parse_file_name("lobby.yml"), None);
        assert_eq!(parse_file_name("Bad Name.yaml"), None);
    }

    #[test]
    fn template_patch_keeps_other_lines() {
        let patched = patch_template("  name: x\nother: 1\n  dataDirectory: y\nname: z\n", "lobby");
        assert_eq!(
            patched,
            "  name: lobby\nother: 1\n  dataDirectory: lobby\nname: z\n"
        );
    }

    #[tokio::test]
    async fn create_then_load() {
        let (_dir, store) = store_with_templates().await;

        let path = store
            .create_manifest("lobby", DeploymentType::Scalable)
            .await
            .unwrap();
        assert!(path.ends_with("manifests/scalable/lobby.yaml"));

        let manifests = store.get_all_manifests().await.unwrap();
        assert_eq!(manifests.len(), 1);
        let manifest = &manifests[0];
        assert_eq!(manifest.name, "lobby");
        assert!(manifest.enabled);
        assert_eq!(manifest.deployment_type, DeploymentType::Scalable);
        assert_eq!(manifest.data_directory(), "lobby");
        assert_eq!(
            manifest.content["scaling"]["name"].as_str(),
            Some("nested")
        );
    }

    #[tokio::test]
    async fn create_rejects_existing() {
        let (_dir, store) = store_with_templates().await;

        store
            .create_manifest("lobby", DeploymentType::Proxy)
            .await
            .unwrap();
        let err = store
            .create_manifest("lobby", DeploymentType::Proxy)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn scan_skips_junk_and_duplicates() {
        let (dir, store) = store_with_templates().await;
        let storage = StorageConfig::at(dir.path());

        store
            .create_manifest("lobby", DeploymentType::Proxy)
            .await
            .unwrap();
        let scalable = storage.type_dir(DeploymentType::Scalable);
        tokio::fs::create_dir_all(&scalable).await.unwrap();
        tokio::fs::write(scalable.join("lobby.yaml"), "name: lobby\n")
            .await
            .unwrap();
        tokio::fs::write(scalable.join("notes.txt"), "hello").await.unwrap();
        tokio::fs::write(scalable.join("Bad Name.yaml"), "a: 1").await.unwrap();
        tokio::fs::write(scalable.join("broken.yaml"), "a: [1, 2")
            .await
            .unwrap();

        let manifests = store.get_all_manifests().await.unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].deployment_type, DeploymentType::Proxy);
    }

    #[tokio::test]
    async fn toggling_enabled_twice_restores_path() {
        let (_dir, store) = store_with_templates().await;
        let original = store
            .create_manifest("lobby", DeploymentType::Persistent)
            .await
            .unwrap();
        let manifests = store.get_all_manifests().await.unwrap();
        let mut deployment = deployment_for(&manifests[0]);

        let disabled = store.set_enabled(&deployment, false).await.unwrap();
        assert!(disabled.ends_with("disabled-lobby.yaml"));
        assert!(!tokio::fs::try_exists(&original).await.unwrap());
        deployment.path = disabled;
        deployment.enabled = false;

        let enabled = store.set_enabled(&deployment, true).await.unwrap();
        assert_eq!(enabled, original);

        let manifests = store.get_all_manifests().await.unwrap();
        assert!(manifests[0].enabled);
    }

    #[tokio::test]
    async fn content_round_trip_and_delete() {
        let (_dir, store) = store_with_templates().await;
        store
            .create_manifest("lobby", DeploymentType::Process)
            .await
            .unwrap();
        let manifests = store.get_all_manifests().await.unwrap();
        let deployment = deployment_for(&manifests[0]);

        store
            .update_content(&deployment, "name: lobby\nqueue:\n  size: 4\n")
            .await
            .unwrap();
        assert_eq!(
            store.get_content(&deployment).await.unwrap(),
            "name: lobby\nqueue:\n  size: 4\n"
        );
        let manifest = store.load(&deployment).await.unwrap();
        assert_eq!(manifest.content["queue"]["size"].as_u64(), Some(4));

        store.delete_manifest(&deployment).await.unwrap();
        let err = store.delete_manifest(&deployment).await.unwrap_err();
        assert!(matches!(err, ControlError::DeleteFailed { .. }));
    }
}
