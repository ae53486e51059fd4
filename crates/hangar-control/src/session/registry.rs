//! Session records in the shared key-value store.
//!
//! Layout:
//! - `file-session:<id>`: hash holding the record, with a TTL
//! - `file-session:by-deployment:<name>`: set of session ids
//! - `file-session:by-user:<user>`: set of session ids
//!
//! Credentials are never stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hangar_state::{FieldGuard, KvBackend};
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};
use crate::types::{FileEditSession, SessionStatus};

/// Prefix shared by every session key.
pub const SESSION_PREFIX: &str = "file-session:";
const BY_DEPLOYMENT_PREFIX: &str = "file-session:by-deployment:";
const BY_USER_PREFIX: &str = "file-session:by-user:";
const SCAN_PAGE: usize = 100;

fn session_key(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

fn deployment_index(name: &str) -> String {
    format!("{BY_DEPLOYMENT_PREFIX}{name}")
}

fn user_index(user_id: &str) -> String {
    format!("{BY_USER_PREFIX}{user_id}")
}

fn is_index_key(key: &str) -> bool {
    key.starts_with(BY_DEPLOYMENT_PREFIX) || key.starts_with(BY_USER_PREFIX)
}

fn to_fields(session: &FileEditSession) -> Vec<(String, String)> {
    vec![
        ("id".into(), session.id.clone()),
        ("deploymentName".into(), session.deployment_name.clone()),
        ("podName".into(), session.pod_name.clone()),
        ("pvcName".into(), session.pvc_name.clone()),
        ("userId".into(), session.user_id.clone()),
        (
            "createdAt".into(),
            session.created_at.timestamp_millis().to_string(),
        ),
        (
            "lastActivity".into(),
            session.last_activity.timestamp_millis().to_string(),
        ),
        ("status".into(), session.status.as_str().into()),
        ("namespace".into(), session.namespace.clone()),
    ]
}

fn from_fields(mut fields: HashMap<String, String>) -> ControlResult<FileEditSession> {
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| ControlError::Serialisation(format!("session record missing {name}")))
    };
    let millis = |raw: String, name: &str| -> ControlResult<DateTime<Utc>> {
        raw.parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| ControlError::Serialisation(format!("invalid {name}: {raw}")))
    };

    Ok(FileEditSession {
        id: take("id")?,
        deployment_name: take("deploymentName")?,
        pod_name: take("podName")?,
        pvc_name: take("pvcName")?,
        user_id: take("userId")?,
        created_at: millis(take("createdAt")?, "createdAt")?,
        last_activity: millis(take("lastActivity")?, "lastActivity")?,
        status: take("status")?
            .parse()
            .map_err(ControlError::Serialisation)?,
        namespace: take("namespace")?,
        sftp_credentials: None,
    })
}

/// Decode a record found while listing. A malformed record is logged
/// and left out so it cannot hide the others.
fn decode_listed(key: &str, fields: HashMap<String, String>) -> Option<FileEditSession> {
    match from_fields(fields) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(key = %key, error = %e, "skipping malformed session record");
            None
        }
    }
}

/// CRUD plus secondary indices for session records.
#[derive(Clone)]
pub struct SessionRegistry {
    kv: Arc<dyn KvBackend>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(kv: Arc<dyn KvBackend>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Write a record and add it to both indices.
    pub async fn put(&self, session: &FileEditSession) -> ControlResult<()> {
        self.kv
            .hash_set(&session_key(&session.id), &to_fields(session), Some(self.ttl))
            .await?;
        self.kv
            .set_add(
                &deployment_index(&session.deployment_name),
                &session.id,
                Some(self.ttl),
            )
            .await?;
        self.kv
            .set_add(&user_index(&session.user_id), &session.id, Some(self.ttl))
            .await?;
        Ok(())
    }

    /// Read a record. Credentials are left empty.
    pub async fn get(&self, id: &str) -> ControlResult<Option<FileEditSession>> {
        match self.kv.hash_get_all(&session_key(id)).await? {
            Some(fields) => Ok(Some(from_fields(fields)?)),
            None => Ok(None),
        }
    }

    /// Move a record to `status`.
    ///
    /// Returns false when the record is gone or its current status does
    /// not lead to `status`; the record is left untouched in both cases.
    pub async fn set_status(&self, id: &str, status: SessionStatus) -> ControlResult<bool> {
        let from: Vec<&str> = status
            .predecessors()
            .iter()
            .map(SessionStatus::as_str)
            .collect();
        let moved = self
            .kv
            .hash_update(
                &session_key(id),
                &[("status".to_owned(), status.as_str().to_owned())],
                Some(self.ttl),
                Some(FieldGuard {
                    field: "status",
                    one_of: &from,
                }),
            )
            .await?;
        Ok(moved)
    }

    /// Set `lastActivity` and refresh the TTL of the record and its
    /// indices. Returns false when the record is gone.
    pub async fn set_last_activity(&self, id: &str, at: DateTime<Utc>) -> ControlResult<bool> {
        let Some(session) = self.get(id).await? else {
            return Ok(false);
        };
        let touched = self
            .kv
            .hash_update(
                &session_key(id),
                &[(
                    "lastActivity".to_owned(),
                    at.timestamp_millis().to_string(),
                )],
                Some(self.ttl),
                None,
            )
            .await?;
        if !touched {
            return Ok(false);
        }
        self.kv
            .expire(&deployment_index(&session.deployment_name), self.ttl)
            .await?;
        self.kv.expire(&user_index(&session.user_id), self.ttl).await?;
        Ok(true)
    }

    /// Drop a record and its index entries.
    pub async fn remove(&self, session: &FileEditSession) -> ControlResult<()> {
        self.kv.delete(&session_key(&session.id)).await?;
        self.kv
            .set_remove(&deployment_index(&session.deployment_name), &session.id)
            .await?;
        self.kv
            .set_remove(&user_index(&session.user_id), &session.id)
            .await?;
        Ok(())
    }

    /// Every live record, found by prefix scan.
    pub async fn list_all(&self) -> ControlResult<Vec<FileEditSession>> {
        let mut sessions = Vec::new();
        let mut cursor = None;
        loop {
            let (keys, next) = self
                .kv
                .list(SESSION_PREFIX, SCAN_PAGE, cursor.as_deref())
                .await?;
            for key in keys.iter().filter(|k| !is_index_key(k)) {
                if let Some(fields) = self.kv.hash_get_all(key).await? {
                    sessions.extend(decode_listed(key, fields));
                }
            }
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(sessions)
    }

    /// Records for one deployment.
    pub async fn list_for_deployment(&self, name: &str) -> ControlResult<Vec<FileEditSession>> {
        self.resolve_index(&deployment_index(name)).await
    }

    /// Records for one user.
    pub async fn list_for_user(&self, user_id: &str) -> ControlResult<Vec<FileEditSession>> {
        self.resolve_index(&user_index(user_id)).await
    }

    /// Load every member of an index set, pruning ids whose record expired.
    async fn resolve_index(&self, index: &str) -> ControlResult<Vec<FileEditSession>> {
        let mut sessions = Vec::new();
        for id in self.kv.set_members(index).await? {
            let key = session_key(&id);
            match self.kv.hash_get_all(&key).await? {
                Some(fields) => sessions.extend(decode_listed(&key, fields)),
                None => {
                    debug!(index = %index, session_id = %id, "pruning dangling index entry");
                    self.kv.set_remove(index, &id).await?;
                }
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hangar_state::MemoryKv;

    fn session(id: &str, deployment: &str, user: &str) -> FileEditSession {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();
        FileEditSession {
            id: id.into(),
            deployment_name: deployment.into(),
            pod_name: FileEditSession::pod_name_for(deployment, id),
            pvc_name: format!("data-{deployment}-0"),
            user_id: user.into(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Creating,
            namespace: "hangar".into(),
            sftp_credentials: None,
        }
    }

    fn registry() -> (Arc<MemoryKv>, SessionRegistry) {
        let kv = Arc::new(MemoryKv::new());
        let registry = SessionRegistry::new(kv.clone(), Duration::from_secs(1800));
        (kv, registry)
    }

    #[tokio::test]
    async fn record_round_trips_through_hash() {
        let (kv, registry) = registry();
        let original = session("abc", "lobby", "user-42");
        registry.put(&original).await.unwrap();

        assert_eq!(registry.get("abc").await.unwrap(), Some(original));
        let raw = kv.hash_get_all("file-session:abc").await.unwrap().unwrap();
        assert_eq!(raw["createdAt"], "1700000000123");
        assert_eq!(raw["status"], "creating");
        assert!(!raw.contains_key("sftpCredentials"));
    }

    #[tokio::test]
    async fn status_and_activity_updates() {
        let (_kv, registry) = registry();
        registry.put(&session("abc", "lobby", "u")).await.unwrap();

        assert!(registry.set_status("abc", SessionStatus::Ready).await.unwrap());
        let later = Utc.timestamp_millis_opt(1_700_000_600_000).single().unwrap();
        assert!(registry.set_last_activity("abc", later).await.unwrap());

        let stored = registry.get("abc").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Ready);
        assert_eq!(stored.last_activity, later);

        assert!(!registry.set_status("missing", SessionStatus::Ready).await.unwrap());
        assert!(!registry.set_last_activity("missing", later).await.unwrap());
    }

    #[tokio::test]
    async fn status_moves_only_along_lifecycle() {
        let (_kv, registry) = registry();
        registry.put(&session("abc", "lobby", "u")).await.unwrap();

        assert!(registry.set_status("abc", SessionStatus::Ready).await.unwrap());
        assert!(!registry.set_status("abc", SessionStatus::Error).await.unwrap());
        assert!(registry.set_status("abc", SessionStatus::Terminating).await.unwrap());
        assert!(!registry.set_status("abc", SessionStatus::Ready).await.unwrap());

        let stored = registry.get("abc").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Terminating);
    }

    #[tokio::test]
    async fn updates_never_resurrect_a_removed_record() {
        let (kv, registry) = registry();
        let record = session("abc", "lobby", "u");
        registry.put(&record).await.unwrap();
        registry.remove(&record).await.unwrap();

        let later = Utc.timestamp_millis_opt(1_700_000_600_000).single().unwrap();
        assert!(!registry.set_last_activity("abc", later).await.unwrap());
        assert!(!registry.set_status("abc", SessionStatus::Terminating).await.unwrap());
        assert!(!kv.exists("file-session:abc").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_record_does_not_hide_others() {
        let (kv, registry) = registry();
        registry.put(&session("abc", "lobby", "u")).await.unwrap();
        kv.hash_set(
            "file-session:zzz",
            &[("lastActivity".into(), "1700000000000".into())],
            None,
        )
        .await
        .unwrap();
        kv.set_add("file-session:by-deployment:lobby", "zzz", None)
            .await
            .unwrap();

        let all = registry.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "abc");
        assert_eq!(registry.list_for_deployment("lobby").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn indices_and_scan() {
        let (kv, registry) = registry();
        registry.put(&session("a", "lobby", "u1")).await.unwrap();
        registry.put(&session("b", "lobby", "u2")).await.unwrap();
        registry.put(&session("c", "survival", "u1")).await.unwrap();

        assert_eq!(registry.list_all().await.unwrap().len(), 3);
        assert_eq!(registry.list_for_deployment("lobby").await.unwrap().len(), 2);
        assert_eq!(registry.list_for_user("u1").await.unwrap().len(), 2);

        // an expired record leaves a dangling index member behind
        kv.delete("file-session:c").await.unwrap();
        assert_eq!(registry.list_for_user("u1").await.unwrap().len(), 1);
        assert_eq!(kv.set_members("file-session:by-user:u1").await.unwrap(), vec!["a"]);

        let b = registry.get("b").await.unwrap().unwrap();
        registry.remove(&b).await.unwrap();
        assert!(registry.get("b").await.unwrap().is_none());
        assert_eq!(registry.list_for_deployment("lobby").await.unwrap().len(), 1);
        assert!(registry.list_for_user("u2").await.unwrap().is_empty());
    }
}
