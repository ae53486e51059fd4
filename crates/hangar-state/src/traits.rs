use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

/// Condition on one hash field for [`KvBackend::hash_update`].
#[derive(Debug, Clone, Copy)]
pub struct FieldGuard<'a> {
    pub field: &'a str,
    /// Values the field may currently hold for the write to go ahead.
    pub one_of: &'a [&'a str],
}

/// Key-value storage shared by every control plane instance.
///
/// Implementations acquire a connection per call and release it before
/// returning, so no caller holds a connection across unrelated I/O.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Lists keys starting with `prefix`, of any value type.
    ///
    /// Returns one page of keys plus the cursor for the next page, or
    /// `None` once the scan is complete. A page may be empty while the
    /// cursor is still `Some`.
    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), KvError>;

    /// Writes `fields` into the hash at `key`, merging with existing fields,
    /// and resets the key's time-to-live when `ttl` is given.
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), KvError>;

    /// Writes `fields` into an existing hash, never creating the key.
    ///
    /// With a `guard`, the write only happens while the guarded field holds
    /// one of the allowed values. The check and the write are atomic.
    /// Returns whether the write happened.
    async fn hash_update(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
        guard: Option<FieldGuard<'_>>,
    ) -> Result<bool, KvError>;

    /// Returns all fields of the hash, or `None` if the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError>;

    /// Resets the time-to-live of an existing key. Returns `false` if the
    /// key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>)
        -> Result<(), KvError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvError>;
}

#[async_trait]
pub trait PubSubBackend: Send + Sync {
    /// Publishes `payload` on `channel`, returning how many subscribers
    /// received it. Delivery is best-effort.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, KvError>;
}
