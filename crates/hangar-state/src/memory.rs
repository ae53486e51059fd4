use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::KvError;
use crate::traits::{FieldGuard, KvBackend, PubSubBackend};

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// A message delivered through [`MemoryKv`]'s publish bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: String,
}

/// In-process KV backend with the same expiry and typing rules as Valkey.
#[derive(Debug, Clone)]
pub struct MemoryKv {
    data: Arc<RwLock<HashMap<String, KvEntry>>>,
    bus: broadcast::Sender<PublishedMessage>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            data: Arc::default(),
            bus,
        }
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every message published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.bus.subscribe()
    }

    /// Drops expired entries, then returns a mutable handle to a live one.
    fn live_entry<'a>(
        data: &'a mut HashMap<String, KvEntry>,
        key: &str,
    ) -> Option<&'a mut KvEntry> {
        let now = Instant::now();
        if data.get(key).is_some_and(|entry| !entry.is_live(now)) {
            data.remove(key);
        }
        data.get_mut(key)
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut data = self.data.write().await;
        match Self::live_entry(&mut data, key) {
            Some(KvEntry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let expires_at = ttl.map(|d| Instant::now() + d);
        data.insert(
            key.to_string(),
            KvEntry {
                value: Value::Bytes(value.to_vec()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        Ok(data.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(data.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), KvError> {
        let data = self.data.read().await;
        let now = Instant::now();

        let mut keys: Vec<_> = data
            .iter()
            .filter(|(k, entry)| {
                k.starts_with(prefix)
                    && entry.is_live(now)
                    && cursor.map_or(true, |c| k.as_str() > c)
            })
            .map(|(k, _)| k.clone())
            .collect();

        keys.sort();

        let next_cursor = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };

        Ok((keys, next_cursor))
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let expires_at = ttl.map(|d| Instant::now() + d);

        match Self::live_entry(&mut data, key) {
            Some(entry) => {
                let Value::Hash(hash) = &mut entry.value else {
                    return Err(KvError::WrongType(key.to_string()));
                };
                hash.extend(fields.iter().cloned());
                if expires_at.is_some() {
                    entry.expires_at = expires_at;
                }
            }
            None => {
                data.insert(
                    key.to_string(),
                    KvEntry {
                        value: Value::Hash(fields.iter().cloned().collect()),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn hash_update(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
        guard: Option<FieldGuard<'_>>,
    ) -> Result<bool, KvError> {
        let mut data = self.data.write().await;
        let Some(entry) = Self::live_entry(&mut data, key) else {
            return Ok(false);
        };
        let Value::Hash(hash) = &mut entry.value else {
            return Err(KvError::WrongType(key.to_string()));
        };

        if let Some(guard) = guard {
            let current = hash.get(guard.field).map(String::as_str);
            if !current.is_some_and(|value| guard.one_of.contains(&value)) {
                return Ok(false);
            }
        }

        hash.extend(fields.iter().cloned());
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(true)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        let mut data = self.data.write().await;
        match Self::live_entry(&mut data, key) {
            Some(KvEntry {
                value: Value::Hash(hash),
                ..
            }) => Ok(Some(hash.clone())),
            Some(_) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut data = self.data.write().await;
        match Self::live_entry(&mut data, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let expires_at = ttl.map(|d| Instant::now() + d);

        match Self::live_entry(&mut data, key) {
            Some(entry) => {
                let Value::Set(set) = &mut entry.value else {
                    return Err(KvError::WrongType(key.to_string()));
                };
                set.insert(member.to_string());
                if expires_at.is_some() {
                    entry.expires_at = expires_at;
                }
            }
            None => {
                data.insert(
                    key.to_string(),
                    KvEntry {
                        value: Value::Set(BTreeSet::from([member.to_string()])),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let now_empty = match Self::live_entry(&mut data, key) {
            Some(KvEntry {
                value: Value::Set(set),
                ..
            }) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(KvError::WrongType(key.to_string())),
            None => false,
        };

        // Valkey deletes a set once its last member is removed.
        if now_empty {
            data.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut data = self.data.write().await;
        match Self::live_entry(&mut data, key) {
            Some(KvEntry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl PubSubBackend for MemoryKv {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, KvError> {
        let message = PublishedMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        // No receivers is not an error, just nobody listening.
        Ok(self.bus.send(message).unwrap_or(0))
    }
}
