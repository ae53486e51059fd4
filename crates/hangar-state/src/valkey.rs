//! Valkey/Redis adapter for the KV and publish backends.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, Runtime};

use crate::error::KvError;
use crate::traits::{FieldGuard, KvBackend, PubSubBackend};

/// Valkey/Redis KV backend.
#[derive(Clone)]
pub struct ValkeyKv {
    pool: Pool,
    namespace: Option<String>,
}

impl ValkeyKv {
    /// Create a new Valkey KV backend and verify the connection.
    pub async fn new(
        url: &str,
        namespace: Option<String>,
        pool_size: usize,
    ) -> Result<Self, KvError> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| KvError::Connection(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| KvError::Connection(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        Ok(Self { pool, namespace })
    }

    async fn conn(&self) -> Result<Connection, KvError> {
        self.pool
            .get()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        match &self.namespace {
            Some(ns) => key
                .strip_prefix(ns)
                .and_then(|k| k.strip_prefix(':'))
                .unwrap_or(key),
            None => key,
        }
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX)
}

fn backend(e: redis::RedisError) -> KvError {
    if e.kind() == redis::ErrorKind::TypeError {
        KvError::WrongType(e.to_string())
    } else {
        KvError::Backend(e.to_string())
    }
}

#[async_trait]
impl KvBackend for ValkeyKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);
        conn.get(&prefixed).await.map_err(backend)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);

        match ttl {
            Some(duration) => {
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(&prefixed, value, seconds)
                    .await
                    .map_err(backend)?;
            }
            None => {
                conn.set::<_, _, ()>(&prefixed, value)
                    .await
                    .map_err(backend)?;
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);
        let deleted: i64 = conn.del(&prefixed).await.map_err(backend)?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);
        conn.exists(&prefixed).await.map_err(backend)
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), KvError> {
        let mut conn = self.conn().await?;

        let pattern = self.prefixed_key(&format!("{}*", prefix));
        let start_cursor: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);

        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(start_cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        let stripped_keys: Vec<String> = keys
            .into_iter()
            .map(|k| self.strip_prefix(&k).to_string())
            .collect();

        let next = if next_cursor == 0 {
            None
        } else {
            Some(next_cursor.to_string())
        };

        Ok((stripped_keys, next))
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);

        let mut pipe = redis::pipe();
        pipe.atomic();
        if !fields.is_empty() {
            pipe.hset_multiple(&prefixed, fields).ignore();
        }
        if let Some(ttl) = ttl {
            pipe.expire(&prefixed, ttl_secs(ttl)).ignore();
        }

        pipe.query_async::<()>(&mut conn).await.map_err(backend)
    }

    async fn hash_update(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
        guard: Option<FieldGuard<'_>>,
    ) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);

        // ARGV: guard field, allowed count, allowed values..., ttl, then field/value pairs.
        let script = redis::Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 0 then
                return 0
            end
            local allowed = tonumber(ARGV[2])
            if ARGV[1] ~= '' then
                local current = redis.call('HGET', KEYS[1], ARGV[1])
                local matched = false
                for i = 1, allowed do
                    if current == ARGV[2 + i] then
                        matched = true
                    end
                end
                if not matched then
                    return 0
                end
            end
            local ttl = tonumber(ARGV[3 + allowed])
            local i = 4 + allowed
            while i < #ARGV do
                redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
                i = i + 2
            end
            if ttl > 0 then
                redis.call('EXPIRE', KEYS[1], ttl)
            end
            return 1
            "#,
        );

        let (guard_field, allowed): (&str, &[&str]) = match guard {
            Some(guard) => (guard.field, guard.one_of),
            None => ("", &[]),
        };
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&prefixed)
            .arg(guard_field)
            .arg(allowed.len());
        for value in allowed {
            invocation.arg(*value);
        }
        invocation.arg(ttl.map_or(0, ttl_secs));
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }

        let written: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(written == 1)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);

        // HGETALL on a missing key yields an empty map.
        let hash: HashMap<String, String> = conn.hgetall(&prefixed).await.map_err(backend)?;
        Ok(if hash.is_empty() { None } else { Some(hash) })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);
        conn.expire(&prefixed, ttl_secs(ttl))
            .await
            .map_err(backend)
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);

        let mut pipe = redis::pipe();
        pipe.atomic().sadd(&prefixed, member).ignore();
        if let Some(ttl) = ttl {
            pipe.expire(&prefixed, ttl_secs(ttl)).ignore();
        }

        pipe.query_async::<()>(&mut conn).await.map_err(backend)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);
        conn.srem::<_, _, ()>(&prefixed, member)
            .await
            .map_err(backend)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);
        conn.smembers(&prefixed).await.map_err(backend)
    }
}

#[async_trait]
impl PubSubBackend for ValkeyKv {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, KvError> {
        let mut conn = self.conn().await?;
        let receivers: i64 = conn.publish(channel, payload).await.map_err(backend)?;
        Ok(usize::try_from(receivers).unwrap_or(0))
    }
}

impl std::fmt::Debug for ValkeyKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyKv")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
