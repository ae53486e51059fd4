use std::sync::Arc;

use crate::config::{KvConfig, StateConfig};
use crate::error::StateError;
use crate::traits::{KvBackend, PubSubBackend};

#[cfg(feature = "memory")]
use crate::memory::MemoryKv;

#[cfg(feature = "valkey")]
use crate::valkey::ValkeyKv;

/// Hands out the configured backends as trait objects.
///
/// The KV and publish backends are always built from the same store so
/// that notifications travel alongside the records they describe.
#[derive(Clone, Default)]
pub struct StateProvider {
    kv: Option<Arc<dyn KvBackend>>,
    pubsub: Option<Arc<dyn PubSubBackend>>,
}

impl StateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_config(config: &StateConfig) -> Result<Self, StateError> {
        match &config.kv {
            Some(c) => Self::create_backends(c).await,
            None => Ok(Self::default()),
        }
    }

    pub fn with_kv(mut self, kv: Arc<dyn KvBackend>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSubBackend>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn kv(&self) -> Result<Arc<dyn KvBackend>, StateError> {
        self.kv
            .clone()
            .ok_or(StateError::NotConfigured("kv".to_string()))
    }

    pub fn pubsub(&self) -> Result<Arc<dyn PubSubBackend>, StateError> {
        self.pubsub
            .clone()
            .ok_or(StateError::NotConfigured("pubsub".to_string()))
    }

    async fn create_backends(config: &KvConfig) -> Result<Self, StateError> {
        match config {
            #[cfg(feature = "memory")]
            KvConfig::Memory => {
                let kv = Arc::new(MemoryKv::new());
                Ok(Self::new().with_kv(kv.clone()).with_pubsub(kv))
            }

            #[cfg(feature = "valkey")]
            KvConfig::Valkey {
                url,
                namespace,
                pool_size,
            } => {
                let kv = ValkeyKv::new(url, namespace.clone(), *pool_size)
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                let kv = Arc::new(kv);
                Ok(Self::new().with_kv(kv.clone()).with_pubsub(kv))
            }

            #[allow(unreachable_patterns)]
            _ => Err(StateError::UnsupportedBackend(
                "No suitable KV backend enabled".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider")
            .field("kv", &self.kv.is_some())
            .field("pubsub", &self.pubsub.is_some())
            .finish()
    }
}
