use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_kv")]
    pub kv: Option<KvConfig>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { kv: default_kv() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum KvConfig {
    #[default]
    Memory,
    #[cfg(feature = "valkey")]
    Valkey {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
}

#[allow(clippy::unnecessary_wraps)]
fn default_kv() -> Option<KvConfig> {
    Some(KvConfig::Memory)
}

#[cfg(feature = "valkey")]
fn default_pool_size() -> usize {
    10
}
