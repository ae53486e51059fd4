//! Shared state backends for the hangar control plane.
//!
//! Every record the control plane shares between process instances lives
//! behind [`KvBackend`]: plain values (infra stack state), hashes with a
//! time-to-live (file-edit sessions) and sets (secondary indices). The
//! [`PubSubBackend`] carries fire-and-forget notifications.

mod error;
mod traits;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "valkey")]
mod valkey;

#[cfg(feature = "config")]
mod config;

#[cfg(feature = "config")]
mod provider;

pub use error::{KvError, StateError};
pub use traits::{FieldGuard, KvBackend, PubSubBackend};

#[cfg(feature = "memory")]
pub use memory::{MemoryKv, PublishedMessage};

#[cfg(feature = "valkey")]
pub use valkey::ValkeyKv;

#[cfg(feature = "config")]
pub use config::{KvConfig, StateConfig};

#[cfg(feature = "config")]
pub use provider::StateProvider;
