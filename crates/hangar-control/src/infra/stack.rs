//! Stack backends: the automation engine that owns stack state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use hangar_state::KvBackend;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::program::{Program, Resource};
use crate::error::ControlResult;
use crate::types::ChangeSummary;

/// A declarative stack engine.
///
/// Applying a program makes the stack hold exactly the program's
/// resources: missing ones are created, changed ones updated, and ones
/// no longer desired deleted.
#[async_trait]
pub trait StackBackend: Send + Sync {
    /// Make `stack` addressable, creating it empty if it does not exist.
    async fn select_or_create(&self, stack: &str) -> ControlResult<()>;

    /// Diff `program` against the stack without changing anything.
    async fn preview(&self, stack: &str, program: &Program) -> ControlResult<ChangeSummary>;

    /// Converge the stack onto `program`.
    async fn up(&self, stack: &str, program: &Program) -> ControlResult<ChangeSummary>;
}

type StackState = BTreeMap<String, String>;

/// Stack backend that records one digest per resource in the shared store.
///
/// State for stack `s` lives under `stack:<s>` as a JSON map from resource
/// urn to the hex SHA-256 of the rendered resource.
pub struct KvStackBackend {
    kv: Arc<dyn KvBackend>,
}

impl KvStackBackend {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    fn state_key(stack: &str) -> String {
        format!("stack:{stack}")
    }

    async fn load_state(&self, stack: &str) -> ControlResult<StackState> {
        match self.kv.get(&Self::state_key(stack)).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(StackState::new()),
        }
    }

    /// Urns of the resources currently recorded for a stack.
    pub async fn resources(&self, stack: &str) -> ControlResult<Vec<String>> {
        Ok(self.load_state(stack).await?.into_keys().collect())
    }

    /// Which resources converging `stack` onto `program` touches, without
    /// recording anything.
    pub async fn plan(&self, stack: &str, program: &Program) -> ControlResult<StackPlan> {
        let current = self.load_state(stack).await?;
        let desired = desired_state(program)?;

        let changed = desired
            .iter()
            .filter(|(urn, digest)| current.get(*urn) != Some(*digest))
            .map(|(urn, _)| urn.clone())
            .collect();
        let removed = current
            .keys()
            .filter(|urn| !desired.contains_key(*urn))
            .cloned()
            .collect();

        Ok(StackPlan { changed, removed })
    }
}

/// Resources a converge has to act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackPlan {
    /// Urns that are new or whose rendering changed.
    pub changed: Vec<String>,
    /// Urns recorded for the stack but no longer desired.
    pub removed: Vec<String>,
}

impl std::fmt::Debug for KvStackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStackBackend").finish_non_exhaustive()
    }
}

fn digest(resource: &Resource) -> ControlResult<String> {
    let rendered = serde_json::to_vec(resource)?;
    Ok(hex::encode(Sha256::digest(&rendered)))
}

fn desired_state(program: &Program) -> ControlResult<StackState> {
    program
        .resources()
        .iter()
        .map(|r| Ok((r.urn.clone(), digest(r)?)))
        .collect()
}

fn diff(current: &StackState, desired: &StackState) -> ChangeSummary {
    let mut summary = ChangeSummary::default();
    for (urn, digest) in desired {
        match current.get(urn) {
            None => summary.created += 1,
            Some(existing) if existing == digest => summary.unchanged += 1,
            Some(_) => summary.updated += 1,
        }
    }
    for urn in current.keys() {
        if !desired.contains_key(urn) {
            summary.deleted += 1;
        }
    }
    summary
}

#[async_trait]
impl StackBackend for KvStackBackend {
    async fn select_or_create(&self, stack: &str) -> ControlResult<()> {
        let key = Self::state_key(stack);
        if !self.kv.exists(&key).await? {
            self.kv.put(&key, b"{}", None).await?;
            debug!(stack = %stack, "stack created");
        }
        Ok(())
    }

    async fn preview(&self, stack: &str, program: &Program) -> ControlResult<ChangeSummary> {
        let current = self.load_state(stack).await?;
        Ok(diff(&current, &desired_state(program)?))
    }

    async fn up(&self, stack: &str, program: &Program) -> ControlResult<ChangeSummary> {
        let current = self.load_state(stack).await?;
        let desired = desired_state(program)?;
        let summary = diff(&current, &desired);

        let key = Self::state_key(stack);
        if desired.is_empty() {
            self.kv.delete(&key).await?;
        } else {
            self.kv.put(&key, &serde_json::to_vec(&desired)?, None).await?;
        }
        Ok(summary)
    }
}
