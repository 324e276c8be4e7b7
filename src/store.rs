use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use anyhow::bail;

use crate::core::UnifiedId;
use crate::graph::TaskId;

/// Content-addressed storage for task artifacts, keyed by unified identity.
pub trait ArtifactStore: Send + Sync {
    fn contains(&self, unified: UnifiedId) -> bool;

    /// Materialises the artifact stored under `unified` as the output of
    /// `task`.
    fn restore(&self, task: &TaskId, unified: UnifiedId) -> anyhow::Result<()>;

    /// Stores the output of a real execution of `task` under `unified`.
    fn persist(&self, task: &TaskId, unified: UnifiedId) -> anyhow::Result<()>;
}

/// Artifact store that only tracks which identities are present.
///
/// Restores always succeed unless the task was marked as broken with
/// [`MemoryStore::break_restore`], so entries of a local valid set can be
/// restored without seeding the store first.
#[derive(Default)]
pub struct MemoryStore {
    artifacts: RwLock<HashSet<UnifiedId>>,
    broken: RwLock<HashSet<TaskId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, unified: UnifiedId) {
        self.artifacts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unified);
    }

    /// Makes every restore of `task` fail.
    pub fn break_restore(&self, task: TaskId) {
        self.broken
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task);
    }

    pub fn len(&self) -> usize {
        self.artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryStore {
    fn contains(&self, unified: UnifiedId) -> bool {
        self.artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&unified)
    }

    fn restore(&self, task: &TaskId, unified: UnifiedId) -> anyhow::Result<()> {
        let broken = self.broken.read().unwrap_or_else(PoisonError::into_inner);
        if broken.contains(task) {
            bail!("Artifact {unified} for {task} is corrupt");
        }
        Ok(())
    }

    fn persist(&self, _: &TaskId, unified: UnifiedId) -> anyhow::Result<()> {
        self.insert(unified);
        Ok(())
    }
}
