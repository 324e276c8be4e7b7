use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{OutputId, Signature, UnifiedId};
use crate::error::ServiceUnavailable;

/// Client contract of a hash equivalence service.
///
/// The service maps task signatures to unified identities. Two signatures
/// whose executions produced the same output end up with the same unified
/// identity, so the artifact of one can stand in for the other.
pub trait EquivalenceService: Send + Sync {
    /// Unified identity recorded for `signature`, if any.
    fn lookup(&self, signature: Signature) -> Result<Option<UnifiedId>, ServiceUnavailable>;

    /// Records that `signature` produced `output` and returns the canonical
    /// unified identity for it.
    fn report(
        &self,
        signature: Signature,
        output: OutputId,
    ) -> Result<UnifiedId, ServiceUnavailable>;
}

#[derive(Default)]
struct Records {
    unified: HashMap<Signature, UnifiedId>,
    outputs: HashMap<OutputId, UnifiedId>,
}

/// In-process equivalence service.
///
/// Conflicts resolve first-writer-wins: the first signature to report an
/// output becomes the unified identity of that output, and the first report
/// for a signature is the one that sticks.
#[derive(Default)]
pub struct MemoryEquivalence {
    records: RwLock<Records>,
    offline: AtomicBool,
}

impl MemoryEquivalence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the service going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Number of signatures with a recorded unified identity.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.unified.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), ServiceUnavailable> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceUnavailable("service is offline".into()));
        }
        Ok(())
    }
}

impl EquivalenceService for MemoryEquivalence {
    fn lookup(&self, signature: Signature) -> Result<Option<UnifiedId>, ServiceUnavailable> {
        self.check()?;
        let records = self
            .records
            .read()
            .map_err(|_| ServiceUnavailable("records poisoned".into()))?;
        Ok(records.unified.get(&signature).copied())
    }

    fn report(
        &self,
        signature: Signature,
        output: OutputId,
    ) -> Result<UnifiedId, ServiceUnavailable> {
        self.check()?;
        let mut records = self
            .records
            .write()
            .map_err(|_| ServiceUnavailable("records poisoned".into()))?;

        if let Some(&unified) = records.unified.get(&signature) {
            return Ok(unified);
        }

        let unified = *records
            .outputs
            .entry(output)
            .or_insert_with(|| UnifiedId::from(signature));

        records.unified.insert(signature, unified);
        Ok(unified)
    }
}
