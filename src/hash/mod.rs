//! Signatures, validity checks and the hash equivalence client.

mod keys;
mod remote;
mod service;
mod valid;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::core::{Blake3Hasher, Hash32, OutputId, Signature, UnifiedId};
use crate::error::ServiceUnavailable;
use crate::graph::TaskId;
use crate::store::ArtifactStore;

pub(crate) use keys::Keys;
pub use remote::{RemoteEquivalence, Reply, Request};
pub use service::{EquivalenceService, MemoryEquivalence};
pub use valid::ValidSet;

/// Content signature of a task.
///
/// The namespace is left out, so the same unit built in two
/// multiconfigs ends up with the same signature. `deps` are the signatures of
/// the dependencies, or their unified identities when computing a lookup key.
pub(crate) fn signature(
    unit: &str,
    task: &str,
    inputs: Hash32,
    deps: impl IntoIterator<Item = Hash32>,
) -> Signature {
    let mut hasher = Blake3Hasher::default();
    hasher.field(unit).field(task).field(inputs.as_bytes());
    for dep in deps {
        hasher.field(dep.as_bytes());
    }
    Signature(hasher.into())
}

type ReportSlot = Arc<Mutex<Option<(OutputId, UnifiedId)>>>;

/// Per-run view of the cache and of the equivalence service.
///
/// Shared by the scheduler and every worker. Lookups that found a unified
/// identity are cached for the rest of the run; misses are not, since the
/// answer can change while the run progresses.
pub struct HashClient {
    valid: ValidSet,
    service: Option<Arc<dyn EquivalenceService>>,
    store: Arc<dyn ArtifactStore>,
    known: RwLock<HashMap<Signature, UnifiedId>>,
    reports: Mutex<HashMap<Signature, ReportSlot>>,
    reachable: AtomicBool,
    generation: AtomicU64,
}

impl HashClient {
    pub fn new(
        valid: ValidSet,
        service: Option<Arc<dyn EquivalenceService>>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            valid,
            service,
            store,
            known: RwLock::default(),
            reports: Mutex::default(),
            reachable: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        }
    }

    /// Checks whether a cached artifact can stand in for the task, returning
    /// the unified identity to restore it from.
    ///
    /// The valid set matches the task by name or by its `signature`; the
    /// cache and the service are asked about its lookup `key`.
    pub fn is_valid(&self, id: &TaskId, signature: Signature, key: Signature) -> Option<UnifiedId> {
        if self.valid.contains(id, signature) {
            return Some(self.cached(key).unwrap_or_else(|| key.into()));
        }

        if let Some(unified) = self.cached(key)
            && self.store.contains(unified)
        {
            return Some(unified);
        }

        let unified = self.lookup(key)?;
        let present = self.store.contains(unified);
        debug!(task = %id, %key, %unified, present, "equivalence lookup");
        present.then_some(unified)
    }

    /// Unified identity known for `key`, whether or not an artifact exists
    /// for it. The service is only asked while it is reachable.
    pub fn unified(&self, key: Signature) -> Option<UnifiedId> {
        if let Some(unified) = self.cached(key) {
            return Some(unified);
        }
        if !self.is_reachable() {
            return None;
        }
        self.lookup(key)
    }

    /// Publishes the output of a real execution and returns the unified
    /// identity its artifact should be stored under.
    ///
    /// Repeated reports for a key return the first answer the service gave;
    /// concurrent reports for the same key wait for each other. While the
    /// service cannot be reached the key stands for itself and later reports
    /// try the service again.
    pub fn report(&self, id: &TaskId, key: Signature, output: OutputId) -> UnifiedId {
        let slot = self
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone();

        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, unified)) = *slot {
            return unified;
        }

        let unified = match &self.service {
            Some(service) => match service.report(key, output) {
                Ok(unified) => {
                    self.mark_reachable();
                    self.remember(key, unified);
                    unified
                }
                Err(err) => {
                    self.mark_unreachable(&err);
                    let unified = self.cached(key).unwrap_or_else(|| key.into());
                    debug!(task = %id, %key, %output, %unified, "reported completion locally");
                    self.assume(key, unified);
                    return unified;
                }
            },
            None => {
                let unified = key.into();
                self.assume(key, unified);
                unified
            }
        };

        debug!(task = %id, %key, %output, %unified, "reported completion");
        *slot = Some((output, unified));
        unified
    }

    /// Advances every time the service becomes reachable again after having
    /// failed.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_reachable(&self) -> bool {
        self.service.is_some() && self.reachable.load(Ordering::SeqCst)
    }

    fn cached(&self, key: Signature) -> Option<UnifiedId> {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
    }

    fn lookup(&self, key: Signature) -> Option<UnifiedId> {
        let service = self.service.as_ref()?;
        match service.lookup(key) {
            Ok(found) => {
                self.mark_reachable();
                let unified = found?;
                self.remember(key, unified);
                Some(unified)
            }
            Err(err) => {
                self.mark_unreachable(&err);
                None
            }
        }
    }

    /// Records an answer of the service.
    fn remember(&self, key: Signature, unified: UnifiedId) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, unified);
    }

    /// Records a local guess, unless the service already answered.
    fn assume(&self, key: Signature, unified: UnifiedId) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(unified);
    }

    fn mark_reachable(&self) {
        if !self.reachable.swap(true, Ordering::SeqCst) {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(generation, "hash equivalence service reachable again");
        }
    }

    fn mark_unreachable(&self, err: &ServiceUnavailable) {
        if self.reachable.swap(false, Ordering::SeqCst) {
            warn!("{err}, continuing with the local valid set only");
        } else {
            debug!("{err}");
        }
    }
}
