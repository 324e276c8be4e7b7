//! The runqueue: builds the task graph for an invocation, decides what the
//! cache can cover, enforces the setscene policy and dispatches the rest.

mod report;
mod runner;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use petgraph::graph::NodeIndex;
use rayon::ThreadPoolBuilder;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::core::UnifiedId;
use crate::coverage::Coverage;
use crate::error::RunError;
use crate::executor::Executor;
use crate::graph::{GraphBuilder, TaskGraph};
use crate::hash::{EquivalenceService, HashClient, Keys, RemoteEquivalence};
use crate::policy::Enforcer;
use crate::provider::Provider;
use crate::store::ArtifactStore;

pub use report::{ActionRecord, Failure, FailureKind, RunReport, Unscheduled};
pub use runner::{Diagnostics, TaskExecution};

/// Entry point of the engine.
///
/// ```no_run
/// use std::sync::Arc;
/// use tsumiki::{MemoryStore, Recipes, RunConfig, Runqueue, TaskId, OutputId, Hash32};
///
/// let recipes = Recipes::new();
/// let executor = Arc::new(|task: &TaskId| -> anyhow::Result<OutputId> {
///     Ok(OutputId(Hash32::hash(task.to_string())))
/// });
/// let runqueue = Runqueue::new(&recipes, executor, Arc::new(MemoryStore::new()));
///
/// let config = RunConfig::new(["a1"]).unwrap();
/// let report = runqueue.run(&config).unwrap();
/// println!("{report}");
/// ```
pub struct Runqueue<'a, P: Provider + ?Sized> {
    provider: &'a P,
    executor: Arc<dyn Executor>,
    store: Arc<dyn ArtifactStore>,
    service: Option<Arc<dyn EquivalenceService>>,
}

impl<'a, P: Provider + ?Sized> Runqueue<'a, P> {
    pub fn new(provider: &'a P, executor: Arc<dyn Executor>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            provider,
            executor,
            store,
            service: None,
        }
    }

    /// Hash equivalence service to consult. Takes precedence over
    /// [`RunConfig::hashserv`].
    pub fn service(mut self, service: Arc<dyn EquivalenceService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Builds the task graph of an invocation. Node indices match the ones
    /// used in [`Diagnostics`] of a run with the same configuration.
    pub fn graph(&self, config: &RunConfig) -> Result<TaskGraph, RunError> {
        let graph = GraphBuilder::new(self.provider)
            .multiconfigs(&config.multiconfigs)
            .task(config.task.as_deref())
            .force(config.force)
            .build(&config.targets)?;
        Ok(graph)
    }

    pub fn run(&self, config: &RunConfig) -> Result<RunReport, RunError> {
        let graph = self.graph(config)?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .thread_name(|i| format!("runqueue-{i}"))
            .build()?;

        let client = HashClient::new(config.valid.clone(), self.connect(config), self.store.clone());
        let keys = Keys::resolve(&graph, &client);

        let valid: Vec<Option<UnifiedId>> = pool.install(|| {
            graph
                .indices()
                .collect::<Vec<NodeIndex>>()
                .into_par_iter()
                .map(|ix| {
                    let node = graph.node(ix);
                    if node.setscene && !node.explicit {
                        client.is_valid(&node.id, node.signature, keys.key(ix))
                    } else {
                        None
                    }
                })
                .collect()
        });

        let coverage = Coverage::new(&graph, |ix| valid[ix.index()]);
        let deferred = runner::deferrals(&graph, &coverage);
        let enforcer = Enforcer::new(config.enforce, config.strict, &config.allow_list);

        let plan = coverage.plan();
        info!(
            covered = plan.covered.len(),
            notcovered = plan.notcovered.len(),
            deferred = deferred.len(),
            "coverage resolved"
        );

        // Duplicates of another planned task are only checked if they end up
        // running, once their twin has settled.
        let violations: Vec<_> = graph
            .indices()
            .filter(|&ix| coverage.is_notcovered(ix) && !deferred.contains_key(&ix))
            .filter_map(|ix| enforcer.check(graph.node(ix)))
            .collect();

        if enforcer.is_strict() && !violations.is_empty() {
            return Err(RunError::Policy(violations));
        }

        if config.dry_run {
            return Ok(RunReport {
                plan,
                violations,
                dry_run: true,
                ..Default::default()
            });
        }

        let report = runner::Runner {
            graph: &graph,
            coverage,
            client: &client,
            keys,
            executor: &*self.executor,
            store: &*self.store,
            enforcer,
            deferred,
            concurrency: config.concurrency,
            keep_going: config.keep_going,
            fallback: config.fallback_on_restore_failure,
        }
        .run(&pool);

        if report.is_success() {
            Ok(report)
        } else {
            Err(RunError::Failed(Box::new(report)))
        }
    }

    fn connect(&self, config: &RunConfig) -> Option<Arc<dyn EquivalenceService>> {
        if let Some(service) = &self.service {
            return Some(service.clone());
        }

        let address = config.hashserv.as_deref()?;
        match RemoteEquivalence::new(address) {
            Ok(remote) => Some(Arc::new(remote)),
            Err(err) => {
                warn!("{err}, continuing without hash equivalence");
                None
            }
        }
    }
}
