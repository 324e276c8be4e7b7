mod diagnostics;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Sender, channel};
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use rayon::{Scope, ThreadPool};
use tracing::{Level, Span, debug, error, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Signature, UnifiedId};
use crate::coverage::Coverage;
use crate::engine::{ActionRecord, Failure, FailureKind, RunReport, Unscheduled};
use crate::executor::Executor;
use crate::graph::{TaskGraph, TaskId, TaskNode};
use crate::hash::{HashClient, Keys};
use crate::policy::Enforcer;
use crate::store::ArtifactStore;

pub use diagnostics::{Diagnostics, TaskExecution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Probing,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Restore(UnifiedId),
    /// Runs for real and reports the output under the key.
    Run(Signature),
}

enum Event {
    Finished {
        index: NodeIndex,
        setscene: bool,
        outcome: Result<UnifiedId, (FailureKind, anyhow::Error)>,
        start: Instant,
        duration: Duration,
    },
    Probed {
        index: NodeIndex,
        key: Signature,
        unified: Option<UnifiedId>,
    },
}

/// Pairs every planned setscene task that runs for real with the earliest
/// required task sharing its signature, typically the same unit in another
/// multiconfig. Such tasks wait for that task to settle and are then checked
/// against the cache again.
///
/// Earliest means lowest node index, and the graph builder numbers tasks in
/// the order targets were requested. The namespace named first therefore
/// builds and the others restore from it: with `mc:mc1:a1 b1` it is `mc1`
/// that runs the shared `a1` chain.
pub(crate) fn deferrals(graph: &TaskGraph, coverage: &Coverage) -> HashMap<NodeIndex, NodeIndex> {
    let mut canonical: HashMap<Signature, NodeIndex> = HashMap::new();
    for ix in graph.indices() {
        if coverage.is_required(ix) {
            canonical.entry(graph.node(ix).signature).or_insert(ix);
        }
    }

    graph
        .indices()
        .filter(|&ix| coverage.is_notcovered(ix) && coverage.is_eligible(ix))
        .filter_map(|ix| {
            let first = canonical.get(&graph.node(ix).signature).copied()?;
            (first != ix).then_some((ix, first))
        })
        .collect()
}

/// What workers need, borrowed for the duration of the scope.
#[derive(Clone, Copy)]
struct Workers<'a> {
    client: &'a HashClient,
    executor: &'a dyn Executor,
    store: &'a dyn ArtifactStore,
}

impl<'a> Workers<'a> {
    fn spawn_action<'s>(
        self,
        scope: &Scope<'s>,
        sender: &Sender<Event>,
        style: &Option<ProgressStyle>,
        index: NodeIndex,
        node: &TaskNode,
        action: Action,
    ) where
        'a: 's,
    {
        let sender = sender.clone();
        let style = style.clone();
        let id = node.id.clone();

        scope.spawn(move |_| {
            let setscene = matches!(action, Action::Restore(_));
            let verb = if setscene { "Restoring" } else { "Running" };

            let span = tracing::span!(Level::INFO, "task", name = %id, setscene);
            if let Some(style) = &style {
                span.pb_set_style(style);
            }
            span.pb_set_message(&format!("{verb} {id}"));
            let _enter = span.enter();

            let start = Instant::now();

            // Workers only read shared state or go through the client, which
            // guards its own.
            let outcome = match catch_unwind(AssertUnwindSafe(|| self.perform(&id, action))) {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let kind = match action {
                        Action::Restore(_) => FailureKind::Restore,
                        Action::Run(_) => FailureKind::Run,
                    };
                    Err((kind, panic_message(panic)))
                }
            };

            let duration = start.elapsed();

            // The scheduler owns the receiver until every spawned job reported
            // back, so this cannot fail.
            _ = sender.send(Event::Finished {
                index,
                setscene,
                outcome,
                start,
                duration,
            });
        });
    }

    fn spawn_probe<'s>(
        self,
        scope: &Scope<'s>,
        sender: &Sender<Event>,
        index: NodeIndex,
        node: &TaskNode,
        key: Signature,
    ) where
        'a: 's,
    {
        let sender = sender.clone();
        let id = node.id.clone();
        let signature = node.signature;

        scope.spawn(move |_| {
            let check = || self.client.is_valid(&id, signature, key);
            let unified = catch_unwind(AssertUnwindSafe(check)).unwrap_or_else(|panic| {
                warn!(task = %id, "validity check failed: {}", panic_message(panic));
                None
            });

            _ = sender.send(Event::Probed {
                index,
                key,
                unified,
            });
        });
    }

    /// Returns the identity the task's output now goes by.
    fn perform(
        self,
        id: &TaskId,
        action: Action,
    ) -> Result<UnifiedId, (FailureKind, anyhow::Error)> {
        match action {
            Action::Restore(unified) => self
                .store
                .restore(id, unified)
                .map(|()| unified)
                .map_err(|err| (FailureKind::Restore, err)),
            Action::Run(key) => {
                let output = self.executor.run(id).map_err(|err| (FailureKind::Run, err))?;
                let unified = self.client.report(id, key, output);
                self.store
                    .persist(id, unified)
                    .map(|()| unified)
                    .map_err(|err| (FailureKind::Persist, err))
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    };

    anyhow::anyhow!(msg)
}

pub(crate) struct Runner<'a> {
    pub graph: &'a TaskGraph,
    pub coverage: Coverage<'a>,
    pub client: &'a HashClient,
    pub keys: Keys,
    pub executor: &'a dyn Executor,
    pub store: &'a dyn ArtifactStore,
    pub enforcer: Enforcer<'a>,
    pub deferred: HashMap<NodeIndex, NodeIndex>,
    pub concurrency: usize,
    pub keep_going: bool,
    pub fallback: bool,
}

impl<'a> Runner<'a> {
    /// Dispatches the plan on the pool.
    ///
    /// The calling thread runs the scheduler loop: it owns the coverage and
    /// the progress of every task, hands actions and validity checks to the
    /// pool, and folds the events they send back into its state. A task is
    /// dispatched once everything it retains is done, when it is not held
    /// back by a pending validity answer, and while fewer than `concurrency`
    /// actions are in flight.
    pub(crate) fn run(self, pool: &ThreadPool) -> RunReport {
        let workers = Workers {
            client: self.client,
            executor: self.executor,
            store: self.store,
        };

        let root_span = tracing::span!(Level::INFO, "runqueue");
        if let Ok(style) = crate::utils::get_style_runqueue() {
            root_span.pb_set_style(&style);
        }
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        let style = crate::utils::get_style_task().ok();
        let concurrency = match self.concurrency {
            0 => pool.current_num_threads(),
            n => n,
        };

        let mut state = State {
            graph: self.graph,
            progress: vec![Progress::Pending; self.graph.len()],
            generation: self.client.generation(),
            client: self.client,
            keys: self.keys,
            coverage: self.coverage,
            enforcer: self.enforcer,
            deferred: self.deferred,
            probes: Vec::new(),
            running: 0,
            probing: 0,
            concurrency,
            keep_going: self.keep_going,
            fallback: self.fallback,
            stopped: false,
            span: root_span.clone(),
            report: RunReport::default(),
        };

        pool.in_place_scope(|scope| {
            let (sender, receiver) = channel::<Event>();

            state.schedule(scope, &sender, &style, workers);

            while state.running + state.probing > 0 {
                let Ok(event) = receiver.recv() else {
                    break;
                };
                state.handle(event);
                state.schedule(scope, &sender, &style, workers);
            }
        });

        let report = state.finish();
        info!(
            actions = report.actions.len(),
            failures = report.failures.len(),
            "runqueue finished"
        );
        report
    }
}

struct State<'a> {
    graph: &'a TaskGraph,
    coverage: Coverage<'a>,
    client: &'a HashClient,
    keys: Keys,
    enforcer: Enforcer<'a>,
    progress: Vec<Progress>,
    deferred: HashMap<NodeIndex, NodeIndex>,
    /// Tasks waiting for a validity check to be spawned.
    probes: Vec<NodeIndex>,
    running: usize,
    probing: usize,
    generation: u64,
    concurrency: usize,
    keep_going: bool,
    fallback: bool,
    stopped: bool,
    span: Span,
    report: RunReport,
}

impl<'a> State<'a> {
    fn progress(&self, ix: NodeIndex) -> Progress {
        self.progress[ix.index()]
    }

    fn set(&mut self, ix: NodeIndex, progress: Progress) {
        self.progress[ix.index()] = progress;
    }

    /// A pending setscene task that runs for real unless the cache says
    /// otherwise.
    fn is_probeable(&self, ix: NodeIndex) -> bool {
        self.progress(ix) == Progress::Pending
            && self.coverage.is_notcovered(ix)
            && self.coverage.is_eligible(ix)
    }

    fn queue_probe(&mut self, ix: NodeIndex) {
        self.deferred.remove(&ix);
        if self.is_probeable(ix) {
            self.set(ix, Progress::Probing);
            self.probes.push(ix);
        }
    }

    /// Probes every other task with the key of `index`, which has just
    /// produced or restored an artifact.
    fn probe_matching(&mut self, index: NodeIndex) {
        let key = self.keys.key(index);
        for ix in self.graph.indices() {
            if ix != index && self.keys.key(ix) == key {
                self.queue_probe(ix);
            }
        }
    }

    /// Records the identity of the output of `index`. Pending tasks whose key
    /// changed as a result are checked against the cache again, unless they
    /// wait for a twin.
    fn confirm(&mut self, index: NodeIndex, unified: UnifiedId) {
        let progress = &self.progress;
        let frozen = |ix: NodeIndex| {
            !matches!(progress[ix.index()], Progress::Pending | Progress::Probing)
        };
        let changed = self.keys.confirm(self.graph, index, unified, frozen);
        if changed.is_empty() {
            return;
        }

        debug!(
            task = %self.graph.node(index).id,
            %unified,
            tasks = changed.len(),
            "equivalent output, rekeyed dependents"
        );
        for ix in changed {
            if !self.deferred.contains_key(&ix) {
                self.queue_probe(ix);
            }
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Finished {
                index,
                setscene,
                outcome,
                start,
                duration,
            } => {
                self.running -= 1;
                self.report
                    .diagnostics
                    .execution_times
                    .insert(index, TaskExecution { start, duration });

                let graph = self.graph;
                let id = &graph.node(index).id;
                match outcome {
                    Ok(unified) => {
                        self.set(index, Progress::Done);
                        if setscene {
                            self.report.diagnostics.restored.insert(index);
                        }
                        self.report.actions.push(ActionRecord {
                            task: id.clone(),
                            setscene,
                        });
                        self.span.pb_inc(1);
                        self.confirm(index, unified);
                        self.probe_matching(index);
                    }
                    Err((FailureKind::Restore, err)) if self.fallback => {
                        warn!(task = %id, "restore failed, running the task instead: {err:#}");
                        self.set(index, Progress::Pending);
                        let added = self.coverage.uncover(index);
                        debug!(task = %id, tasks = added.len(), "pulled back into the plan");
                    }
                    Err((kind, err)) => self.fail(index, kind, err),
                }
            }
            Event::Probed {
                index,
                key,
                unified,
            } => {
                self.probing -= 1;
                if self.progress(index) == Progress::Probing {
                    self.set(index, Progress::Pending);
                }
                if key != self.keys.key(index) {
                    // Answered for a key the task no longer has.
                    self.queue_probe(index);
                } else if let Some(unified) = unified
                    && self.coverage.is_eligible(index)
                {
                    let pruned = self.coverage.cover(index, unified);
                    debug!(
                        task = %self.graph.node(index).id,
                        pruned = pruned.len(),
                        "late equivalence"
                    );
                    self.confirm(index, unified);
                }
            }
        }
    }

    fn fail(&mut self, index: NodeIndex, kind: FailureKind, err: anyhow::Error) {
        let task = self.graph.node(index).id.clone();
        error!(task = %task, %kind, "{err:#}");
        self.set(index, Progress::Failed);
        self.report.failures.push(Failure {
            task,
            kind,
            error: err,
        });
        if !self.keep_going {
            self.stopped = true;
        }
    }

    /// Tasks that must not start yet: those with a validity answer on the
    /// way, and those that would drop out of the plan if every such answer
    /// came back positive.
    fn held(&self) -> Option<Vec<bool>> {
        let undecided = |ix: NodeIndex| {
            self.progress(ix) == Progress::Probing || self.deferred.contains_key(&ix)
        };

        if self.probing == 0 && self.probes.is_empty() && self.deferred.is_empty() {
            return None;
        }

        let required = self.coverage.required_assuming(&undecided);
        Some(
            self.graph
                .indices()
                .map(|ix| undecided(ix) || !required[ix.index()])
                .collect(),
        )
    }

    fn schedule<'s>(
        &mut self,
        scope: &Scope<'s>,
        sender: &Sender<Event>,
        style: &Option<ProgressStyle>,
        workers: Workers<'a>,
    ) where
        'a: 's,
    {
        if self.stopped {
            return;
        }

        let graph = self.graph;
        loop {
            let settled: Vec<NodeIndex> = self
                .deferred
                .iter()
                .filter(|&(_, &first)| match self.progress(first) {
                    Progress::Done | Progress::Failed => true,
                    Progress::Pending => !self.coverage.is_required(first),
                    Progress::Probing | Progress::Running => false,
                })
                .map(|(&ix, _)| ix)
                .collect();
            for ix in settled {
                self.queue_probe(ix);
            }

            let generation = self.client.generation();
            if generation != self.generation {
                self.generation = generation;
                debug!(generation, "checking pending tasks against the service again");
                for ix in graph.indices() {
                    self.queue_probe(ix);
                }
            }

            for ix in std::mem::take(&mut self.probes) {
                let node = graph.node(ix);
                self.probing += 1;
                workers.spawn_probe(scope, sender, ix, node, self.keys.key(ix));
            }

            let held = self.held();
            for &ix in graph.topological() {
                if self.stopped || self.running >= self.concurrency {
                    break;
                }
                if self.progress(ix) != Progress::Pending
                    || !self.coverage.is_required(ix)
                    || held.as_ref().is_some_and(|held| held[ix.index()])
                {
                    continue;
                }
                let ready = self
                    .coverage
                    .retained(ix)
                    .iter()
                    .all(|&dep| self.progress(dep) == Progress::Done);
                if ready {
                    self.dispatch(scope, sender, style, workers, ix);
                }
            }

            // Nothing in flight can settle the remaining deferrals.
            if self.stopped || self.running + self.probing > 0 || self.deferred.is_empty() {
                break;
            }
            debug!(tasks = self.deferred.len(), "releasing deferred tasks");
            let waiting: Vec<NodeIndex> = self.deferred.keys().copied().collect();
            for ix in waiting {
                self.queue_probe(ix);
            }
        }

        let total = graph
            .indices()
            .filter(|&ix| match self.progress(ix) {
                Progress::Pending | Progress::Probing => self.coverage.is_required(ix),
                _ => true,
            })
            .count();
        self.span.pb_set_length(total as u64);
    }

    fn dispatch<'s>(
        &mut self,
        scope: &Scope<'s>,
        sender: &Sender<Event>,
        style: &Option<ProgressStyle>,
        workers: Workers<'a>,
        ix: NodeIndex,
    ) where
        'a: 's,
    {
        let graph = self.graph;
        let node = graph.node(ix);

        let action = match (self.coverage.is_covered(ix), self.coverage.unified(ix)) {
            (true, Some(unified)) => Action::Restore(unified),
            _ => {
                if let Some(violation) = self.enforcer.admit(node) {
                    if self.enforcer.is_strict() {
                        self.fail(ix, FailureKind::Policy, violation.into());
                        return;
                    }
                    self.report.violations.push(violation);
                }
                Action::Run(self.keys.key(ix))
            }
        };

        debug!(task = %node.id, ?action, "dispatching");
        self.set(ix, Progress::Running);
        self.running += 1;
        workers.spawn_action(scope, sender, style, ix, node, action);
    }

    /// Turns the end state into the report. Required tasks that never ran
    /// are listed as unscheduled.
    fn finish(mut self) -> RunReport {
        let mut blocked = vec![false; self.graph.len()];

        for &ix in self.graph.topological() {
            let waiting = matches!(self.progress(ix), Progress::Pending | Progress::Probing);
            if !waiting || !self.coverage.is_required(ix) {
                continue;
            }

            let failed_below = self.coverage.retained(ix).iter().any(|&dep| {
                self.progress(dep) == Progress::Failed || blocked[dep.index()]
            });
            blocked[ix.index()] = failed_below;

            let reason = if failed_below {
                Unscheduled::DependencyFailed
            } else {
                Unscheduled::Cancelled
            };
            self.report
                .unscheduled
                .push((self.graph.node(ix).id.clone(), reason));
        }

        if self.report.failures.is_empty() && !self.report.unscheduled.is_empty() {
            warn!(
                tasks = self.report.unscheduled.len(),
                "dispatch stalled with tasks left over"
            );
        }

        self.report.plan = self.coverage.plan();
        self.report
    }
}
