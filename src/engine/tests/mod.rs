//! End to end runs of the runqueue against scripted executors and stores.

mod scenarios;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::bail;

use super::*;
use crate::core::{Hash32, OutputId};
use crate::graph::TaskId;
use crate::hash::{MemoryEquivalence, ValidSet};
use crate::provider::{Recipes, TaskRecipe, UnitRecipe};
use crate::store::MemoryStore;

pub(super) const TASKS: [&str; 14] = [
    "fetch",
    "unpack",
    "patch",
    "prepare_recipe_sysroot",
    "configure",
    "compile",
    "install",
    "package",
    "packagedata",
    "package_qa",
    "package_write_rpm",
    "package_write_ipk",
    "populate_sysroot",
    "build",
];

/// The usual pipeline of a unit. `deptask` entries only expand for units
/// listed in `depends`.
pub(super) fn unit(name: &str, depends: &[&str]) -> UnitRecipe {
    let mut unit = UnitRecipe::new(name)
        .task(TaskRecipe::new("fetch"))
        .task(TaskRecipe::new("unpack").after("fetch"))
        .task(TaskRecipe::new("patch").after("unpack"))
        .task(
            TaskRecipe::new("prepare_recipe_sysroot")
                .after("patch")
                .deptask("populate_sysroot"),
        )
        .task(TaskRecipe::new("configure").after("prepare_recipe_sysroot"))
        .task(TaskRecipe::new("compile").after("configure"))
        .task(TaskRecipe::new("install").after("compile"))
        .task(
            TaskRecipe::new("package")
                .after("install")
                .deptask("packagedata")
                .setscene(),
        )
        .task(TaskRecipe::new("packagedata").after("package").setscene())
        .task(TaskRecipe::new("package_qa").after("package").setscene())
        .task(TaskRecipe::new("package_write_rpm").after("package").setscene())
        .task(TaskRecipe::new("package_write_ipk").after("package").setscene())
        .task(TaskRecipe::new("populate_sysroot").after("install").setscene())
        .task(
            TaskRecipe::new("build")
                .after("packagedata")
                .after("package_qa")
                .after("package_write_rpm")
                .after("package_write_ipk")
                .after("populate_sysroot")
                .deptask("populate_sysroot")
                .deptask("packagedata")
                .deptask("package_write_rpm")
                .deptask("package_write_ipk"),
        );

    for other in depends {
        unit = unit.depends(other);
    }
    unit
}

/// `a1` and `c1` stand alone, `b1` and `d1` build on `a1`.
pub(super) fn recipes() -> Recipes {
    let mut recipes = Recipes::new();
    recipes
        .add(unit("a1", &[]))
        .add(unit("b1", &["a1"]))
        .add(unit("c1", &[]))
        .add(unit("d1", &["a1"]));
    recipes
}

/// Action names as printed by [`ActionRecord`].
pub(super) fn set<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> BTreeSet<String> {
    items.into_iter().map(|s| s.as_ref().to_string()).collect()
}

/// Every task of `unit` run for real, except `skip`.
pub(super) fn all(unit: &str, skip: &[&str]) -> Vec<String> {
    TASKS
        .iter()
        .filter(|task| !skip.contains(task))
        .map(|task| format!("{unit}:{task}"))
        .collect()
}

pub(super) fn setscene(unit: &str, tasks: &[&str]) -> Vec<String> {
    tasks
        .iter()
        .map(|task| format!("{unit}:{task}_setscene"))
        .collect()
}

pub(super) fn valid(entries: &str) -> ValidSet {
    entries.parse().unwrap()
}

pub(super) fn id(text: &str) -> TaskId {
    let target: crate::graph::Target = text.parse().unwrap();
    TaskId {
        mc: target.mc,
        unit: target.unit,
        task: target.task.unwrap(),
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Behaviour of the fake executor and store, keyed by action name.
#[derive(Default)]
pub(super) struct Script {
    slow: HashMap<String, Duration>,
    fail: HashSet<String>,
    panic: HashSet<String>,
    hooks: HashMap<String, Hook>,
    log: Mutex<Vec<String>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(mut self, name: &str, millis: u64) -> Self {
        self.slow
            .insert(name.to_string(), Duration::from_millis(millis));
        self
    }

    pub fn fail(mut self, name: &str) -> Self {
        self.fail.insert(name.to_string());
        self
    }

    pub fn panic(mut self, name: &str) -> Self {
        self.panic.insert(name.to_string());
        self
    }

    pub fn hook(mut self, name: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.insert(name.to_string(), Box::new(hook));
        self
    }

    /// Start (`+name`) and end (`-name`) marks in the order they happened.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Every action that was attempted.
    pub fn started(&self) -> BTreeSet<String> {
        self.log()
            .iter()
            .filter_map(|entry| entry.strip_prefix('+'))
            .map(str::to_string)
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    fn enter(&self, name: String) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("+{name}"));

        if let Some(hook) = self.hooks.get(&name) {
            hook();
        }
        if let Some(&delay) = self.slow.get(&name) {
            thread::sleep(delay);
        }

        self.log.lock().unwrap().push(format!("-{name}"));

        if self.panic.contains(&name) {
            panic!("{name} blew up");
        }
        if self.fail.contains(&name) {
            bail!("{name} exited with status 1");
        }
        Ok(())
    }
}

fn action(task: &TaskId, setscene: bool) -> String {
    ActionRecord {
        task: task.clone(),
        setscene,
    }
    .to_string()
}

struct ScriptedExecutor(Arc<Script>);

impl Executor for ScriptedExecutor {
    fn run(&self, task: &TaskId) -> anyhow::Result<OutputId> {
        self.0.enter(action(task, false))?;
        // Same unit and task in every namespace builds the same thing.
        Ok(OutputId(Hash32::hash(format!("{}:{}", task.unit, task.task))))
    }
}

struct ScriptedStore {
    script: Arc<Script>,
    inner: Arc<MemoryStore>,
}

impl ArtifactStore for ScriptedStore {
    fn contains(&self, unified: UnifiedId) -> bool {
        self.inner.contains(unified)
    }

    fn restore(&self, task: &TaskId, unified: UnifiedId) -> anyhow::Result<()> {
        self.script.enter(action(task, true))?;
        self.inner.restore(task, unified)
    }

    fn persist(&self, task: &TaskId, unified: UnifiedId) -> anyhow::Result<()> {
        self.inner.persist(task, unified)
    }
}

/// Everything that outlives a single run.
pub(super) struct Harness {
    pub recipes: Recipes,
    pub script: Arc<Script>,
    pub store: Arc<MemoryStore>,
    pub service: Option<Arc<MemoryEquivalence>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            recipes: recipes(),
            script: Arc::new(Script::new()),
            store: Arc::new(MemoryStore::new()),
            service: None,
        }
    }

    pub fn script(mut self, script: Script) -> Self {
        self.script = Arc::new(script);
        self
    }

    pub fn service(mut self, service: Arc<MemoryEquivalence>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn runqueue(&self) -> Runqueue<'_, Recipes> {
        let executor = Arc::new(ScriptedExecutor(self.script.clone()));
        let store = Arc::new(ScriptedStore {
            script: self.script.clone(),
            inner: self.store.clone(),
        });

        let runqueue = Runqueue::new(&self.recipes, executor, store);
        match &self.service {
            Some(service) => runqueue.service(service.clone()),
            None => runqueue,
        }
    }

    pub fn run(&self, config: &RunConfig) -> Result<RunReport, RunError> {
        self.runqueue().run(config)
    }
}

/// Runs `targets` once on a fresh harness with four workers.
pub(super) fn run(targets: &[&str], valid_set: &str) -> RunReport {
    let config = RunConfig::new(targets)
        .unwrap()
        .valid(valid(valid_set))
        .concurrency(4);
    Harness::new().run(&config).unwrap()
}
