//! Recipe metadata as seen by the engine.
//!
//! Parsing recipes and evaluating their variables happens elsewhere. The
//! engine only needs a deterministic view of each unit: which tasks it has,
//! what each task depends on, a digest of each task's static inputs, and
//! whether a task can be restored from the setscene cache.
//!
//! [`Recipes`] is an in-memory implementation of that view, used by embedders
//! that already hold evaluated metadata and by the test-suite.

use std::collections::BTreeMap;

use crate::core::{ArcStr, Blake3Hasher, Hash32, task_name};

/// A reference to a task of some unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskRef {
    pub unit: ArcStr,
    pub task: ArcStr,
}

impl TaskRef {
    pub fn new(unit: impl Into<ArcStr>, task: &str) -> Self {
        Self {
            unit: unit.into(),
            task: task_name(task).into(),
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:do_{}", self.unit, self.task)
    }
}

/// Source of unit and task metadata.
///
/// Every method must be deterministic for the duration of a run: the same
/// question always gets the same answer.
pub trait Provider {
    /// Ordered task names of `unit`, or `None` if nothing provides it.
    fn tasks_of(&self, unit: &str) -> Option<Vec<ArcStr>>;

    /// Direct dependencies of a task. Units named here are resolved in the
    /// namespace of the consumer.
    fn dependencies_of(&self, unit: &str, task: &str) -> Vec<TaskRef>;

    /// Digest of everything that affects the task's output apart from its
    /// dependencies.
    fn signature_inputs(&self, unit: &str, task: &str) -> Hash32;

    /// Whether the task has a setscene variant that can restore its output.
    fn has_setscene(&self, unit: &str, task: &str) -> bool;

    /// Task run when a target names only the unit.
    fn default_task(&self, _unit: &str) -> ArcStr {
        "build".into()
    }
}

/// Declaration of one task inside a [`UnitRecipe`].
#[derive(Debug, Clone)]
pub struct TaskRecipe {
    name: ArcStr,
    after: Vec<ArcStr>,
    needs: Vec<TaskRef>,
    deptask: Vec<ArcStr>,
    setscene: bool,
    inputs: String,
}

impl TaskRecipe {
    pub fn new(name: &str) -> Self {
        Self {
            name: task_name(name).into(),
            after: Vec::new(),
            needs: Vec::new(),
            deptask: Vec::new(),
            setscene: false,
            inputs: String::new(),
        }
    }

    /// Depends on another task of the same unit.
    pub fn after(mut self, task: &str) -> Self {
        self.after.push(task_name(task).into());
        self
    }

    /// Depends on a task of another unit.
    pub fn needs(mut self, unit: &str, task: &str) -> Self {
        self.needs.push(TaskRef::new(unit, task));
        self
    }

    /// Depends on `task` of every unit listed in the unit's `depends`.
    pub fn deptask(mut self, task: &str) -> Self {
        self.deptask.push(task_name(task).into());
        self
    }

    /// Marks the task as restorable from the setscene cache.
    pub fn setscene(mut self) -> Self {
        self.setscene = true;
        self
    }

    /// Extra content folded into the task signature.
    pub fn inputs(mut self, inputs: impl Into<String>) -> Self {
        self.inputs = inputs.into();
        self
    }
}

/// Declaration of one unit for [`Recipes`].
#[derive(Debug, Clone)]
pub struct UnitRecipe {
    name: ArcStr,
    tasks: Vec<TaskRecipe>,
    depends: Vec<ArcStr>,
    default_task: ArcStr,
    inputs: String,
}

impl UnitRecipe {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            depends: Vec::new(),
            default_task: "build".into(),
            inputs: String::new(),
        }
    }

    pub fn task(mut self, task: TaskRecipe) -> Self {
        self.tasks.push(task);
        self
    }

    /// Unit-level build dependency, expanded through [`TaskRecipe::deptask`].
    pub fn depends(mut self, unit: &str) -> Self {
        self.depends.push(unit.into());
        self
    }

    pub fn default_task(mut self, task: &str) -> Self {
        self.default_task = task_name(task).into();
        self
    }

    /// Unit-wide content folded into every task signature.
    pub fn inputs(mut self, inputs: impl Into<String>) -> Self {
        self.inputs = inputs.into();
        self
    }

    fn get(&self, task: &str) -> Option<&TaskRecipe> {
        self.tasks.iter().find(|t| &*t.name == task)
    }
}

/// In-memory [`Provider`].
#[derive(Debug, Clone, Default)]
pub struct Recipes {
    units: BTreeMap<ArcStr, UnitRecipe>,
}

impl Recipes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit, replacing any previous unit with the same name.
    pub fn add(&mut self, unit: UnitRecipe) -> &mut Self {
        self.units.insert(unit.name.clone(), unit);
        self
    }

    /// Changes the static inputs of one task, as if its recipe was edited.
    /// Returns `false` if the task does not exist.
    pub fn taint(&mut self, unit: &str, task: &str, inputs: impl Into<String>) -> bool {
        let task = task_name(task);
        match self
            .units
            .get_mut(unit)
            .and_then(|u| u.tasks.iter_mut().find(|t| &*t.name == task))
        {
            Some(recipe) => {
                recipe.inputs = inputs.into();
                true
            }
            None => false,
        }
    }

    fn task(&self, unit: &str, task: &str) -> Option<(&UnitRecipe, &TaskRecipe)> {
        let unit = self.units.get(unit)?;
        let task = unit.get(task)?;
        Some((unit, task))
    }
}

impl Provider for Recipes {
    fn tasks_of(&self, unit: &str) -> Option<Vec<ArcStr>> {
        self.units
            .get(unit)
            .map(|u| u.tasks.iter().map(|t| t.name.clone()).collect())
    }

    fn dependencies_of(&self, unit: &str, task: &str) -> Vec<TaskRef> {
        let Some((recipe, task)) = self.task(unit, task) else {
            return Vec::new();
        };

        let mut deps = Vec::new();

        for name in &task.after {
            deps.push(TaskRef {
                unit: recipe.name.clone(),
                task: name.clone(),
            });
        }

        deps.extend(task.needs.iter().cloned());

        for name in &task.deptask {
            for other in &recipe.depends {
                deps.push(TaskRef {
                    unit: other.clone(),
                    task: name.clone(),
                });
            }
        }

        deps
    }

    fn signature_inputs(&self, unit: &str, task: &str) -> Hash32 {
        let mut hasher = Blake3Hasher::default();
        if let Some((recipe, task)) = self.task(unit, task) {
            hasher
                .field(&recipe.inputs)
                .field(&task.inputs)
                .field([task.setscene as u8]);
        }
        hasher.into()
    }

    fn has_setscene(&self, unit: &str, task: &str) -> bool {
        self.task(unit, task).is_some_and(|(_, t)| t.setscene)
    }

    fn default_task(&self, unit: &str) -> ArcStr {
        self.units
            .get(unit)
            .map(|u| u.default_task.clone())
            .unwrap_or_else(|| "build".into())
    }
}
