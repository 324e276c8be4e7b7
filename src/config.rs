use serde::Deserialize;

use crate::error::GraphError;
use crate::graph::Target;
use crate::hash::ValidSet;
use crate::policy::AllowList;

/// Everything a single invocation needs to know.
///
/// Can be assembled with the builder methods or deserialised, in which case
/// the valid set and the allow-list are whitespace separated strings:
///
/// ```json
/// {
///   "targets": ["b1", "mc:mc1:b1"],
///   "multiconfigs": ["mc1"],
///   "valid": "a1:do_package a1:do_populate_sysroot",
///   "enforce": true,
///   "allow_list": "*:do_build"
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub targets: Vec<Target>,
    /// Task run for targets that name only a unit.
    pub task: Option<String>,
    /// Run every target task for real, even if the cache could cover it.
    pub force: bool,
    /// Compute the plan without dispatching anything.
    pub dry_run: bool,
    pub enforce: bool,
    pub allow_list: AllowList,
    /// Abort before dispatch when enforcement finds violations.
    pub strict: bool,
    /// Worker count, `0` picks one per core.
    pub concurrency: usize,
    pub valid: ValidSet,
    pub multiconfigs: Vec<String>,
    /// Keep dispatching independent work after a failure.
    pub keep_going: bool,
    /// Run a task for real when restoring it from the cache fails.
    pub fallback_on_restore_failure: bool,
    /// Address of a remote hash equivalence service.
    pub hashserv: Option<String>,
}

impl RunConfig {
    pub fn new<I, S>(targets: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .map(|target| target.as_ref().parse())
            .collect::<Result<_, _>>()?;

        Ok(Self {
            targets,
            ..Default::default()
        })
    }

    pub fn task(mut self, task: &str) -> Self {
        self.task = Some(task.to_string());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Turns enforcement on with the given allow-list.
    pub fn enforce(mut self, allow_list: AllowList, strict: bool) -> Self {
        self.enforce = true;
        self.allow_list = allow_list;
        self.strict = strict;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn valid(mut self, valid: ValidSet) -> Self {
        self.valid = valid;
        self
    }

    pub fn multiconfigs<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.multiconfigs = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn fallback_on_restore_failure(mut self, fallback: bool) -> Self {
        self.fallback_on_restore_failure = fallback;
        self
    }

    pub fn hashserv(mut self, address: &str) -> Self {
        self.hashserv = Some(address.to_string());
        self
    }
}
