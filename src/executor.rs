use crate::core::OutputId;
use crate::graph::TaskId;

/// Runs a task for real.
///
/// Called from the worker pool, possibly for many tasks at once. The
/// returned identity describes the produced output and is what the hash
/// equivalence service compares across signatures.
pub trait Executor: Send + Sync {
    fn run(&self, task: &TaskId) -> anyhow::Result<OutputId>;
}

impl<F> Executor for F
where
    F: Fn(&TaskId) -> anyhow::Result<OutputId> + Send + Sync,
{
    fn run(&self, task: &TaskId) -> anyhow::Result<OutputId> {
        self(task)
    }
}
