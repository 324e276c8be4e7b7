use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use console::style;

use crate::coverage::Plan;
use crate::engine::Diagnostics;
use crate::error::PolicyViolation;
use crate::graph::TaskId;

/// One successfully completed action, printed as `a1:package` or
/// `mc1:b1:package_setscene`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionRecord {
    pub task: TaskId,
    pub setscene: bool,
}

impl Display for ActionRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.task.qualified_unit(), self.task.task)?;
        if self.setscene {
            f.write_str("_setscene")?;
        }
        Ok(())
    }
}

/// What a failed task was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Run,
    Restore,
    Persist,
    Policy,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FailureKind::Run => "run",
            FailureKind::Restore => "restore",
            FailureKind::Persist => "persist",
            FailureKind::Policy => "policy",
        })
    }
}

#[derive(Debug)]
pub struct Failure {
    pub task: TaskId,
    pub kind: FailureKind,
    pub error: anyhow::Error,
}

/// Why a required task never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unscheduled {
    DependencyFailed,
    Cancelled,
}

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Completed actions, in completion order.
    pub actions: Vec<ActionRecord>,
    pub failures: Vec<Failure>,
    pub unscheduled: Vec<(TaskId, Unscheduled)>,
    /// Tolerated enforcement violations.
    pub violations: Vec<PolicyViolation>,
    /// Initial plan for a dry run, what actually happened otherwise.
    pub plan: Plan,
    pub diagnostics: Diagnostics,
    pub dry_run: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.unscheduled.is_empty()
    }

    /// Completed actions as printed records, without order.
    pub fn action_set(&self) -> BTreeSet<String> {
        self.actions.iter().map(ToString::to_string).collect()
    }

    pub fn failed(&self, task: &TaskId) -> Option<&Failure> {
        self.failures.iter().find(|f| &f.task == task)
    }

    pub fn unscheduled(&self, task: &TaskId) -> Option<Unscheduled> {
        self.unscheduled
            .iter()
            .find(|(id, _)| id == task)
            .map(|&(_, reason)| reason)
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.dry_run {
            writeln!(
                f,
                "{} {} to restore, {} to run",
                style("Plan:").bold(),
                self.plan.covered.len(),
                self.plan.notcovered.len(),
            )?;
        } else {
            let restored = self.actions.iter().filter(|a| a.setscene).count();
            writeln!(
                f,
                "{} {} run, {} restored, {} failed, {} not run",
                style("Tasks:").bold(),
                self.actions.len() - restored,
                restored,
                self.failures.len(),
                self.unscheduled.len(),
            )?;
        }

        for failure in &self.failures {
            writeln!(
                f,
                "  {} {} ({}): {:#}",
                style("failed").red(),
                failure.task,
                failure.kind,
                failure.error
            )?;
        }

        for (task, reason) in &self.unscheduled {
            let reason = match reason {
                Unscheduled::DependencyFailed => "a dependency failed",
                Unscheduled::Cancelled => "cancelled",
            };
            writeln!(f, "  {} {task}: {reason}", style("skipped").yellow())?;
        }

        for violation in &self.violations {
            writeln!(f, "  {} {violation}", style("warning").yellow())?;
        }

        Ok(())
    }
}
