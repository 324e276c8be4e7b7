use thiserror::Error;

use crate::engine::RunReport;

/// Problems found while assembling the task graph. Always fatal, nothing is
/// dispatched once one of these is raised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Malformed target '{0}'")]
    MalformedTarget(String),

    #[error("Target '{target}' refers to multiconfig '{mc}', which is not configured")]
    UnknownMulticonfig { target: String, mc: String },

    #[error("Nothing provides unit '{0}'")]
    UnknownUnit(String),

    #[error("Unit '{unit}' has no task 'do_{task}'")]
    UnknownTask { unit: String, task: String },

    #[error("Task '{from}' depends on '{to}', which cannot be resolved")]
    UnresolvedDependency { from: String, to: String },

    #[error("Dependency cycle detected through '{0}'")]
    Cycle(String),
}

/// A task that would have to run for real while setscene enforcement is
/// active and which is not exempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Task '{task}' is not covered by setscene and not in the enforcement allow-list")]
pub struct PolicyViolation {
    pub task: String,
}

/// The hash equivalence service could not be reached or answered garbage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Hash equivalence service unavailable: {0}")]
pub struct ServiceUnavailable(pub String);

impl From<std::io::Error> for ServiceUnavailable {
    fn from(err: std::io::Error) -> Self {
        ServiceUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceUnavailable {
    fn from(err: serde_json::Error) -> Self {
        ServiceUnavailable(format!("malformed reply: {err}"))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid allow-list pattern '{0}':\n{1}")]
    Pattern(String, glob::PatternError),

    #[error("Invalid valid-set entry '{0}'")]
    ValidEntry(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Error while building the task graph.\n{0}")]
    Graph(#[from] GraphError),

    #[error("Setscene enforcement failed for {} task(s):\n{}", .0.len(), list(.0))]
    Policy(Vec<PolicyViolation>),

    #[error("Failed to build the worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Failed(Box<RunReport>),
}

fn list(violations: &[PolicyViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
