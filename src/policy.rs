//! Setscene enforcement.
//!
//! With enforcement on, every task that has to run for real must either be
//! named by the allow-list or have been explicitly requested. Anything else
//! means the cache was expected to cover it and did not.

use std::str::FromStr;

use glob::Pattern;
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::{ConfigError, PolicyViolation};
use crate::graph::{TaskId, TaskNode};

/// Glob patterns over `unit:do_task`, for example `*:do_build` or
/// `a1:do_package_write_*`. The `do_` prefix may be left out.
///
/// Namespaced tasks match either with their namespace, `mc:mc1:a1:do_build`,
/// or without it.
#[derive(Debug, Clone, Default)]
pub struct AllowList(Vec<Pattern>);

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self, id: &TaskId) -> bool {
        let bare = format!("{}:do_{}", id.unit, id.task);
        let full = id.to_string();
        self.0
            .iter()
            .any(|pattern| pattern.matches(&bare) || pattern.matches(&full))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Adds the `do_` prefix to the task part of a pattern when it is missing.
fn normalise(entry: &str) -> String {
    match entry.rsplit_once(':') {
        Some((unit, task))
            if !task.starts_with("do_") && !task.starts_with(['*', '?', '[']) =>
        {
            format!("{unit}:do_{task}")
        }
        _ => entry.to_string(),
    }
}

impl FromStr for AllowList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let patterns = s
            .split_whitespace()
            .map(|entry| {
                Pattern::new(&normalise(entry))
                    .map_err(|err| ConfigError::Pattern(entry.to_string(), err))
            })
            .collect::<Result<_, _>>()?;

        Ok(AllowList(patterns))
    }
}

impl<'de> Deserialize<'de> for AllowList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Checks tasks that are about to run for real.
#[derive(Debug, Clone, Copy)]
pub struct Enforcer<'a> {
    enabled: bool,
    strict: bool,
    allow: &'a AllowList,
}

impl<'a> Enforcer<'a> {
    pub fn new(enabled: bool, strict: bool, allow: &'a AllowList) -> Self {
        Self {
            enabled,
            strict,
            allow,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.enabled && self.strict
    }

    /// Returns the violation for a notcovered task, if it is one.
    ///
    /// Explicitly requested tasks asked not to be substituted, which takes
    /// precedence over enforcement.
    pub fn check(&self, node: &TaskNode) -> Option<PolicyViolation> {
        if !self.enabled || node.explicit || self.allow.matches(&node.id) {
            return None;
        }

        Some(PolicyViolation {
            task: node.id.to_string(),
        })
    }

    /// Like [`Enforcer::check`], logging the violation when it is going to be
    /// tolerated.
    pub fn admit(&self, node: &TaskNode) -> Option<PolicyViolation> {
        let violation = self.check(node)?;
        if !self.strict {
            warn!("{violation}, running it anyway");
        }
        Some(violation)
    }
}
