use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::core::{ArcStr, task_name};
use crate::error::GraphError;

/// A requested build target.
///
/// Accepted forms are `unit`, `unit:task`, `mc:<mc>:unit` and
/// `mc:<mc>:unit:task`. The task may carry the `do_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub mc: Option<ArcStr>,
    pub unit: ArcStr,
    pub task: Option<ArcStr>,
}

impl FromStr for Target {
    type Err = GraphError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let malformed = || GraphError::MalformedTarget(text.to_string());

        let parts: Vec<&str> = text.split(':').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(malformed());
        }

        let (mc, rest) = match parts.as_slice() {
            ["mc" | "multiconfig", mc, rest @ ..] => (Some(*mc), rest),
            rest => (None, rest),
        };

        let (unit, task) = match rest {
            [unit] => (*unit, None),
            [unit, task] => (*unit, Some(task_name(task))),
            _ => return Err(malformed()),
        };

        Ok(Target {
            mc: mc.map(Into::into),
            unit: unit.into(),
            task: task.map(Into::into),
        })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(mc) = &self.mc {
            write!(f, "mc:{mc}:")?;
        }
        f.write_str(&self.unit)?;
        if let Some(task) = &self.task {
            write!(f, ":do_{task}")?;
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Target {
        text.parse().unwrap()
    }

    #[test]
    fn test_unit_only() {
        let target = parse("a1");
        assert_eq!(target.mc, None);
        assert_eq!(&*target.unit, "a1");
        assert_eq!(target.task, None);
    }

    #[test]
    fn test_unit_and_task() {
        let target = parse("a1:do_patch");
        assert_eq!(target.task.as_deref(), Some("patch"));
        assert_eq!(parse("a1:patch"), target);
    }

    #[test]
    fn test_multiconfig() {
        let target = parse("mc:mc1:b1");
        assert_eq!(target.mc.as_deref(), Some("mc1"));
        assert_eq!(&*target.unit, "b1");

        let target = parse("multiconfig:mc2:b1:do_build");
        assert_eq!(target.mc.as_deref(), Some("mc2"));
        assert_eq!(target.task.as_deref(), Some("build"));
        assert_eq!(target.to_string(), "mc:mc2:b1:do_build");
    }

    #[test]
    fn test_malformed() {
        for text in ["", "a1:", ":a1", "a1:b:c", "mc:mc1", "mc:mc1:a1:x:y"] {
            assert!(
                matches!(text.parse::<Target>(), Err(GraphError::MalformedTarget(_))),
                "{text} should be rejected"
            );
        }
    }
}
