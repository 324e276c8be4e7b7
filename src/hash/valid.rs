use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::core::{Hash32, Signature};
use crate::error::ConfigError;
use crate::graph::{TaskId, Target};

/// Locally supplied set of cache entries known to be valid.
///
/// Entries are whitespace separated and take one of three forms:
///
/// * `a1:do_package` matches the task whatever its signature,
/// * `a1:do_package:<hex>` matches the task only with that signature,
/// * `<hex>` matches any task with that signature.
///
/// Namespaced tasks are written `mc:mc1:a1:do_package`.
#[derive(Debug, Clone, Default)]
pub struct ValidSet {
    tasks: HashSet<TaskId>,
    keyed: HashSet<(TaskId, Signature)>,
    signatures: HashSet<Signature>,
}

impl ValidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_task(&mut self, id: TaskId) -> &mut Self {
        self.tasks.insert(id);
        self
    }

    pub fn insert_keyed(&mut self, id: TaskId, signature: Signature) -> &mut Self {
        self.keyed.insert((id, signature));
        self
    }

    pub fn insert_signature(&mut self, signature: Signature) -> &mut Self {
        self.signatures.insert(signature);
        self
    }

    pub fn contains(&self, id: &TaskId, signature: Signature) -> bool {
        self.signatures.contains(&signature)
            || self.tasks.contains(id)
            || self.keyed.contains(&(id.clone(), signature))
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.keyed.is_empty() && self.signatures.is_empty()
    }

    fn parse_entry(&mut self, entry: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::ValidEntry(entry.to_string());

        if let Some(hash) = Hash32::from_hex(entry) {
            self.insert_signature(Signature(hash));
            return Ok(());
        }

        let (task, signature) = match entry.rsplit_once(':') {
            Some((task, hex)) => match Hash32::from_hex(hex) {
                Some(hash) => (task, Some(Signature(hash))),
                None => (entry, None),
            },
            None => (entry, None),
        };

        let target: Target = task.parse().map_err(|_| invalid())?;
        let id = TaskId {
            mc: target.mc,
            unit: target.unit,
            task: target.task.ok_or_else(invalid)?,
        };

        match signature {
            Some(signature) => self.insert_keyed(id, signature),
            None => self.insert_task(id),
        };

        Ok(())
    }
}

impl FromStr for ValidSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = ValidSet::new();
        for entry in s.split_whitespace() {
            set.parse_entry(entry)?;
        }
        Ok(set)
    }
}

impl<'de> Deserialize<'de> for ValidSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
