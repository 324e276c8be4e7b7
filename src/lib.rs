#![forbid(unsafe_code)]
//! Build task orchestration with cache substitution.
//!
//! Given a set of targets, `tsumiki` assembles the graph of every task they
//! need, decides which tasks can be restored from previously built artifacts
//! (their *setscene* variant) instead of running, and dispatches the rest on
//! a worker pool in dependency order.
//!
//! Every task has a signature: a digest of its static inputs and of its
//! dependencies' signatures. A hash equivalence service can map different
//! signatures that produced the same output to one unified identity.
//! Artifacts are looked up under a key that hashes the same inputs with the
//! dependencies' unified identities instead, so a change that did not alter
//! any output still reuses the cache downstream. Answers from the service
//! that arrive while the run is in progress prune work that has not started
//! yet.
//!
//! The pieces, bottom up:
//!
//! * [`Provider`] answers questions about units and tasks, [`Recipes`] is an
//!   in-memory one.
//! * [`GraphBuilder`] turns targets into a [`TaskGraph`] with signatures.
//! * [`HashClient`] checks validity against a [`ValidSet`], an
//!   [`EquivalenceService`] and an [`ArtifactStore`].
//! * [`Coverage`] decides what is covered and what runs.
//! * [`Enforcer`] applies the setscene enforcement policy.
//! * [`Runqueue`] ties everything together and dispatches.

mod config;
mod core;
mod coverage;
mod engine;
mod error;
mod executor;
mod graph;
mod hash;
mod policy;
mod provider;
mod store;
mod utils;

pub use crate::config::RunConfig;
pub use crate::core::{ArcStr, Hash32, HexError, OutputId, Signature, UnifiedId};
pub use crate::coverage::{Coverage, Plan};
pub use crate::engine::{
    ActionRecord, Diagnostics, Failure, FailureKind, RunReport, Runqueue, TaskExecution,
    Unscheduled,
};
pub use crate::error::*;
pub use crate::executor::Executor;
pub use crate::graph::{GraphBuilder, TaskGraph, TaskId, TaskNode, Target};
pub use crate::hash::{
    EquivalenceService, HashClient, MemoryEquivalence, RemoteEquivalence, Reply, Request,
    ValidSet,
};
pub use crate::policy::{AllowList, Enforcer};
pub use crate::provider::{Provider, Recipes, TaskRecipe, TaskRef, UnitRecipe};
pub use crate::store::{ArtifactStore, MemoryStore};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
