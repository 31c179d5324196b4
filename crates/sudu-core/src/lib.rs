// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! sudu-core: concurrent condition-dependency resolution.
//!
//! Tasks declare what they need by waiting on named conditions and publish
//! what they produce by satisfying other conditions; there is no explicit call
//! graph. A task that read a condition which later changes is re-run (redo).
//! Conditions can be seeded with legacy guesses, typically restored from a
//! [`SnapshotCache`]: tasks start against the guesses right away and are
//! promoted to confirmed without re-running once the real values turn out to
//! match.
//!
//! - [`ConditionStore`] / [`Scope`]: the shared condition table.
//! - [`Orchestrator`]: tasks with redo, legacy promotion and cache integration.
//! - [`TaskGroup`]: plain fire-and-forget threads with first-failure capture.
//! - [`ConditionTask`]: a store plus a group, no legacy tracking.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod barrier;
mod cache;
mod condition;
mod condition_task;
/// Configuration types.
pub mod config;
mod failure;
mod gate;
mod group;
mod orchestrator;
mod task;

pub use cache::{CacheBinding, SnapshotCache};
pub use condition::{
    CancelReason, CancelSignal, Cancelled, ConditionKey, ConditionStore, ConditionValue, Observed,
    ReadListener, Resolution, Scope, WriteBatch, WriteListener,
};
pub use condition_task::ConditionTask;
pub use config::{FailMode, OrchestratorConfig};
pub use failure::TaskFailure;
pub use group::TaskGroup;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use task::{TaskId, TaskState};
