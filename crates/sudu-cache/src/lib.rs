// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! sudu-cache: snapshot cache backends for sudu orchestrators.
//!
//! [`MemoryCache`] keeps snapshots in process with expiry and background
//! eviction; [`FileCache`] keeps them as JSON documents so they survive the
//! process. Both implement [`sudu_core::SnapshotCache`] and report problems
//! through `tracing` rather than to the orchestrator.
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
    clippy::module_name_repetitions
)]

/// Retention settings.
pub mod config;
mod fs;
mod memory;

pub use config::CacheConfig;
pub use fs::{CacheError, FileCache};
pub use memory::MemoryCache;
