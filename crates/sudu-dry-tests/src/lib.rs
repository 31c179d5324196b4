// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for sudu crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`cache`] - In-memory snapshot cache fake that counts calls
//! - [`chain`] - The `A -> B, C -> d` chain scenario

pub mod cache;
pub mod chain;

pub use cache::RecordingCache;
pub use chain::{ChainRuns, ChainScenario};
