// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// What happens to in-flight work after the first confirmed failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Release `wait` at once; running attempts are abandoned.
    #[default]
    FailFast,
    /// Let every in-flight attempt finish before `wait` returns.
    WaitAll,
}

/// Tunables for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Failure policy.
    pub fail_mode: FailMode,
}
