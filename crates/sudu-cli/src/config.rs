// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CLI configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sudu_cache::CacheConfig;
use sudu_core::OrchestratorConfig;

/// Everything `--config` may set. Missing sections take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Orchestrator tunables.
    pub orchestrator: OrchestratorConfig,
    /// Snapshot retention.
    pub cache: CacheConfig,
    /// Cache namespace the chain snapshot is stored under.
    pub namespace: String,
    /// Cache key within the namespace.
    pub key: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            cache: CacheConfig::default(),
            namespace: "sudu-cli".to_owned(),
            key: "chain".to_owned(),
        }
    }
}

impl CliConfig {
    /// Reads `path`, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse config {}", path.display()))
    }
}

/// `explicit`, or the platform cache directory (e.g. `~/.cache/sudu`).
pub fn cache_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let proj = ProjectDirs::from("dev", "flyingrobots", "sudu")
        .ok_or_else(|| anyhow!("could not resolve cache dir"))?;
    Ok(proj.cache_dir().to_path_buf())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sudu_core::FailMode;

    #[test]
    fn partial_config_keeps_defaults() {
        let parsed: CliConfig =
            serde_json::from_str(r#"{"orchestrator":{"fail_mode":"wait_all"},"key":"k"}"#)
                .unwrap();
        assert_eq!(parsed.orchestrator.fail_mode, FailMode::WaitAll);
        assert_eq!(parsed.key, "k");
        assert_eq!(parsed.namespace, "sudu-cli");
        assert_eq!(parsed.cache, CacheConfig::default());
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(CliConfig::load(None).unwrap(), CliConfig::default());
    }
}
