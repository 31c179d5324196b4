// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! sudu developer CLI.
//!
//! Runs the chain scenario against a JSON snapshot cache so that legacy
//! preload, promotion and redo can be observed across process runs. Results
//! are printed to stdout as one JSON object; logs go to stderr (`RUST_LOG`).

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sudu_cache::FileCache;
use sudu_core::{CacheBinding, FailMode};
use tracing_subscriber::EnvFilter;

mod chain;
mod config;

use chain::ChainOptions;
use config::CliConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run sudu scenarios against a persistent snapshot cache")]
struct Args {
    /// JSON config file (orchestrator, cache, namespace, key)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding cached snapshots (defaults to the platform cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run A -> B, C -> d with the given input and print the outcome
    Chain {
        /// Value satisfied for `A`
        #[arg(long, allow_negative_numbers = true)]
        a: i64,
        /// Let in-flight tasks finish after a failure
        #[arg(long)]
        wait_all: bool,
        /// Delay of the `B` task between reading `A` and writing `B`
        #[arg(long, default_value_t = 1)]
        b_delay_ms: u64,
        /// Delay of the `C` task between reading `A` and writing `C`
        #[arg(long, default_value_t = 2)]
        c_delay_ms: u64,
    },
    /// Delete the cached chain snapshot
    Forget,
    /// Delete every expired snapshot under the cache directory
    Sweep,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = CliConfig::load(args.config.as_deref())?;
    let dir = config::cache_dir(args.cache_dir)?;
    let cache = FileCache::open_with(&dir, &config.cache)
        .with_context(|| format!("open cache dir {}", dir.display()))?;

    let output = match args.cmd {
        Command::Chain {
            a,
            wait_all,
            b_delay_ms,
            c_delay_ms,
        } => {
            if wait_all {
                config.orchestrator.fail_mode = FailMode::WaitAll;
            }
            let binding: CacheBinding<String, i64> = CacheBinding::new(
                Arc::new(cache),
                config.namespace.clone(),
                config.key.clone(),
            );
            let options = ChainOptions {
                a,
                b_delay: Duration::from_millis(b_delay_ms),
                c_delay: Duration::from_millis(c_delay_ms),
            };
            let report = chain::run(binding, &config.orchestrator, &options)?;
            serde_json::to_value(report)?
        }
        Command::Forget => json!({ "forgotten": cache.remove(&config.namespace, &config.key)? }),
        Command::Sweep => json!({ "swept": cache.sweep()? }),
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{output}")?;
    Ok(())
}
