// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The `A -> B, C -> d` chain: `B = 2A`, `C = 3A`, `d = B * C`.
//!
//! Mirrors `sudu_dry_tests::ChainScenario` with checked arithmetic, so user
//! input that overflows fails the run with an error. Keep the two in
//! step.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use sudu_core::{CacheBinding, Orchestrator, OrchestratorConfig};
use tracing::info;

const A: &str = "A";
const B: &str = "B";
const C: &str = "C";
const D: &str = "d";

/// Input and pacing of one chain run.
#[derive(Debug, Clone, Copy)]
pub struct ChainOptions {
    pub a: i64,
    pub b_delay: Duration,
    pub c_delay: Duration,
}

/// How many times each body ran.
#[derive(Debug, Serialize)]
pub struct Runs {
    pub b: usize,
    pub c: usize,
    pub d: usize,
}

/// What `sudu chain` prints.
#[derive(Debug, Serialize)]
pub struct ChainReport {
    pub a: i64,
    pub d: i64,
    /// Chain outputs preloaded from the cache as legacy guesses.
    pub restored: usize,
    pub runs: Runs,
}

pub fn run(
    cache: CacheBinding<String, i64>,
    config: &OrchestratorConfig,
    options: &ChainOptions,
) -> Result<ChainReport> {
    let orchestrator = Orchestrator::builder()
        .config(config.clone())
        .cache(cache)
        .build();
    let restored = [B, C, D]
        .into_iter()
        .filter(|name| orchestrator.is_legacy(*name))
        .count();
    info!(restored, a = options.a, "running chain");

    let b_runs = Arc::new(AtomicUsize::new(0));
    let c_runs = Arc::new(AtomicUsize::new(0));
    let d_runs = Arc::new(AtomicUsize::new(0));

    let runs = Arc::clone(&b_runs);
    let delay = options.b_delay;
    orchestrator.go(move |scope| {
        runs.fetch_add(1, Ordering::SeqCst);
        let a = scope.require(A)?;
        thread::sleep(delay);
        let b = a.checked_mul(2).ok_or_else(|| anyhow!("{B} overflows for {A}={a}"))?;
        scope.satisfy([(B, b)]);
        Ok(())
    });

    let runs = Arc::clone(&c_runs);
    let delay = options.c_delay;
    orchestrator.go(move |scope| {
        runs.fetch_add(1, Ordering::SeqCst);
        let a = scope.require(A)?;
        thread::sleep(delay);
        let c = a.checked_mul(3).ok_or_else(|| anyhow!("{C} overflows for {A}={a}"))?;
        scope.satisfy([(C, c)]);
        Ok(())
    });

    let runs = Arc::clone(&d_runs);
    orchestrator.go(move |scope| {
        runs.fetch_add(1, Ordering::SeqCst);
        let b = scope.require(B)?;
        let c = scope.require(C)?;
        let d = b
            .checked_mul(c)
            .ok_or_else(|| anyhow!("{D} overflows for {B}={b}, {C}={c}"))?;
        scope.satisfy([(D, d)]);
        Ok(())
    });

    orchestrator.satisfy([(A, options.a)]);
    orchestrator.wait()?;
    let d = orchestrator.require(D)?;

    Ok(ChainReport {
        a: options.a,
        d,
        restored,
        runs: Runs {
            b: b_runs.load(Ordering::SeqCst),
            c: c_runs.load(Ordering::SeqCst),
            d: d_runs.load(Ordering::SeqCst),
        },
    })
}
