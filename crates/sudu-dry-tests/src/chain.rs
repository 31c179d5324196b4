// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The `A -> B, C -> d` chain used by scenario tests.
//!
//! - task `b` requires `A` and satisfies `B = 2A`;
//! - task `c` requires `A` and satisfies `C = 3A`;
//! - task `d` requires `B` and `C` and satisfies `d = B * C`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sudu_core::{Orchestrator, TaskId};

/// Condition names used by the chain.
pub mod names {
    /// Input.
    pub const A: &str = "A";
    /// `2A`.
    pub const B: &str = "B";
    /// `3A`.
    pub const C: &str = "C";
    /// `B * C`.
    pub const D: &str = "d";
}

/// Builder for the chain tasks.
#[derive(Debug, Clone, Copy)]
pub struct ChainScenario {
    b_delay: Duration,
    c_delay: Duration,
}

impl Default for ChainScenario {
    fn default() -> Self {
        Self {
            b_delay: Duration::from_millis(1),
            c_delay: Duration::from_millis(2),
        }
    }
}

impl ChainScenario {
    /// Chain with the default delays (1 ms for `B`, 2 ms for `C`).
    pub fn new() -> Self {
        Self::default()
    }

    /// How long task `b` sleeps between reading `A` and writing `B`.
    pub fn b_delay(mut self, delay: Duration) -> Self {
        self.b_delay = delay;
        self
    }

    /// How long task `c` sleeps between reading `A` and writing `C`.
    pub fn c_delay(mut self, delay: Duration) -> Self {
        self.c_delay = delay;
        self
    }

    /// Registers the three tasks on `orchestrator`.
    pub fn spawn(self, orchestrator: &Orchestrator<&'static str, i64>) -> ChainRuns {
        let b_runs = Arc::new(AtomicUsize::new(0));
        let c_runs = Arc::new(AtomicUsize::new(0));
        let d_runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&b_runs);
        let b_delay = self.b_delay;
        let b = orchestrator.go(move |scope| {
            counter.fetch_add(1, Ordering::SeqCst);
            let a = scope.require(names::A)?;
            thread::sleep(b_delay);
            scope.satisfy([(names::B, a * 2)]);
            Ok(())
        });

        let counter = Arc::clone(&c_runs);
        let c_delay = self.c_delay;
        let c = orchestrator.go(move |scope| {
            counter.fetch_add(1, Ordering::SeqCst);
            let a = scope.require(names::A)?;
            thread::sleep(c_delay);
            scope.satisfy([(names::C, a * 3)]);
            Ok(())
        });

        let counter = Arc::clone(&d_runs);
        let d = orchestrator.go(move |scope| {
            counter.fetch_add(1, Ordering::SeqCst);
            let b = scope.require(names::B)?;
            let c = scope.require(names::C)?;
            scope.satisfy([(names::D, b * c)]);
            Ok(())
        });

        ChainRuns {
            ids: [b, c, d],
            b: b_runs,
            c: c_runs,
            d: d_runs,
        }
    }
}

/// Run counters for the chain tasks.
#[derive(Debug, Clone)]
pub struct ChainRuns {
    /// Ids of tasks `b`, `c`, `d` in that order.
    pub ids: [TaskId; 3],
    b: Arc<AtomicUsize>,
    c: Arc<AtomicUsize>,
    d: Arc<AtomicUsize>,
}

impl ChainRuns {
    /// Times each body has run, as `(b, c, d)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.b.load(Ordering::SeqCst),
            self.c.load(Ordering::SeqCst),
            self.d.load(Ordering::SeqCst),
        )
    }
}
