// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Fail-fast, wait-all, panics and cancellations surfacing from `wait`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sudu_core::{Cancelled, FailMode, Orchestrator, OrchestratorConfig, TaskState};

type Orch = Orchestrator<&'static str, i64>;

#[derive(Debug, thiserror::Error)]
#[error("quota exceeded")]
struct QuotaExceeded;

// ── 1. fail-fast ────────────────────────────────────────────────────

#[test]
fn fail_fast_returns_without_waiting_for_blocked_tasks() {
    let orchestrator = Orch::new();
    assert_eq!(orchestrator.fail_mode(), FailMode::FailFast);

    for name in ["never-1", "never-2"] {
        orchestrator.go(move |scope| {
            scope.require(name)?;
            Ok(())
        });
    }
    let failing = orchestrator.go(|_| Err(QuotaExceeded.into()));

    let started = Instant::now();
    let failure = orchestrator.wait().unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(failure.task, failing);
    assert!(failure.downcast_ref::<QuotaExceeded>().is_some());
    assert_eq!(failure.to_string(), format!("{failing} failed: quota exceeded"));
    assert_eq!(orchestrator.task_state(failing), Some(TaskState::Fail));
}

#[test]
fn go_after_fail_fast_failure_is_refused() {
    let orchestrator = Orch::new();
    orchestrator.go(|_| anyhow::bail!("first"));
    assert!(orchestrator.wait().is_err());

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let late = orchestrator.go(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let failure = orchestrator.wait().unwrap_err();
    assert_eq!(failure.error().to_string(), "first");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.task_attempts(late), Some(0));
    assert_eq!(orchestrator.spawned(), 2);
}

// ── 2. wait-all ─────────────────────────────────────────────────────

#[test]
fn wait_all_lets_in_flight_tasks_finish() {
    let orchestrator = Orch::builder()
        .config(OrchestratorConfig {
            fail_mode: FailMode::WaitAll,
        })
        .build();
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    orchestrator.go(move |scope| {
        scope.require("gate")?;
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    orchestrator.go(|_| anyhow::bail!("early failure"));

    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(20));
            orchestrator.satisfy([("gate", 1)]);
        });
        let failure = orchestrator.wait().unwrap_err();
        assert_eq!(failure.error().to_string(), "early failure");
        assert!(finished.load(Ordering::SeqCst));
    });
    assert_eq!(orchestrator.running(), 0);
}

#[test]
fn only_the_first_failure_is_kept() {
    let orchestrator = Orch::builder().fail_mode(FailMode::WaitAll).build();
    let first = orchestrator.go(|_| anyhow::bail!("one"));
    orchestrator.go(|scope| {
        scope.require("later")?;
        anyhow::bail!("two")
    });
    let deadline = Instant::now() + Duration::from_secs(5);
    while orchestrator.task_state(first) != Some(TaskState::Fail) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    orchestrator.satisfy([("later", 1)]);
    let failure = orchestrator.wait().unwrap_err();
    assert_eq!(failure.error().to_string(), "one");
}

// ── 3. panics ───────────────────────────────────────────────────────

#[test]
#[allow(clippy::panic)]
fn confirmed_panic_is_reraised_by_wait() {
    let orchestrator = Orch::new();
    orchestrator.go(|_| panic!("kaboom"));

    let payload = catch_unwind(AssertUnwindSafe(|| orchestrator.wait())).unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"kaboom"));
}

// ── 4. cancellations ────────────────────────────────────────────────

#[test]
fn require_on_a_cancelled_condition_fails_the_task() {
    let orchestrator = Orch::new();
    let id = orchestrator.go(|scope| {
        let job = scope.require("job")?;
        scope.satisfy([("result", job)]);
        Ok(())
    });
    orchestrator.cancel([("job", 7)]);

    let failure = orchestrator.wait().unwrap_err();
    assert_eq!(failure.task, id);
    let cancelled = failure
        .downcast_ref::<Cancelled<&'static str, i64>>()
        .unwrap();
    assert_eq!(cancelled.name, "job");
    assert_eq!(cancelled.signal.message(), Some(&7));
    assert_eq!(orchestrator.inspect("result"), None);
}

#[test]
fn want_lets_the_task_handle_a_cancellation() {
    let orchestrator = Orch::new();
    orchestrator.go(|scope| {
        let fallback = scope.want("job").into_value().unwrap_or(-1);
        scope.satisfy([("result", fallback)]);
        Ok(())
    });
    orchestrator.cancel([("job", 7)]);
    orchestrator.wait().unwrap();
    assert_eq!(orchestrator.require("result").unwrap(), -1);
}

#[test]
fn dropping_the_orchestrator_releases_blocked_tasks() {
    let released = Arc::new(AtomicBool::new(false));
    {
        let orchestrator = Orch::new();
        let flag = Arc::clone(&released);
        orchestrator.go(move |scope| {
            let outcome = scope.require("never");
            flag.store(outcome.is_err(), Ordering::SeqCst);
            Ok(())
        });
        orchestrator.go(|_| anyhow::bail!("abandon"));
        assert!(orchestrator.wait().is_err());
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    while !released.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(released.load(Ordering::SeqCst));
}
