// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Blocking wait/satisfy/cancel behaviour of the condition store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sudu_core::{CancelSignal, Cancelled, ConditionStore, Resolution};

type Store = ConditionStore<&'static str, i64>;

// ── 1. want blocks until satisfy ────────────────────────────────────

#[test]
fn want_before_and_after_satisfy_observe_the_same_value() {
    let store = Store::new();
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let scope = store.fork();
            thread::spawn(move || scope.want("a"))
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    store.satisfy([("a", 42)]);

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Resolution::Value(42));
    }
    assert_eq!(store.want("a"), Resolution::Value(42));
}

#[test]
fn resolved_name_never_blocks_again() {
    let store = Store::new();
    store.satisfy([("a", 1)]);
    store.cancel([("a", 2)]);
    store.satisfy([("a", 3)]);
    assert_eq!(store.want("a"), Resolution::Value(3));
}

// ── 2. cancellation ─────────────────────────────────────────────────

#[test]
fn want_returns_the_cancel_signal_and_require_fails() {
    let store = Store::new();
    let scope = store.fork();
    let blocked = thread::spawn(move || scope.require("job"));

    thread::sleep(Duration::from_millis(5));
    store.cancel([("job", 99)]);

    let err: Cancelled<&str, i64> = blocked.join().unwrap().unwrap_err();
    assert_eq!(err.name, "job");
    assert_eq!(err.signal.message(), Some(&99));

    let resolution = store.want("job");
    assert_eq!(resolution.signal(), Some(&err.signal));
}

#[test]
fn cancel_all_releases_every_blocked_waiter() {
    let store = Store::new();
    let waiters: Vec<_> = ["x", "y", "z"]
        .into_iter()
        .map(|name| {
            let scope = store.fork();
            thread::spawn(move || scope.require(name))
        })
        .collect();

    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    store.subscribe(move |batch| {
        let mut names: Vec<&str> = batch.names().copied().collect();
        names.sort_unstable();
        sink.lock().unwrap().push(names);
    });

    thread::sleep(Duration::from_millis(20));
    let signal = CancelSignal::aborted("shutting down");
    store.cancel_all(signal.clone());

    for waiter in waiters {
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.signal, signal);
        assert!(err.signal.is_abort());
    }
    let batches = batches.lock().unwrap();
    assert!(batches.len() <= 1);
    assert!(batches.iter().flatten().all(|name| ["x", "y", "z"].contains(name)));
    assert!(store.inspect("never-written").unwrap().is_cancelled());
}

// ── 3. batches ──────────────────────────────────────────────────────

#[test]
fn one_event_per_batch_with_every_name() {
    let store = Store::new();
    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    store.subscribe(move |batch| {
        assert_eq!(batch.entries.len(), 3);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    store.satisfy([("a", 1), ("b", 2), ("c", 3)]);
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn listener_may_write_back_into_the_store() {
    let store = Store::new();
    let writer = store.fork();
    store.subscribe(move |batch| {
        if batch.names().any(|name| *name == "ping") {
            writer.satisfy([("pong", 1)]);
        }
    });
    store.satisfy([("ping", 1)]);
    assert_eq!(store.inspect("pong"), Some(Resolution::Value(1)));
}

// ── 4. concurrent chain ─────────────────────────────────────────────

#[test]
fn concurrent_chain_resolves_through_values_and_cancels() {
    let store = Store::new();
    let a = 2019_i64;

    let scope = store.fork();
    thread::spawn(move || {
        let a = scope.require("A").unwrap();
        scope.satisfy([("B", 2 * a)]);
    });
    let scope = store.fork();
    thread::spawn(move || {
        let a = scope.require("A").unwrap();
        scope.satisfy([("C", 3 * a)]);
    });
    let scope = store.fork();
    thread::spawn(move || {
        let c = scope.require("C").unwrap();
        scope.cancel([("D", 4 * c)]);
    });
    let scope = store.fork();
    thread::spawn(move || {
        let b = scope.require("B").unwrap();
        let c = scope.require("C").unwrap();
        let d = *scope.want("D").signal().unwrap().message().unwrap();
        scope.satisfy([("X", b * c * d)]);
    });

    thread::sleep(Duration::from_millis(1));
    assert_eq!(store.inspect("X"), None);

    store.satisfy([("A", a)]);
    let x = store.require("X").unwrap();
    assert_eq!(x, 2 * a * 3 * a * 4 * 3 * a);
}
