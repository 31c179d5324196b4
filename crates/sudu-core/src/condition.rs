// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Condition store and scopes.
//!
//! A condition is a named slot that holds a value, a cancellation signal, or
//! nothing. Once a name resolves, every [`Scope::want`] on it returns without
//! blocking; before that, callers block on a per-name one-shot [`Gate`].
//!
//! # Ownership
//!
//! One [`ConditionStore`] owns the table, its lock, the waiter registry and
//! the store-wide subscriber list. Every [`Scope`] is a handle onto that same
//! table plus one node of a fork tree: the node carries its own legacy-mode
//! flag and its own read/write listener lists, and points at the node it was
//! forked from.
//!
//! # Event delivery
//!
//! - Read events fire while the table lock is held, so what a listener records
//!   is exactly what the reader receives. Read listeners must not call back
//!   into the store.
//! - Write events fire after the batch has committed and the table lock has
//!   been released, but before `satisfy`/`cancel` returns: the writing
//!   scope's listeners first, then each ancestor in turn up to the root, then
//!   the store-wide subscribers.
//! - Listener lists are snapshotted before invocation, so listeners may write
//!   back into the store.
//!
//! # Legacy flags
//!
//! A legacy write on a name that was never written marks it legacy. A legacy
//! write on a name that has been confirmed is skipped entirely: no value
//! change, no wake-up, no event entry. A non-legacy write always confirms.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::trace;

use crate::gate::Gate;

/// Bound for condition names.
pub trait ConditionKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ConditionKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Bound for condition values.
///
/// Values are compared with `PartialEq` only; there is no custom comparator.
pub trait ConditionValue: PartialEq + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ConditionValue for T where T: PartialEq + Clone + fmt::Debug + Send + Sync + 'static {}

/// Why a condition was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason<V> {
    /// Explicit [`Scope::cancel`] with a payload.
    Message(V),
    /// Store-wide abort, usually after an unexpected task failure.
    Aborted(String),
}

/// A cancellation signal delivered to waiters in place of a value.
///
/// Signals compare by identity: two signals are equal only if they came from
/// the same `cancel` call, even when their payloads are equal.
pub struct CancelSignal<V> {
    reason: Arc<CancelReason<V>>,
}

impl<V> CancelSignal<V> {
    /// A signal carrying an explicit payload.
    pub fn with_message(value: V) -> Self {
        Self {
            reason: Arc::new(CancelReason::Message(value)),
        }
    }

    /// A store-wide abort signal.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            reason: Arc::new(CancelReason::Aborted(reason.into())),
        }
    }

    /// The reason this signal was raised.
    pub fn reason(&self) -> &CancelReason<V> {
        &self.reason
    }

    /// The payload of an explicit cancel, `None` for aborts.
    pub fn message(&self) -> Option<&V> {
        match &*self.reason {
            CancelReason::Message(v) => Some(v),
            CancelReason::Aborted(_) => None,
        }
    }

    /// Returns `true` for store-wide aborts.
    pub fn is_abort(&self) -> bool {
        matches!(&*self.reason, CancelReason::Aborted(_))
    }
}

impl<V> Clone for CancelSignal<V> {
    fn clone(&self) -> Self {
        Self {
            reason: Arc::clone(&self.reason),
        }
    }
}

impl<V> PartialEq for CancelSignal<V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

impl<V> Eq for CancelSignal<V> {}

impl<V: fmt::Debug> fmt::Debug for CancelSignal<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelSignal").field(&*self.reason).finish()
    }
}

impl<V: fmt::Debug> fmt::Display for CancelSignal<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.reason {
            CancelReason::Message(v) => write!(f, "cancelled with {v:?}"),
            CancelReason::Aborted(why) => write!(f, "aborted: {why}"),
        }
    }
}

/// The resolved state of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<V> {
    /// A normal value.
    Value(V),
    /// The condition will never hold a value.
    Cancelled(CancelSignal<V>),
}

impl<V> Resolution<V> {
    /// The value, if this is not a cancellation.
    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Value(v) => Some(v),
            Self::Cancelled(_) => None,
        }
    }

    /// The cancellation signal, if any.
    pub fn signal(&self) -> Option<&CancelSignal<V>> {
        match self {
            Self::Value(_) => None,
            Self::Cancelled(s) => Some(s),
        }
    }

    /// Returns `true` for cancellations.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Consumes the resolution, returning the value if present.
    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Value(v) => Some(v),
            Self::Cancelled(_) => None,
        }
    }
}

/// A condition as seen at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed<V> {
    /// Value or cancellation signal.
    pub resolution: Resolution<V>,
    /// Whether the condition was legacy at that moment.
    pub legacy: bool,
    /// Store revision of the observation. Every committed batch bumps the
    /// store revision by one, so a larger revision is a later state.
    pub revision: u64,
}

/// One committed `satisfy`/`cancel` batch.
#[derive(Debug, Clone)]
pub struct WriteBatch<K, V> {
    /// Revision the batch committed at.
    pub revision: u64,
    /// Every name written by the batch with its state right after commit.
    pub entries: Vec<(K, Observed<V>)>,
}

impl<K, V> WriteBatch<K, V> {
    /// Names written by this batch, in write order.
    pub fn names(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(name, _)| name)
    }
}

/// [`Scope::require`] found a cancellation instead of a value.
#[derive(Debug, Clone, Error)]
#[error("condition {name:?} {signal}")]
pub struct Cancelled<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    /// The condition that was cancelled.
    pub name: K,
    /// The signal it resolved to.
    pub signal: CancelSignal<V>,
}

/// Listener for read events.
pub type ReadListener<K, V> = Arc<dyn Fn(&K, &Observed<V>) + Send + Sync>;

/// Listener for write events.
pub type WriteListener<K, V> = Arc<dyn Fn(&WriteBatch<K, V>) + Send + Sync>;

struct Table<K, V> {
    values: HashMap<K, V>,
    cancels: HashMap<K, CancelSignal<V>>,
    legacy: HashMap<K, bool>,
    waiters: HashMap<K, Arc<Gate>>,
    fallback: Option<CancelSignal<V>>,
    revision: u64,
}

impl<K: ConditionKey, V: ConditionValue> Table<K, V> {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            cancels: HashMap::new(),
            legacy: HashMap::new(),
            waiters: HashMap::new(),
            fallback: None,
            revision: 0,
        }
    }

    fn resolve(&self, name: &K) -> Option<Resolution<V>> {
        if let Some(v) = self.values.get(name) {
            return Some(Resolution::Value(v.clone()));
        }
        if let Some(s) = self.cancels.get(name) {
            return Some(Resolution::Cancelled(s.clone()));
        }
        self.fallback.clone().map(Resolution::Cancelled)
    }

    fn is_legacy(&self, name: &K) -> bool {
        self.legacy.get(name).copied().unwrap_or(false)
    }

    fn observe_at(&self, name: &K, revision: u64) -> Option<Observed<V>> {
        self.resolve(name).map(|resolution| Observed {
            resolution,
            legacy: self.is_legacy(name),
            revision,
        })
    }

    /// Applies one write. Returns `false` when the legacy rule skipped it.
    fn apply(&mut self, name: &K, resolution: Resolution<V>, legacy: bool) -> bool {
        if legacy {
            match self.legacy.get(name) {
                Some(false) => return false,
                Some(true) => {}
                None => {
                    self.legacy.insert(name.clone(), true);
                }
            }
        } else {
            self.legacy.insert(name.clone(), false);
        }

        match resolution {
            Resolution::Value(v) => {
                self.cancels.remove(name);
                self.values.insert(name.clone(), v);
            }
            Resolution::Cancelled(s) => {
                self.values.remove(name);
                self.cancels.insert(name.clone(), s);
            }
        }

        if let Some(gate) = self.waiters.remove(name) {
            gate.open();
        }
        true
    }

    fn commit(
        &mut self,
        writes: Vec<(K, Resolution<V>)>,
        legacy: bool,
    ) -> Option<WriteBatch<K, V>> {
        let mut written = Vec::with_capacity(writes.len());
        for (name, resolution) in writes {
            if self.apply(&name, resolution, legacy) {
                written.push(name);
            }
        }
        if written.is_empty() {
            return None;
        }

        self.revision += 1;
        let revision = self.revision;
        let entries = written
            .into_iter()
            .filter_map(|name| {
                let observed = self.observe_at(&name, revision)?;
                Some((name, observed))
            })
            .collect();
        Some(WriteBatch { revision, entries })
    }
}

struct Shared<K, V> {
    table: Mutex<Table<K, V>>,
    subscribers: Mutex<Vec<WriteListener<K, V>>>,
}

impl<K, V> Shared<K, V> {
    fn table(&self) -> MutexGuard<'_, Table<K, V>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> Vec<WriteListener<K, V>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct ScopeNode<K, V> {
    parent: Option<Arc<ScopeNode<K, V>>>,
    legacy_mode: Arc<AtomicBool>,
    read_listeners: Mutex<Vec<ReadListener<K, V>>>,
    write_listeners: Mutex<Vec<WriteListener<K, V>>>,
}

impl<K, V> ScopeNode<K, V> {
    fn new(parent: Option<Arc<ScopeNode<K, V>>>) -> Self {
        Self {
            parent,
            legacy_mode: Arc::new(AtomicBool::new(false)),
            read_listeners: Mutex::new(Vec::new()),
            write_listeners: Mutex::new(Vec::new()),
        }
    }

    fn read_listeners(&self) -> Vec<ReadListener<K, V>> {
        self.read_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_listeners(&self) -> Vec<WriteListener<K, V>> {
        self.write_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Shared handle onto a scope's legacy-mode flag.
///
/// Lets a read listener flip its scope into legacy mode without holding a
/// reference to the scope itself.
#[derive(Clone)]
pub(crate) struct LegacySwitch(Arc<AtomicBool>);

impl LegacySwitch {
    pub(crate) fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }
}

/// A view onto the shared condition table.
///
/// Cloning a scope yields another handle onto the same fork node; use
/// [`Scope::fork`] for an independent legacy-mode flag and listener lists.
pub struct Scope<K, V> {
    shared: Arc<Shared<K, V>>,
    node: Arc<ScopeNode<K, V>>,
}

impl<K, V> Clone for Scope<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            node: Arc::clone(&self.node),
        }
    }
}

impl<K, V> fmt::Debug for Scope<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("depth", &self.depth())
            .field("legacy_mode", &self.is_legacy_mode())
            .finish_non_exhaustive()
    }
}

impl<K, V> Scope<K, V> {
    /// Number of forks between this scope and the store root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.node.parent.as_ref();
        while let Some(n) = node {
            depth += 1;
            node = n.parent.as_ref();
        }
        depth
    }

    /// Whether writes through this scope are recorded as legacy.
    pub fn is_legacy_mode(&self) -> bool {
        self.node.legacy_mode.load(Ordering::SeqCst)
    }
}

impl<K: ConditionKey, V: ConditionValue> Scope<K, V> {
    /// Forks a child scope sharing this scope's table.
    ///
    /// The child starts with legacy mode off and no listeners; events it
    /// emits are forwarded to this scope after its own listeners run.
    pub fn fork(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            node: Arc::new(ScopeNode::new(Some(Arc::clone(&self.node)))),
        }
    }

    pub(crate) fn set_legacy_mode(&self, on: bool) {
        self.node.legacy_mode.store(on, Ordering::SeqCst);
    }

    pub(crate) fn legacy_switch(&self) -> LegacySwitch {
        LegacySwitch(Arc::clone(&self.node.legacy_mode))
    }

    /// Registers a read listener on this scope.
    ///
    /// Runs with the table lock held; it must not call back into the store.
    pub fn listen_read<F>(&self, listener: F)
    where
        F: Fn(&K, &Observed<V>) + Send + Sync + 'static,
    {
        self.node
            .read_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Registers a write listener on this scope. It sees writes made through
    /// this scope and through every scope forked from it.
    pub fn listen_write<F>(&self, listener: F)
    where
        F: Fn(&WriteBatch<K, V>) + Send + Sync + 'static,
    {
        self.node
            .write_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Registers a store-wide subscriber that sees every committed batch,
    /// whichever scope wrote it.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&WriteBatch<K, V>) + Send + Sync + 'static,
    {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Current state of `name`, without blocking or emitting events.
    pub fn inspect(&self, name: impl Into<K>) -> Option<Resolution<V>> {
        self.shared.table().resolve(&name.into())
    }

    /// Whether `name` currently holds a legacy (unconfirmed) state.
    pub fn is_legacy(&self, name: impl Into<K>) -> bool {
        self.shared.table().is_legacy(&name.into())
    }

    /// Current store revision.
    pub fn revision(&self) -> u64 {
        self.shared.table().revision
    }

    /// Returns the resolution of `name`, blocking until it exists.
    pub fn want(&self, name: impl Into<K>) -> Resolution<V> {
        let name = name.into();
        loop {
            let gate = {
                let mut table = self.shared.table();
                if let Some(observed) = table.observe_at(&name, table.revision) {
                    self.emit_read(&name, &observed);
                    return observed.resolution;
                }
                Arc::clone(
                    table
                        .waiters
                        .entry(name.clone())
                        .or_insert_with(|| Arc::new(Gate::new())),
                )
            };
            trace!(?name, "waiting for condition");
            gate.wait();
        }
    }

    /// Like [`want`](Self::want), but a cancellation becomes an error.
    pub fn require(&self, name: impl Into<K>) -> Result<V, Cancelled<K, V>> {
        let name = name.into();
        match self.want(name.clone()) {
            Resolution::Value(v) => Ok(v),
            Resolution::Cancelled(signal) => Err(Cancelled { name, signal }),
        }
    }

    /// Satisfies every `(name, value)` pair as one batch.
    ///
    /// Legacy if this scope is in legacy mode.
    pub fn satisfy<I, N>(&self, pairs: I)
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<K>,
    {
        let writes = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), Resolution::Value(v)))
            .collect();
        self.write(writes, self.is_legacy_mode());
    }

    /// Satisfies every pair as one legacy batch, whatever this scope's mode.
    pub fn satisfy_legacy<I, N>(&self, pairs: I)
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<K>,
    {
        let writes = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), Resolution::Value(v)))
            .collect();
        self.write(writes, true);
    }

    /// Cancels every `(name, payload)` pair as one batch.
    ///
    /// Each name gets a fresh [`CancelSignal`] carrying its payload.
    pub fn cancel<I, N>(&self, pairs: I)
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<K>,
    {
        let writes = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), Resolution::Cancelled(CancelSignal::with_message(v))))
            .collect();
        self.write(writes, self.is_legacy_mode());
    }

    /// Aborts the whole store.
    ///
    /// Every name without a state of its own now resolves to `signal`, and
    /// every blocked waiter is released.
    pub fn cancel_all(&self, signal: CancelSignal<V>) {
        let batch = {
            let mut table = self.shared.table();
            table.fallback = Some(signal);
            let names: Vec<K> = table.waiters.keys().cloned().collect();
            for gate in table.waiters.values() {
                gate.open();
            }
            table.waiters.clear();
            table.revision += 1;
            let revision = table.revision;
            let entries: Vec<_> = names
                .into_iter()
                .filter_map(|name| {
                    let observed = table.observe_at(&name, revision)?;
                    Some((name, observed))
                })
                .collect();
            WriteBatch { revision, entries }
        };
        trace!(released = batch.entries.len(), "store aborted");
        if !batch.entries.is_empty() {
            self.emit_write(&batch);
        }
    }

    /// Re-writes `writes` as confirmed, restricted to names whose state is
    /// still legacy. Used when a legacy task is promoted.
    pub(crate) fn republish_confirmed(&self, writes: Vec<(K, Resolution<V>)>) {
        let batch = {
            let mut table = self.shared.table();
            let still_legacy = writes
                .into_iter()
                .filter(|(name, _)| table.is_legacy(name))
                .collect();
            table.commit(still_legacy, false)
        };
        if let Some(batch) = batch {
            self.emit_write(&batch);
        }
    }

    fn write(&self, writes: Vec<(K, Resolution<V>)>, legacy: bool) {
        let batch = self.shared.table().commit(writes, legacy);
        match batch {
            Some(batch) => self.emit_write(&batch),
            None => trace!(legacy, "batch skipped, nothing written"),
        }
    }

    fn emit_read(&self, name: &K, observed: &Observed<V>) {
        let mut node = Some(&self.node);
        while let Some(n) = node {
            for listener in n.read_listeners() {
                listener(name, observed);
            }
            node = n.parent.as_ref();
        }
    }

    fn emit_write(&self, batch: &WriteBatch<K, V>) {
        let mut node = Some(&self.node);
        while let Some(n) = node {
            for listener in n.write_listeners() {
                listener(batch);
            }
            node = n.parent.as_ref();
        }
        for subscriber in self.shared.subscribers() {
            subscriber(batch);
        }
    }
}

/// The root of a condition table.
///
/// Dereferences to its root [`Scope`], so every scope operation is available
/// directly on the store.
pub struct ConditionStore<K, V> {
    root: Scope<K, V>,
}

impl<K: ConditionKey, V: ConditionValue> ConditionStore<K, V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            table: Mutex::new(Table::new()),
            subscribers: Mutex::new(Vec::new()),
        });
        Self {
            root: Scope {
                shared,
                node: Arc::new(ScopeNode::new(None)),
            },
        }
    }

    /// The root scope.
    pub fn scope(&self) -> &Scope<K, V> {
        &self.root
    }
}

impl<K: ConditionKey, V: ConditionValue> Default for ConditionStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Deref for ConditionStore<K, V> {
    type Target = Scope<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

impl<K, V> fmt::Debug for ConditionStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Store = ConditionStore<&'static str, i64>;

    #[test]
    fn inspect_reports_value_cancel_or_nothing() {
        let store = Store::new();
        assert_eq!(store.inspect("a"), None);
        store.satisfy([("a", 1)]);
        assert_eq!(store.inspect("a"), Some(Resolution::Value(1)));
        store.cancel([("a", 9)]);
        let signal = store.inspect("a").unwrap();
        assert_eq!(signal.signal().unwrap().message(), Some(&9));
        assert!(signal.value().is_none());
    }

    #[test]
    fn satisfy_clears_cancel_and_vice_versa() {
        let store = Store::new();
        store.cancel([("a", 0)]);
        store.satisfy([("a", 5)]);
        assert_eq!(store.inspect("a"), Some(Resolution::Value(5)));
        store.cancel([("a", 0)]);
        assert!(store.inspect("a").unwrap().is_cancelled());
    }

    #[test]
    fn cancel_signals_compare_by_identity() {
        let a = CancelSignal::with_message(1);
        let b = CancelSignal::with_message(1);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn legacy_write_never_downgrades_a_confirmed_name() {
        let store = Store::new();
        store.satisfy_legacy([("a", 1)]);
        assert!(store.is_legacy("a"));
        store.satisfy_legacy([("a", 2)]);
        assert_eq!(store.inspect("a"), Some(Resolution::Value(2)));
        store.satisfy([("a", 3)]);
        assert!(!store.is_legacy("a"));
        store.satisfy_legacy([("a", 4)]);
        assert_eq!(store.inspect("a"), Some(Resolution::Value(3)));
        assert!(!store.is_legacy("a"));
    }

    #[test]
    fn skipped_batch_emits_nothing() {
        let store = Store::new();
        store.satisfy([("a", 1)]);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let before = store.revision();
        store.satisfy_legacy([("a", 2)]);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(store.revision(), before);
    }

    #[test]
    fn batch_is_committed_before_listeners_run() {
        let store = Store::new();
        let observer = store.scope().clone();
        let complete = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&complete);
        store.subscribe(move |batch| {
            assert_eq!(batch.entries.len(), 2);
            let both = observer.inspect("a").is_some() && observer.inspect("b").is_some();
            flag.store(both, Ordering::SeqCst);
        });
        store.satisfy([("a", 1), ("b", 2)]);
        assert!(complete.load(Ordering::SeqCst));
    }

    #[test]
    fn fork_forwards_events_to_origin_after_local_listeners() {
        let store = Store::new();
        let child = store.fork();
        let grandchild = child.fork();
        assert_eq!(grandchild.depth(), 2);

        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, scope) in [("grandchild", &grandchild), ("child", &child)] {
            let order = Arc::clone(&order);
            scope.listen_write(move |_| order.lock().unwrap().push(label));
        }
        let root_order = Arc::clone(&order);
        store.listen_write(move |_| root_order.lock().unwrap().push("root"));
        let sub_order = Arc::clone(&order);
        store.subscribe(move |_| sub_order.lock().unwrap().push("subscriber"));

        grandchild.satisfy([("x", 1)]);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["grandchild", "child", "root", "subscriber"]
        );

        order.lock().unwrap().clear();
        child.satisfy([("y", 1)]);
        assert_eq!(*order.lock().unwrap(), vec!["child", "root", "subscriber"]);
    }

    #[test]
    fn scope_debug_shows_depth_and_legacy_mode() {
        let store = Store::new();
        let child = store.fork();
        child.set_legacy_mode(true);
        assert_eq!(
            format!("{child:?}"),
            "Scope { depth: 1, legacy_mode: true, .. }"
        );
        assert_eq!(
            format!("{:?}", store.scope()),
            "Scope { depth: 0, legacy_mode: false, .. }"
        );
    }

    #[test]
    fn fork_has_independent_legacy_mode() {
        let store = Store::new();
        let child = store.fork();
        child.set_legacy_mode(true);
        assert!(child.is_legacy_mode());
        assert!(!store.is_legacy_mode());
        child.satisfy([("a", 1)]);
        assert!(store.is_legacy("a"));
        store.satisfy([("b", 1)]);
        assert!(!store.is_legacy("b"));
    }

    #[test]
    fn read_events_carry_the_returned_state() {
        let store = Store::new();
        let scope = store.fork();
        let reads = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reads);
        scope.listen_read(move |name, observed| {
            sink.lock().unwrap().push((*name, observed.clone()));
        });
        store.satisfy_legacy([("a", 7)]);
        assert_eq!(scope.want("a"), Resolution::Value(7));
        scope.inspect("a");
        let reads = reads.lock().unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].0, "a");
        assert!(reads[0].1.legacy);
        assert_eq!(reads[0].1.revision, 1);
    }

    #[test]
    fn cancel_all_resolves_unknown_names() {
        let store = Store::new();
        store.satisfy([("a", 1)]);
        store.cancel_all(CancelSignal::aborted("boom"));
        assert_eq!(store.inspect("a"), Some(Resolution::Value(1)));
        let missing = store.want("missing");
        assert!(missing.signal().unwrap().is_abort());
        let err = store.require("other").unwrap_err();
        assert_eq!(err.name, "other");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn republish_only_touches_names_still_legacy() {
        let store = Store::new();
        store.satisfy_legacy([("a", 1), ("b", 2)]);
        store.satisfy([("b", 3)]);
        store.republish_confirmed(vec![
            ("a", Resolution::Value(1)),
            ("b", Resolution::Value(2)),
        ]);
        assert!(!store.is_legacy("a"));
        assert_eq!(store.inspect("b"), Some(Resolution::Value(3)));
    }
}
