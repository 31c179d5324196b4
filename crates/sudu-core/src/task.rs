// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tasks: repeated attempts of one body against fresh scopes.
//!
//! Every attempt forks a new [`Scope`] from the task's origin and records,
//! through that scope's listeners, what the body read and wrote. A store-wide
//! subscriber registered once per task watches every committed batch: when a
//! name the current attempt read is written again, the new state goes into
//! the change set. When the attempt settles (or, if it already has, right
//! away) the change set is compared with the read set:
//!
//! - any resolution differs: the task runs again (redo);
//! - nothing differs and the task is legacy: it tries to promote itself.
//!
//! Promotion succeeds once every legacy read has been followed by a
//! confirmed write of the same resolution. The task then reports a confirmed
//! state without re-running and republishes its legacy writes as confirmed,
//! which in turn lets downstream tasks promote.
//!
//! # Locks
//!
//! `run` serializes start/settle transitions and is taken before `tracking`.
//! `tracking` may be taken while the store table lock is held (read events),
//! so nothing here touches the store while holding it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, trace};

use crate::condition::{
    ConditionKey, ConditionValue, LegacySwitch, Observed, Resolution, Scope, WriteBatch,
};
use crate::failure::Failure;

/// Identifies a task within one orchestrator or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn new(index: u64) -> Self {
        Self(index)
    }

    /// Registration index, starting at zero.
    pub const fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// State reported by a task at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// An attempt is about to run.
    Start,
    /// The attempt succeeded but depended on a legacy condition.
    SuccessLegacy,
    /// The attempt failed but depended on a legacy condition.
    FailLegacy,
    /// The attempt succeeded on confirmed inputs.
    Success,
    /// The attempt failed on confirmed inputs.
    Fail,
}

impl TaskState {
    fn settled(failed: bool, legacy: bool) -> Self {
        match (failed, legacy) {
            (false, true) => Self::SuccessLegacy,
            (true, true) => Self::FailLegacy,
            (false, false) => Self::Success,
            (true, false) => Self::Fail,
        }
    }

    /// Whether the state rests on unconfirmed inputs.
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::SuccessLegacy | Self::FailLegacy)
    }

    /// Whether the attempt failed.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::FailLegacy | Self::Fail)
    }
}

/// What a task reports to its owner.
pub(crate) struct Transition<'a> {
    pub(crate) state: TaskState,
    pub(crate) redo: bool,
    pub(crate) failure: Option<&'a Failure>,
}

/// Owner callback. Returning `false` disables the task for good.
pub(crate) type Notify = Box<dyn Fn(TaskId, &Transition<'_>) -> bool + Send + Sync>;

/// A task body.
pub(crate) type TaskBody<K, V> = Box<dyn Fn(&Scope<K, V>) -> anyhow::Result<()> + Send + Sync>;

struct Written<V> {
    resolution: Resolution<V>,
    legacy: bool,
}

struct Tracking<K, V> {
    attempt: u64,
    reads: HashMap<K, Observed<V>>,
    changes: HashMap<K, Observed<V>>,
    writes: Vec<(K, Written<V>)>,
    legacy: bool,
}

impl<K: ConditionKey, V: ConditionValue> Tracking<K, V> {
    fn new() -> Self {
        Self {
            attempt: 0,
            reads: HashMap::new(),
            changes: HashMap::new(),
            writes: Vec::new(),
            legacy: false,
        }
    }

    fn clear(&mut self) {
        self.attempt += 1;
        self.reads.clear();
        self.changes.clear();
        self.writes.clear();
        self.legacy = false;
    }

    /// Any read whose latest observed resolution differs from what was read.
    fn changed(&self) -> bool {
        self.reads.iter().any(|(name, read)| {
            self.changes
                .get(name)
                .is_some_and(|change| change.resolution != read.resolution)
        })
    }

    /// Any legacy read not yet followed by a confirmed write.
    fn still_speculative(&self) -> bool {
        self.reads
            .iter()
            .filter(|(_, read)| read.legacy)
            .any(|(name, _)| self.changes.get(name).is_none_or(|change| change.legacy))
    }

    fn record_write(&mut self, name: &K, observed: &Observed<V>) {
        let written = Written {
            resolution: observed.resolution.clone(),
            legacy: observed.legacy,
        };
        match self.writes.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = written,
            None => self.writes.push((name.clone(), written)),
        }
    }

    /// Records a newer state of a read name. Returns `true` if recorded.
    fn record_change(&mut self, name: &K, observed: &Observed<V>) -> bool {
        let Some(read) = self.reads.get(name) else {
            return false;
        };
        if observed.revision <= read.revision {
            return false;
        }
        if self
            .changes
            .get(name)
            .is_some_and(|change| change.revision >= observed.revision)
        {
            return false;
        }
        self.changes.insert(name.clone(), observed.clone());
        true
    }
}

struct RunState<K, V> {
    doing: bool,
    disabled: bool,
    scope: Option<Scope<K, V>>,
    failure: Option<Failure>,
    last_state: Option<TaskState>,
    attempts: u64,
}

pub(crate) struct Task<K, V> {
    id: TaskId,
    origin: Scope<K, V>,
    body: TaskBody<K, V>,
    notify: Notify,
    run: Mutex<RunState<K, V>>,
    tracking: Mutex<Tracking<K, V>>,
}

impl<K: ConditionKey, V: ConditionValue> Task<K, V> {
    /// Creates the task and subscribes it to every write on `origin`'s store.
    pub(crate) fn new(
        id: TaskId,
        origin: &Scope<K, V>,
        body: TaskBody<K, V>,
        notify: Notify,
    ) -> Arc<Self> {
        let task = Arc::new(Self {
            id,
            origin: origin.clone(),
            body,
            notify,
            run: Mutex::new(RunState {
                doing: false,
                disabled: false,
                scope: None,
                failure: None,
                last_state: None,
                attempts: 0,
            }),
            tracking: Mutex::new(Tracking::new()),
        });
        let weak = Arc::downgrade(&task);
        origin.subscribe(move |batch| {
            if let Some(task) = weak.upgrade() {
                task.observe_store_write(batch);
            }
        });
        task
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn last_state(&self) -> Option<TaskState> {
        self.run().last_state
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.run().attempts
    }

    /// Confirmed values written by the latest attempt, in write order.
    pub(crate) fn confirmed_writes(&self) -> Vec<(K, V)> {
        self.tracking()
            .writes
            .iter()
            .filter(|(_, written)| !written.legacy)
            .filter_map(|(name, written)| {
                let value = written.resolution.value()?;
                Some((name.clone(), value.clone()))
            })
            .collect()
    }

    /// Starts the first attempt.
    pub(crate) fn start(self: &Arc<Self>) {
        let mut run = self.run();
        if run.doing || run.disabled {
            return;
        }
        if !self.report(&mut run, TaskState::Start, false) {
            return;
        }
        run.doing = true;
        self.launch(run);
    }

    fn run(&self) -> MutexGuard<'_, RunState<K, V>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking<K, V>> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, run: &mut RunState<K, V>, state: TaskState, redo: bool) -> bool {
        run.last_state = Some(state);
        let failure = if state == TaskState::Start {
            None
        } else {
            run.failure.as_ref()
        };
        let keep_going = (self.notify)(
            self.id,
            &Transition {
                state,
                redo,
                failure,
            },
        );
        if !keep_going {
            debug!(task = %self.id, ?state, "task disabled");
            run.disabled = true;
        }
        keep_going
    }

    /// Spawns an attempt. If the thread cannot be spawned the attempt settles
    /// at once with that error.
    fn launch(self: &Arc<Self>, mut run: MutexGuard<'_, RunState<K, V>>) {
        if let Err(err) = self.spawn_attempt(&mut run) {
            drop(run);
            self.settle(Some(Failure::spawn(err)));
        }
    }

    fn spawn_attempt(self: &Arc<Self>, run: &mut RunState<K, V>) -> std::io::Result<()> {
        let scope = self.reset();
        run.scope = Some(scope.clone());
        run.failure = None;
        run.attempts += 1;

        let attempt = run.attempts;
        let task = Arc::clone(self);
        thread::Builder::new()
            .name(format!("sudu-{}", self.id))
            .spawn(move || {
                trace!(task = %task.id, attempt, "attempt running");
                let outcome = catch_unwind(AssertUnwindSafe(|| (task.body)(&scope)));
                task.settle(Failure::from_outcome(outcome));
            })
            .map(drop)
    }

    /// Clears tracking and forks a fresh scope wired to this attempt.
    fn reset(self: &Arc<Self>) -> Scope<K, V> {
        let scope = self.origin.fork();
        let attempt = {
            let mut tracking = self.tracking();
            tracking.clear();
            tracking.attempt
        };

        let weak = Arc::downgrade(self);
        let switch = scope.legacy_switch();
        scope.listen_read(move |name, observed| {
            if let Some(task) = weak.upgrade() {
                task.record_read(attempt, &switch, name, observed);
            }
        });

        let weak = Arc::downgrade(self);
        scope.listen_write(move |batch| {
            if let Some(task) = weak.upgrade() {
                task.record_writes(attempt, batch);
            }
        });
        scope
    }

    /// Runs under the store table lock.
    fn record_read(&self, attempt: u64, switch: &LegacySwitch, name: &K, observed: &Observed<V>) {
        let mut tracking = self.tracking();
        if tracking.attempt != attempt || tracking.reads.contains_key(name) {
            return;
        }
        if observed.legacy {
            tracking.legacy = true;
            switch.set(true);
        }
        tracking.reads.insert(name.clone(), observed.clone());
    }

    fn record_writes(&self, attempt: u64, batch: &WriteBatch<K, V>) {
        let mut tracking = self.tracking();
        if tracking.attempt != attempt {
            return;
        }
        for (name, observed) in &batch.entries {
            tracking.record_write(name, observed);
        }
    }

    fn observe_store_write(self: &Arc<Self>, batch: &WriteBatch<K, V>) {
        let impacted = {
            let mut tracking = self.tracking();
            let mut impacted = false;
            for (name, observed) in &batch.entries {
                impacted |= tracking.record_change(name, observed);
            }
            impacted
        };
        if impacted {
            self.dependency_written();
        }
    }

    /// A dependency changed after the attempt settled.
    fn dependency_written(self: &Arc<Self>) {
        let mut run = self.run();
        if run.doing || run.disabled {
            return;
        }
        let redo = self.tracking().changed();
        if !redo {
            self.try_promote(run);
            return;
        }
        if self.report(&mut run, TaskState::Start, true) {
            debug!(task = %self.id, "dependency changed, redoing");
            run.doing = true;
            self.launch(run);
        }
    }

    /// An attempt finished, normally or not.
    ///
    /// A promotion that is already possible happens before the settle is
    /// reported, so the owner's reservation covers the republish.
    fn settle(self: &Arc<Self>, failure: Option<Failure>) {
        let mut run = self.run();
        if run.disabled {
            return;
        }
        if let Some(failure) = &failure {
            debug!(task = %self.id, %failure, "attempt failed");
        }
        run.failure = failure;

        if let Some((scope, republish)) = self.promote(&run) {
            debug!(task = %self.id, republished = republish.len(), "legacy promoted on settle");
            if !republish.is_empty() {
                drop(run);
                scope.republish_confirmed(republish);
                run = self.run();
                if run.disabled {
                    return;
                }
            }
        }

        let (legacy, redo) = {
            let tracking = self.tracking();
            (tracking.legacy, tracking.changed())
        };
        let state = TaskState::settled(run.failure.is_some(), legacy);
        if !redo {
            run.doing = false;
        }
        debug!(task = %self.id, ?state, redo, "attempt settled");

        if self.report(&mut run, state, redo) && redo {
            self.launch(run);
        }
    }

    /// Promotes a settled task whose legacy reads have all been confirmed.
    fn try_promote(&self, mut run: MutexGuard<'_, RunState<K, V>>) {
        let Some((scope, republish)) = self.promote(&run) else {
            return;
        };
        let state = TaskState::settled(run.failure.is_some(), false);
        debug!(task = %self.id, ?state, republished = republish.len(), "legacy promoted");
        self.report(&mut run, state, false);
        drop(run);

        if !republish.is_empty() {
            scope.republish_confirmed(republish);
        }
    }

    /// Flips the task to confirmed if every legacy read has been confirmed
    /// unchanged. Returns the legacy writes to republish.
    fn promote(&self, run: &RunState<K, V>) -> Option<(Scope<K, V>, Vec<(K, Resolution<V>)>)> {
        let scope = run.scope.clone()?;
        let mut tracking = self.tracking();
        if !tracking.legacy || tracking.still_speculative() || tracking.changed() {
            return None;
        }
        tracking.legacy = false;
        scope.set_legacy_mode(false);
        let republish = tracking
            .writes
            .iter()
            .filter(|(_, written)| written.legacy)
            .map(|(name, written)| (name.clone(), written.resolution.clone()))
            .collect();
        Some((scope, republish))
    }
}

impl<K, V> fmt::Debug for Task<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish_non_exhaustive()
    }
}
