// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Condition store plus task group, without caching or legacy tracking.
//!
//! Conditions are either present or not. Bodies run once each against the
//! root scope; nothing is re-run when a value changes. The first failure
//! aborts the store so that bodies blocked on a condition are released with a
//! cancellation instead of hanging.

use std::fmt;
use std::ops::Deref;

use crate::condition::{CancelSignal, ConditionKey, ConditionStore, ConditionValue, Scope};
use crate::config::FailMode;
use crate::failure::{Failure, TaskFailure};
use crate::group::TaskGroup;
use crate::task::TaskId;

/// A lightweight composition of [`ConditionStore`] and [`TaskGroup`].
pub struct ConditionTask<K, V> {
    store: ConditionStore<K, V>,
    group: TaskGroup,
}

impl<K: ConditionKey, V: ConditionValue> ConditionTask<K, V> {
    /// Creates an empty fail-fast composition.
    pub fn new() -> Self {
        let store = ConditionStore::new();
        let scope = store.scope().clone();
        let group = TaskGroup::with_failure_hook(Box::new(move |task: TaskId, failure: &Failure| {
            scope.cancel_all(CancelSignal::aborted(format!("{task} {failure}")));
        }));
        Self { store, group }
    }

    /// Runs `f` on its own thread against the root scope.
    pub fn go<F>(&self, f: F) -> TaskId
    where
        F: FnOnce(&Scope<K, V>) -> anyhow::Result<()> + Send + 'static,
    {
        let scope = self.store.scope().clone();
        self.group.go(move || f(&scope))
    }

    /// Waits for the group. See [`TaskGroup::wait`].
    pub fn wait(&self) -> Result<(), TaskFailure> {
        self.group.wait()
    }

    /// Bodies started so far.
    pub fn spawned(&self) -> u64 {
        self.group.spawned()
    }

    /// Bodies still running.
    pub fn running(&self) -> usize {
        self.group.running()
    }

    /// Current failure policy.
    pub fn fail_mode(&self) -> FailMode {
        self.group.fail_mode()
    }

    /// Changes the failure policy.
    pub fn set_fail_mode(&self, fail_mode: FailMode) {
        self.group.set_fail_mode(fail_mode);
    }
}

impl<K: ConditionKey, V: ConditionValue> Default for ConditionTask<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Deref for ConditionTask<K, V> {
    type Target = Scope<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl<K, V> fmt::Debug for ConditionTask<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionTask")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}
