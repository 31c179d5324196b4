// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Orchestrator: one condition store, many tasks, one completion barrier.
//!
//! Every task registers with one reservation on the barrier. Later attempts
//! reserve again when they start, and an attempt that settles without a redo
//! releases its reservation. A redo keeps the reservation it already holds,
//! and a dependent's redo is reserved inside the write that triggers it, so
//! the barrier cannot open while a chain of redos is still propagating.
//!
//! The first confirmed failure is kept. Under [`FailMode::FailFast`] every
//! outstanding reservation is dropped and further attempts are refused; under
//! [`FailMode::WaitAll`] bookkeeping carries on as before.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument, warn};

use crate::barrier::CompletionBarrier;
use crate::cache::CacheBinding;
use crate::condition::{CancelSignal, ConditionKey, ConditionStore, ConditionValue, Scope};
use crate::config::{FailMode, OrchestratorConfig};
use crate::failure::{Failure, TaskFailure};
use crate::task::{Task, TaskId, TaskState, Transition};

#[derive(Debug, Clone, Copy)]
struct Attendance {
    doing: bool,
    round: u64,
}

struct OrchestratorState<K, V> {
    tasks: Vec<Arc<Task<K, V>>>,
    attendance: HashMap<TaskId, Attendance>,
    running: usize,
    failure: Option<(TaskId, Failure)>,
    fail_mode: FailMode,
    closed: bool,
}

impl<K, V> OrchestratorState<K, V> {
    fn accepting(&self) -> bool {
        self.failure.is_none() || self.fail_mode == FailMode::WaitAll
    }
}

struct Shared<K, V> {
    state: Mutex<OrchestratorState<K, V>>,
    barrier: CompletionBarrier,
}

impl<K: ConditionKey, V: ConditionValue> Shared<K, V> {
    fn state(&self) -> MutexGuard<'_, OrchestratorState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Task callback. Runs under the task's run lock.
    fn transition(&self, task: TaskId, transition: &Transition<'_>) -> bool {
        let mut guard = self.state();
        let state = &mut *guard;
        if state.closed {
            return false;
        }

        if transition.state == TaskState::Fail && state.failure.is_none() {
            if let Some(failure) = transition.failure {
                warn!(%task, %failure, fail_mode = ?state.fail_mode, "task failed");
                state.failure = Some((task, failure.clone()));
                if state.fail_mode == FailMode::FailFast {
                    self.barrier.discard();
                }
            }
        }

        let accepting = state.accepting();
        let Some(slot) = state.attendance.get_mut(&task) else {
            return false;
        };

        if accepting {
            if transition.state == TaskState::Start {
                if slot.round > 0 {
                    self.barrier.reserve();
                    state.running += 1;
                    slot.doing = true;
                }
            } else if slot.doing {
                if !transition.redo {
                    slot.doing = false;
                    state.running = state.running.saturating_sub(1);
                    self.barrier.release();
                }
                slot.round += 1;
            }
            return true;
        }

        if slot.doing {
            slot.doing = false;
            state.running = state.running.saturating_sub(1);
            slot.round += 1;
        }
        debug!(%task, state = ?transition.state, "attempt refused after failure");
        false
    }
}

/// Runs condition-driven tasks with redo and legacy promotion.
///
/// Dereferences to its root [`Scope`], so conditions can be satisfied,
/// cancelled and read directly on the orchestrator.
///
/// ```
/// use sudu_core::Orchestrator;
///
/// let orchestrator = Orchestrator::<&str, i64>::new();
/// orchestrator.go(|scope| {
///     let a = scope.require("a")?;
///     scope.satisfy([("b", a + 1)]);
///     Ok(())
/// });
/// orchestrator.satisfy([("a", 41)]);
/// orchestrator.wait().unwrap();
/// assert_eq!(orchestrator.require("b").unwrap(), 42);
/// ```
pub struct Orchestrator<K: ConditionKey, V: ConditionValue> {
    store: ConditionStore<K, V>,
    shared: Arc<Shared<K, V>>,
    cache: Option<CacheBinding<K, V>>,
}

impl<K: ConditionKey, V: ConditionValue> Orchestrator<K, V> {
    /// An orchestrator with default configuration and no cache.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring an orchestrator.
    pub fn builder() -> OrchestratorBuilder<K, V> {
        OrchestratorBuilder {
            config: OrchestratorConfig::default(),
            cache: None,
        }
    }

    /// Registers `body` as a task and starts its first attempt.
    pub fn go<F>(&self, body: F) -> TaskId
    where
        F: Fn(&Scope<K, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let task = self.register(body);
        let id = task.id();
        task.start();
        id
    }

    /// Registers every body before starting any of them.
    pub fn go_all<I, F>(&self, bodies: I) -> Vec<TaskId>
    where
        I: IntoIterator<Item = F>,
        F: Fn(&Scope<K, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let tasks: Vec<_> = bodies.into_iter().map(|body| self.register(body)).collect();
        for task in &tasks {
            task.start();
        }
        tasks.iter().map(|task| task.id()).collect()
    }

    fn register<F>(&self, body: F) -> Arc<Task<K, V>>
    where
        F: Fn(&Scope<K, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut state = self.shared.state();
        let id = TaskId::new(u64::try_from(state.tasks.len()).unwrap_or(u64::MAX));
        let accepting = state.accepting();
        if accepting {
            self.shared.barrier.reserve();
            state.running += 1;
        }
        state.attendance.insert(
            id,
            Attendance {
                doing: accepting,
                round: 0,
            },
        );

        let weak = Arc::downgrade(&self.shared);
        let task = Task::new(
            id,
            self.store.scope(),
            Box::new(body),
            Box::new(move |task: TaskId, transition: &Transition<'_>| {
                weak.upgrade()
                    .is_some_and(|shared| shared.transition(task, transition))
            }),
        );
        state.tasks.push(Arc::clone(&task));
        task
    }

    /// Blocks until no attempt is pending, or until the first confirmed
    /// failure in fail-fast mode.
    ///
    /// On success the confirmed conditions are saved to the cache, if any.
    ///
    /// # Panics
    ///
    /// Re-raises the payload of a task whose confirmed attempt panicked first.
    #[instrument(skip(self))]
    pub fn wait(&self) -> Result<(), TaskFailure> {
        self.shared.barrier.wait();
        let failure = self.shared.state().failure.clone();
        match failure {
            None => {
                if let Some(cache) = &self.cache {
                    cache.store(self.conditions());
                }
                Ok(())
            }
            Some((task, failure)) => Err(failure.surface(task)),
        }
    }

    /// Confirmed, non-cancelled values written by the tasks' latest attempts,
    /// in task order.
    pub fn conditions(&self) -> Vec<(K, V)> {
        let state = self.shared.state();
        state
            .tasks
            .iter()
            .flat_map(|task| task.confirmed_writes())
            .collect()
    }

    /// Tasks registered so far.
    pub fn spawned(&self) -> usize {
        self.shared.state().tasks.len()
    }

    /// Attempts currently holding a reservation.
    pub fn running(&self) -> usize {
        self.shared.state().running
    }

    /// Latest state reported by `task`.
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.task(task).and_then(|t| t.last_state())
    }

    /// Attempts `task` has started.
    pub fn task_attempts(&self, task: TaskId) -> Option<u64> {
        self.task(task).map(|t| t.attempts())
    }

    fn task(&self, task: TaskId) -> Option<Arc<Task<K, V>>> {
        let index = usize::try_from(task.index()).ok()?;
        self.shared.state().tasks.get(index).cloned()
    }

    /// Current failure policy.
    pub fn fail_mode(&self) -> FailMode {
        self.shared.state().fail_mode
    }

    /// Changes the failure policy for failures recorded from now on.
    pub fn set_fail_mode(&self, fail_mode: FailMode) {
        info!(?fail_mode, "orchestrator fail mode");
        self.shared.state().fail_mode = fail_mode;
    }
}

impl<K: ConditionKey, V: ConditionValue> Default for Orchestrator<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ConditionKey, V: ConditionValue> Deref for Orchestrator<K, V> {
    type Target = Scope<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl<K: ConditionKey, V: ConditionValue> Drop for Orchestrator<K, V> {
    /// Refuses further attempts and releases every task still blocked on a
    /// condition.
    fn drop(&mut self) {
        self.shared.state().closed = true;
        self.store.cancel_all(CancelSignal::aborted("orchestrator dropped"));
    }
}

impl<K: ConditionKey, V: ConditionValue> fmt::Debug for Orchestrator<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state();
        f.debug_struct("Orchestrator")
            .field("spawned", &state.tasks.len())
            .field("running", &state.running)
            .field("pending", &self.shared.barrier.pending())
            .field("fail_mode", &state.fail_mode)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Configures an [`Orchestrator`].
pub struct OrchestratorBuilder<K, V> {
    config: OrchestratorConfig,
    cache: Option<CacheBinding<K, V>>,
}

impl<K: ConditionKey, V: ConditionValue> OrchestratorBuilder<K, V> {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the failure policy.
    pub fn fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.config.fail_mode = fail_mode;
        self
    }

    /// Restores from and saves to `cache`.
    pub fn cache(mut self, cache: CacheBinding<K, V>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builds the orchestrator, seeding the store with the cached snapshot as
    /// legacy values.
    pub fn build(self) -> Orchestrator<K, V> {
        let store = ConditionStore::new();
        if let Some(cache) = &self.cache {
            let restored = cache.restore();
            if !restored.is_empty() {
                store.satisfy_legacy(restored);
            }
        }
        Orchestrator {
            store,
            shared: Arc::new(Shared {
                state: Mutex::new(OrchestratorState {
                    tasks: Vec::new(),
                    attendance: HashMap::new(),
                    running: 0,
                    failure: None,
                    fail_mode: self.config.fail_mode,
                    closed: false,
                }),
                barrier: CompletionBarrier::new(),
            }),
            cache: self.cache,
        }
    }
}

impl<K, V> fmt::Debug for OrchestratorBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}
