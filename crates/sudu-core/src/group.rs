// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fire-and-forget task group with first-failure capture.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{info, warn};

use crate::barrier::CompletionBarrier;
use crate::config::FailMode;
use crate::failure::{Failure, TaskFailure};
use crate::task::TaskId;

/// Observes the first failure of a group.
pub(crate) type FailureHook = Box<dyn Fn(TaskId, &Failure) + Send + Sync>;

struct GroupState {
    spawned: u64,
    running: usize,
    failure: Option<(TaskId, Failure)>,
    fail_mode: FailMode,
}

struct GroupInner {
    state: Mutex<GroupState>,
    barrier: CompletionBarrier,
    hook: Option<FailureHook>,
}

impl GroupInner {
    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, task: TaskId, reserved: bool, failure: Option<Failure>) {
        let first = {
            let mut state = self.state();
            state.running = state.running.saturating_sub(1);
            match failure {
                Some(failure) if state.failure.is_none() => {
                    warn!(%task, %failure, "task failed");
                    state.failure = Some((task, failure.clone()));
                    Some((failure, state.fail_mode))
                }
                _ => None,
            }
        };

        if let Some((failure, fail_mode)) = first {
            if let Some(hook) = &self.hook {
                hook(task, &failure);
            }
            if fail_mode == FailMode::FailFast {
                self.barrier.discard();
                return;
            }
        }
        if reserved {
            self.barrier.release();
        }
    }
}

/// Runs closures on their own threads and waits for all of them.
///
/// The first failure is kept. In [`FailMode::FailFast`] it releases
/// [`wait`](Self::wait) immediately and later [`go`](Self::go) calls no
/// longer hold `wait` back; in [`FailMode::WaitAll`] every closure runs to
/// completion first.
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

impl TaskGroup {
    /// Creates an empty fail-fast group.
    pub fn new() -> Self {
        Self::build(None)
    }

    pub(crate) fn with_failure_hook(hook: FailureHook) -> Self {
        Self::build(Some(hook))
    }

    fn build(hook: Option<FailureHook>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                state: Mutex::new(GroupState {
                    spawned: 0,
                    running: 0,
                    failure: None,
                    fail_mode: FailMode::default(),
                }),
                barrier: CompletionBarrier::new(),
                hook,
            }),
        }
    }

    /// Runs `f` on a new thread.
    ///
    /// Counters and the completion reservation are updated before this
    /// returns. An `Err` is an expected failure; a panic is an unexpected one
    /// and is re-raised by [`wait`](Self::wait).
    pub fn go<F>(&self, f: F) -> TaskId
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let (task, reserved) = {
            let mut state = self.inner.state();
            let task = TaskId::new(state.spawned);
            state.spawned += 1;
            state.running += 1;
            let reserved = state.failure.is_none() || state.fail_mode == FailMode::WaitAll;
            if reserved {
                self.inner.barrier.reserve();
            }
            (task, reserved)
        };

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("sudu-group-{task}"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(f));
                inner.settle(task, reserved, Failure::from_outcome(outcome));
            });
        if let Err(err) = spawned {
            self.inner.settle(task, reserved, Some(Failure::spawn(err)));
        }
        task
    }

    /// Blocks until every reserved closure finished, or the first failure in
    /// fail-fast mode.
    ///
    /// # Panics
    ///
    /// Re-raises the payload of a closure that panicked first.
    pub fn wait(&self) -> Result<(), TaskFailure> {
        self.inner.barrier.wait();
        let failure = self.inner.state().failure.clone();
        match failure {
            None => Ok(()),
            Some((task, failure)) => Err(failure.surface(task)),
        }
    }

    /// Closures started so far.
    pub fn spawned(&self) -> u64 {
        self.inner.state().spawned
    }

    /// Closures still running.
    pub fn running(&self) -> usize {
        self.inner.state().running
    }

    /// Current failure policy.
    pub fn fail_mode(&self) -> FailMode {
        self.inner.state().fail_mode
    }

    /// Changes the failure policy for failures recorded from now on.
    pub fn set_fail_mode(&self, fail_mode: FailMode) {
        info!(?fail_mode, "task group fail mode");
        self.inner.state().fail_mode = fail_mode;
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("TaskGroup")
            .field("spawned", &state.spawned)
            .field("running", &state.running)
            .field("fail_mode", &state.fail_mode)
            .finish_non_exhaustive()
    }
}
