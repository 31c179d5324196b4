// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Completion barrier with an open-ended number of reservations.
//!
//! Unlike `std::sync::Barrier` the participant count is not fixed: work is
//! reserved and released as it comes and goes, and [`CompletionBarrier::wait`]
//! returns once nothing is pending. [`CompletionBarrier::discard`] drops every
//! outstanding reservation at once (fail-fast).

use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
pub(crate) struct CompletionBarrier {
    pending: Mutex<usize>,
    cv: Condvar,
}

impl CompletionBarrier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reserve(&self) {
        let mut pending = self.lock();
        *pending += 1;
    }

    /// Releases one reservation. Saturates at zero, so releases arriving
    /// after a [`discard`](Self::discard) are harmless.
    pub(crate) fn release(&self) {
        let mut pending = self.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.cv.notify_all();
        }
    }

    pub(crate) fn discard(&self) {
        let mut pending = self.lock();
        *pending = 0;
        self.cv.notify_all();
    }

    pub(crate) fn pending(&self) -> usize {
        *self.lock()
    }

    pub(crate) fn wait(&self) {
        let mut pending = self.lock();
        while *pending > 0 {
            pending = self.cv.wait(pending).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
