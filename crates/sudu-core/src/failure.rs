// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Attempt failures: expected errors and captured panics.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::resume_unwind;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use thiserror::Error;

use crate::task::TaskId;

/// An expected failure surfaced by [`Orchestrator::wait`] or
/// [`TaskGroup::wait`].
///
/// [`Orchestrator::wait`]: crate::Orchestrator::wait
/// [`TaskGroup::wait`]: crate::TaskGroup::wait
#[derive(Debug, Clone, Error)]
#[error("{task} failed: {error:#}")]
pub struct TaskFailure {
    /// The task whose attempt failed first.
    pub task: TaskId,
    error: Arc<anyhow::Error>,
}

impl TaskFailure {
    /// The error the task body returned.
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Downcasts the underlying error, e.g. to [`crate::Cancelled`].
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Panic payload kept until it is re-raised.
///
/// The original payload can only be resumed once; later re-raises carry the
/// rendered message instead.
pub(crate) struct PanicSlot {
    payload: Mutex<Option<Box<dyn Any + Send>>>,
    message: String,
}

/// Outcome of a failed attempt.
#[derive(Clone)]
pub(crate) enum Failure {
    Error(Arc<anyhow::Error>),
    Panic(Arc<PanicSlot>),
}

impl Failure {
    /// Classifies what a task body produced; `None` on success.
    pub(crate) fn from_outcome(outcome: thread::Result<anyhow::Result<()>>) -> Option<Self> {
        match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(Self::Error(Arc::new(err))),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                Some(Self::Panic(Arc::new(PanicSlot {
                    payload: Mutex::new(Some(payload)),
                    message,
                })))
            }
        }
    }

    pub(crate) fn spawn(err: io::Error) -> Self {
        Self::Error(Arc::new(
            anyhow::Error::new(err).context("failed to spawn task thread"),
        ))
    }

    #[cfg(test)]
    pub(crate) fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }

    /// Returns the expected failure as an error, re-raises a panic.
    pub(crate) fn surface(&self, task: TaskId) -> TaskFailure {
        match self {
            Self::Error(error) => TaskFailure {
                task,
                error: Arc::clone(error),
            },
            Self::Panic(slot) => {
                let payload = slot
                    .payload
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match payload {
                    Some(payload) => resume_unwind(payload),
                    None => resume_unwind(Box::new(slot.message.clone())),
                }
            }
        }
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::Panic(slot) => f.debug_tuple("Panic").field(&slot.message).finish(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err:#}"),
            Self::Panic(slot) => write!(f, "panicked: {}", slot.message),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn success_is_not_a_failure() {
        assert!(Failure::from_outcome(Ok(Ok(()))).is_none());
    }

    #[test]
    fn errors_surface_as_task_failure() {
        let failure = Failure::from_outcome(Ok(Err(anyhow::anyhow!("bad input")))).unwrap();
        assert!(!failure.is_panic());
        let surfaced = failure.surface(TaskId::new(3));
        assert_eq!(surfaced.task, TaskId::new(3));
        assert_eq!(surfaced.to_string(), "task#3 failed: bad input");
    }

    #[test]
    fn panics_resume_with_the_original_payload() {
        let caught: thread::Result<anyhow::Result<()>> =
            catch_unwind(|| -> anyhow::Result<()> { panic!("kaboom") });
        let failure = Failure::from_outcome(caught).unwrap();
        assert!(failure.is_panic());
        assert_eq!(failure.to_string(), "panicked: kaboom");

        let first = catch_unwind(AssertUnwindSafe(|| failure.surface(TaskId::new(0))));
        let payload = first.unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "kaboom");

        let second = catch_unwind(AssertUnwindSafe(|| failure.surface(TaskId::new(0))));
        let payload = second.unwrap_err();
        assert_eq!(payload.downcast_ref::<String>().unwrap(), "kaboom");
    }
}
