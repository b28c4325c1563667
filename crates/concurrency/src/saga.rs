//! SAGA-style compensating transaction coordinator (spec §4.7).
//!
//! Grounded on the teacher's `TransactionManager` commit-coordination shape,
//! generalized from single-store OCC commit to a named sequence of forward
//! steps each paired with a compensation — the answer to "how does a
//! multi-index write undo a partial failure" when the backbone itself only
//! guarantees atomicity within a single `write_batch`.

use tracing::{error, warn};
use weave_core::error::Result;

struct Step {
    name: String,
    compensation: Box<dyn FnOnce() -> Result<()> + Send>,
}

/// Coordinates a sequence of already-applied forward actions and their
/// compensations. Callers execute a forward action themselves, then push
/// its compensation with [`Saga::step`]; if a later forward action fails,
/// [`Saga::compensate`] unwinds everything pushed so far in reverse order.
/// A `Saga` dropped without an explicit [`Saga::commit`] auto-compensates,
/// so a `?` that unwinds the caller's stack never leaves partial state
/// behind.
#[derive(Default)]
pub struct Saga {
    steps: Vec<Step>,
    committed: bool,
}

impl Saga {
    /// An empty saga.
    pub fn new() -> Self {
        Saga::default()
    }

    /// Record a step that has already run forward, along with the action
    /// that undoes it.
    pub fn step(
        &mut self,
        name: impl Into<String>,
        compensation: impl FnOnce() -> Result<()> + Send + 'static,
    ) {
        self.steps.push(Step {
            name: name.into(),
            compensation: Box::new(compensation),
        });
    }

    /// Number of steps recorded so far.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if no steps have been recorded.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Disarm compensation: everything recorded so far is considered
    /// permanent. Consumes the saga so it can no longer be compensated.
    pub fn commit(mut self) {
        self.committed = true;
        self.steps.clear();
    }

    /// Run every recorded compensation in reverse order, draining the step
    /// list as it goes. Idempotent: calling this twice, or once explicitly
    /// and once via `Drop`, only ever compensates each step once.
    ///
    /// A compensation failure is logged, not propagated: rollback must keep
    /// going even when one compensating action itself fails, since a
    /// forward step already partially mutated the store and skipping its
    /// neighbors would leave more behind, not less.
    pub fn compensate(&mut self) {
        while let Some(step) = self.steps.pop() {
            match (step.compensation)() {
                Ok(()) => warn!(step = %step.name, "compensated saga step"),
                Err(e) => error!(step = %step.name, error = %e, "compensation failed during saga rollback"),
            }
        }
    }
}

impl Drop for Saga {
    fn drop(&mut self) {
        if !self.committed && !self.steps.is_empty() {
            self.compensate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn commit_disarms_compensation() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut saga = Saga::new();
        let flag = ran.clone();
        saga.step("write-entity", move || {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        saga.commit();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_without_commit_compensates_in_reverse_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));
        {
            let mut saga = Saga::new();
            let o1 = order.clone();
            saga.step("first", move || {
                o1.lock().unwrap().push("first");
                Ok(())
            });
            let o2 = order.clone();
            saga.step("second", move || {
                o2.lock().unwrap().push("second");
                Ok(())
            });
        }
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn explicit_compensate_is_idempotent() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut saga = Saga::new();
        let flag = ran.clone();
        saga.step("x", move || {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        saga.compensate();
        saga.compensate();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_compensation_does_not_stop_the_rest() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut saga = Saga::new();
        saga.step("ok-one", || Err(weave_core::error::Error::internal("boom")));
        let flag = ran.clone();
        saga.step("ok-two", move || {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        saga.compensate();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    fn parking_lot_free_mutex() -> std::sync::Mutex<Vec<&'static str>> {
        std::sync::Mutex::new(Vec::new())
    }
}
