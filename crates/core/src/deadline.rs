//! Cooperative cancellation (spec §5, "Cancellation and timeouts").
//!
//! No operation cancels mid-syscall; long-running loops (query execution,
//! BFS frontier expansion, chunk decoding) check a `Deadline` between units
//! of work and return `Error::Cancelled`/`Error::Timeout` at the next
//! checkpoint.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A deadline plus an out-of-band cancellation flag, threaded through
/// query/search/traversal execution.
#[derive(Clone)]
pub struct Deadline {
    expires_at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// No deadline, not cancelled.
    pub fn none() -> Self {
        Deadline {
            expires_at: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline {
            expires_at: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation; visible to every clone of this `Deadline`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Call at a cooperative checkpoint; returns the first fatal condition
    /// encountered, if any.
    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled("operation cancelled".into()));
        }
        if let Some(at) = self.expires_at {
            if Instant::now() >= at {
                return Err(Error::Timeout("deadline exceeded".into()));
            }
        }
        Ok(())
    }

    /// Remaining time, or `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}
