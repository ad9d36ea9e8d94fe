//! # Cancellation Signal
//!
//! One signal per run, shared by every role. Cancellation is cooperative:
//! loops poll it at the top of each frame and blocking channel calls poll it
//! between retries. Nothing is ever force-unwound.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Why a run was canceled. The first reason recorded wins.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// Normal teardown after the coordinating loop finished.
    Shutdown = 1,
    /// A user-initiated cancel (close button, signal handler, ...).
    User = 2,
    /// Another role ended with a failing status.
    Fault = 3,
}

impl CancelReason {
    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Shutdown),
            2 => Some(Self::User),
            3 => Some(Self::Fault),
            _ => None,
        }
    }
}

const RUNNING: u8 = 0;

/// Cloneable handle over one shared cancellation flag.
#[derive(Clone)]
pub struct CancelSignal {
    state: Arc<AtomicU8>,
}

impl CancelSignal {
    /// Creates a new, un-canceled signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RUNNING)),
        }
    }

    /// Raises the signal.
    ///
    /// Returns `true` if this call was the one that canceled the run.
    /// Later calls keep the original reason.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.state
            .compare_exchange(RUNNING, reason as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns whether the signal has been raised.
    #[inline]
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    /// Returns the recorded reason, if the signal has been raised.
    #[inline]
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        CancelReason::from_raw(self.state.load(Ordering::Acquire))
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("reason", &self.reason())
            .finish()
    }
}
