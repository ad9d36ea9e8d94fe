//! # Coalescing Control Bus
//!
//! Many-producer/one-consumer mailbox for side-band commands such as resize
//! notifications. Messages are keyed; a pending message is replaced by a
//! newer one with the same key instead of queueing behind it.
//!
//! ```text
//!   post(Resize 800x600) ─┐
//!   post(Suspend)        ─┼──>  { Resize: 1024x768, Suspend }  ──drain──> apply
//!   post(Resize 1024x768)─┘        at most one entry per key
//! ```
//!
//! The bus never blocks the frame path for long: posters and the drainer
//! only hold the lock for a map insert or a map swap.
//!
//! Posting is only reachable through [`ControlPoster`], draining and
//! clearing only through [`ControlDrainer`]. The shared [`ControlBus`] handed
//! out by either end exposes observers only:
//!
//! ```compile_fail
//! use triad_core::{ControlBus, RenderControl};
//!
//! let (_poster, drainer) = ControlBus::new(None, RenderControl::key);
//! drainer.bus().post(RenderControl::resize(1, 1));
//! ```
//!
//! ```compile_fail
//! use triad_core::{ControlBus, RenderControl};
//!
//! let (poster, _drainer) = ControlBus::new(None, RenderControl::key);
//! poster.bus().clear();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Derives the coalescing key of a message.
pub type KeyFn<M> = fn(&M) -> u64;

/// Shared storage behind posters and the drainer.
pub struct ControlBus<M> {
    pending: Mutex<HashMap<u64, M>>,
    /// Recycled map the drainer swaps in, so steady-state drains don't allocate.
    spare: Mutex<HashMap<u64, M>>,
    capacity: Option<usize>,
    key_of: KeyFn<M>,
    dropped: AtomicU64,
}

impl<M> ControlBus<M> {
    /// Creates a bus and splits it into a poster and the single drainer.
    ///
    /// `capacity` bounds the number of distinct pending keys (`None` for no
    /// bound). New keys past the bound are dropped; existing keys still
    /// coalesce.
    #[must_use]
    pub fn new(capacity: Option<usize>, key_of: KeyFn<M>) -> (ControlPoster<M>, ControlDrainer<M>) {
        let initial = capacity.unwrap_or(0);
        let bus = Arc::new(Self {
            pending: Mutex::new(HashMap::with_capacity(initial)),
            spare: Mutex::new(HashMap::with_capacity(initial)),
            capacity,
            key_of,
            dropped: AtomicU64::new(0),
        });

        (
            ControlPoster {
                bus: Arc::clone(&bus),
            },
            ControlDrainer { bus },
        )
    }

    /// Posts a message. Returns `true` if it is now pending.
    ///
    /// A message for an already-pending key always replaces it. A message
    /// for a new key is dropped when the bus is at capacity.
    pub(crate) fn post(&self, message: M) -> bool {
        let key = (self.key_of)(&message);
        let mut pending = self.pending.lock();

        if let Some(slot) = pending.get_mut(&key) {
            *slot = message;
            return true;
        }
        if self.capacity.is_some_and(|cap| pending.len() >= cap) {
            drop(pending);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        pending.insert(key, message);
        true
    }

    /// Removes every pending entry and applies each exactly once.
    ///
    /// Posts racing this call land either in this batch or the next one.
    /// Returns the number of entries applied.
    ///
    /// The batch is owned by this call while it is applied: a panicking
    /// `apply` drops the rest of the batch with it.
    fn drain(&self, mut apply: impl FnMut(M)) -> usize {
        let mut batch = std::mem::take(&mut *self.spare.lock());
        let swapped = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                false
            } else {
                std::mem::swap(&mut *pending, &mut batch);
                true
            }
        };
        if !swapped {
            *self.spare.lock() = batch;
            return 0;
        }

        let count = batch.len();
        for (_, message) in batch.drain() {
            apply(message);
        }
        *self.spare.lock() = batch;
        count
    }

    /// Discards every pending entry.
    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Bound on distinct pending keys.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of posts dropped because the bus was at capacity.
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Post end of a control bus. Cheap to clone, one per producer.
pub struct ControlPoster<M> {
    bus: Arc<ControlBus<M>>,
}

impl<M> ControlPoster<M> {
    /// Posts a message. Returns `true` if it is now pending.
    ///
    /// A message for an already-pending key always replaces it. A message
    /// for a new key is dropped when the bus is at capacity.
    #[inline]
    pub fn post(&self, message: M) -> bool {
        self.bus.post(message)
    }

    /// Access to the shared bus state.
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &ControlBus<M> {
        &self.bus
    }
}

impl<M> Clone for ControlPoster<M> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
        }
    }
}

/// Drain end of a control bus. Exactly one exists per bus.
pub struct ControlDrainer<M> {
    bus: Arc<ControlBus<M>>,
}

impl<M> ControlDrainer<M> {
    /// Applies and removes every pending entry. See [`ControlBus`].
    #[inline]
    pub fn drain(&mut self, apply: impl FnMut(M)) -> usize {
        self.bus.drain(apply)
    }

    /// Discards every pending entry.
    #[inline]
    pub fn clear(&mut self) {
        self.bus.clear();
    }

    /// Access to the shared bus state.
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &ControlBus<M> {
        &self.bus
    }
}
