//! # Latest-Wins Snapshot Cell
//!
//! Double-buffered cell carrying the scene view from Game to Render.
//!
//! ## Safety Note
//!
//! The two slots are plain `UnsafeCell`s read optimistically (seqlock). A
//! read may overlap a publish into the same slot; that copy is discarded
//! when the version check fails, which is why `T: Copy` is required.

#![allow(unsafe_code)]
//!
//! ## Protocol
//!
//! ```text
//! publish(v):                      read():
//!   i = (version + 1) & 1            loop {
//!   fence(Release)                     v1 = version      (Acquire)
//!   slot[i] = v     (volatile)         i  = v1 & 1
//!   version += 1    (Release)          x  = slot[i]      (volatile)
//!                                      fence(Acquire)
//!                                      v2 = version
//!                                      if v1 == v2 { return (x, v2) }
//!                                    }
//! ```
//!
//! The two fences pair up. If a reader's copy saw any byte of a publish,
//! the writer's `fence(Release)` before that publish synchronizes with the
//! reader's `fence(Acquire)`, so `v2` sees at least the version stored by
//! the previous publish and the copy is rejected. A `Release` store alone
//! would not do: it orders what comes before it, not the next slot write.
//!
//! The active-slot selector is the low bit of `version`, so flipping the
//! selector and bumping the version is a single atomic step. A reader can
//! never pair a value with the wrong version. The writer only ever touches
//! the inactive slot, and it reaches the slot a reader is copying only one
//! full publish later, after the version has moved on.

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::cancel::CancelSignal;
use crate::error::{ChannelError, ChannelResult};

/// Shared storage behind a publisher/reader pair.
pub struct SnapshotCell<T> {
    slots: [UnsafeCell<T>; 2],
    /// Incremented by exactly one per publish. Starts at 0. The low bit
    /// selects the slot holding the latest fully written value.
    version: CachePadded<AtomicU64>,
}

// SAFETY: Values are copied across threads (requires `T: Send`). Writes go
// only to the inactive slot; torn reads are detected and retried.
unsafe impl<T: Copy + Send> Send for SnapshotCell<T> {}
// SAFETY: See above.
unsafe impl<T: Copy + Send> Sync for SnapshotCell<T> {}

impl<T: Copy> SnapshotCell<T> {
    /// Creates a cell holding `initial` at version 0 and splits it.
    #[must_use]
    pub fn new(initial: T) -> (SnapshotPublisher<T>, SnapshotReader<T>) {
        let cell = Arc::new(Self {
            slots: [UnsafeCell::new(initial), UnsafeCell::new(initial)],
            version: CachePadded::new(AtomicU64::new(0)),
        });

        (
            SnapshotPublisher {
                cell: Arc::clone(&cell),
            },
            SnapshotReader { cell },
        )
    }

    /// Current version without reading the value.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Only [`SnapshotPublisher`] calls this, so there is a single writer.
    fn publish(&self, value: T) {
        let current = self.version.load(Ordering::Relaxed);
        let next = slot_of(current + 1);

        // Orders the previous version store before this slot write. Pairs
        // with the fence in `read`.
        fence(Ordering::Release);

        // SAFETY: Single writer, and `next` is not the active slot. Readers
        // that still copy from it loaded a version at least two behind the
        // one published below, so their check fails and they retry.
        unsafe {
            std::ptr::write_volatile(self.slots[next].get(), value);
        }
        self.version.store(current + 1, Ordering::Release);
    }

    fn read(&self) -> (T, u64) {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            let idx = slot_of(v1);

            // SAFETY: The slot always holds an initialized `T: Copy`. A copy
            // that overlapped a publish is thrown away by the check below.
            let value = unsafe { std::ptr::read_volatile(self.slots[idx].get()) };

            // Pairs with the fence in `publish`.
            fence(Ordering::Acquire);
            let v2 = self.version.load(Ordering::Relaxed);
            if v1 == v2 {
                return (value, v2);
            }
            std::hint::spin_loop();
        }
    }
}

#[inline]
const fn slot_of(version: u64) -> usize {
    (version & 1) as usize
}

/// Publish end of a snapshot cell.
pub struct SnapshotPublisher<T> {
    cell: Arc<SnapshotCell<T>>,
}

impl<T: Copy> SnapshotPublisher<T> {
    /// Publishes a new latest value. Never blocks.
    #[inline]
    pub fn publish(&mut self, value: T) {
        self.cell.publish(value);
    }

    /// Number of publishes so far.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }
}

/// Read end of a snapshot cell.
pub struct SnapshotReader<T> {
    cell: Arc<SnapshotCell<T>>,
}

impl<T: Copy> SnapshotReader<T> {
    /// Returns the latest value and the version it was published at.
    #[inline]
    #[must_use]
    pub fn read(&self) -> (T, u64) {
        self.cell.read()
    }

    /// Returns the latest value only if it is newer than `last_version`.
    #[must_use]
    pub fn read_if_newer(&self, last_version: u64) -> Option<(T, u64)> {
        if self.cell.version() == last_version {
            return None;
        }
        let (value, version) = self.cell.read();
        (version != last_version).then_some((value, version))
    }

    /// Current version without reading the value.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    /// Spins until the version differs from `last_version`.
    ///
    /// Never parks the thread.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Canceled`] if `cancel` is raised first.
    pub fn wait_for_change(&self, last_version: u64, cancel: &CancelSignal) -> ChannelResult<u64> {
        loop {
            let version = self.cell.version();
            if version != last_version {
                return Ok(version);
            }
            if cancel.is_canceled() {
                return Err(ChannelError::Canceled);
            }
            std::hint::spin_loop();
        }
    }
}
