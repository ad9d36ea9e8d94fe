//! # Bounded SPSC Ring Channel
//!
//! Lock-free single-producer/single-consumer FIFO used for frame pacing and
//! input between the Main and Game roles.
//!
//! ## Safety Note
//!
//! The slots live in `UnsafeCell`s. Exclusive access to a slot is derived
//! from the head/tail protocol, and the one-producer/one-consumer contract
//! is enforced by the endpoint types: [`RingWriter`] and [`RingReader`] are
//! neither `Clone` nor usable through a shared reference.

#![allow(unsafe_code)]
//!
//! ## Layout
//!
//! ```text
//!   head (consumer)              tail (producer)
//!        │                             │
//!        ▼                             ▼
//!   ┌────┬────┬────┬────┬────┬────┬────┬────┐
//!   │ -- │ x1 │ x2 │ x3 │ x4 │ -- │ -- │ -- │   index = offset & (N - 1)
//!   └────┴────┴────┴────┴────┴────┴────┴────┘
//!
//!   occupancy = tail - head      (64-bit offsets, never wrapped)
//! ```
//!
//! The producer stores into `slot[tail & mask]` and only then publishes
//! `tail + 1` with `Release`. The consumer loads `tail` with `Acquire`, so it
//! never sees an advanced tail before the slot write is visible.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::{Backoff, CachePadded};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::error::{ChannelError, ChannelResult};

/// What a blocking `write` does when the ring is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullPolicy {
    /// Wait (with the configured [`WaitStrategy`]) until a slot frees up.
    #[default]
    Wait,
    /// Never wait. A full ring makes `write` fail with [`ChannelError::Full`].
    DropOnFull,
}

/// How blocking calls wait between retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Busy-spin only. Lowest latency, burns the core.
    Spin,
    /// Spin briefly, then yield the thread on longer stalls.
    #[default]
    Hybrid,
}

/// Shared storage behind a writer/reader pair.
pub struct RingChannel<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    mask: u64,
    /// Next offset to read. Advanced only by the consumer.
    head: CachePadded<AtomicU64>,
    /// Next offset to write. Advanced only by the producer.
    tail: CachePadded<AtomicU64>,
    /// One-way flag: false -> true.
    completed: AtomicBool,
    policy: FullPolicy,
    wait: WaitStrategy,
}

// SAFETY: Items are moved across threads (requires `T: Send`). Slot access is
// partitioned by the head/tail protocol, one producer and one consumer.
unsafe impl<T: Send> Send for RingChannel<T> {}
// SAFETY: See above. Shared access only happens through the split endpoints.
unsafe impl<T: Send> Sync for RingChannel<T> {}

impl<T> RingChannel<T> {
    /// Creates a ring and splits it into its two endpoints.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two.
    #[must_use]
    pub fn bounded(
        capacity: usize,
        policy: FullPolicy,
        wait: WaitStrategy,
    ) -> (RingWriter<T>, RingReader<T>) {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a non-zero power of two, got {capacity}"
        );

        let slots = (0..capacity).map(|_| UnsafeCell::new(None)).collect();
        let ring = Arc::new(Self {
            slots,
            mask: capacity as u64 - 1,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            completed: AtomicBool::new(false),
            policy,
            wait,
        });

        (
            RingWriter {
                ring: Arc::clone(&ring),
            },
            RingReader { ring },
        )
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Items currently queued.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        // A stale head can only make this smaller than the real value.
        tail.saturating_sub(head) as usize
    }

    /// Returns whether no item is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether every slot is occupied.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Returns whether the channel has been completed.
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Marks the channel completed. Idempotent.
    #[inline]
    pub fn complete(&self) {
        self.completed.store(true, Ordering::Release);
    }

    /// The full-buffer policy this ring was built with.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> FullPolicy {
        self.policy
    }

    /// The wait strategy used by blocking calls.
    #[inline]
    #[must_use]
    pub fn wait_strategy(&self) -> WaitStrategy {
        self.wait
    }

    /// Producer side. Hands the item back if completed or full.
    ///
    /// Only [`RingWriter`] calls this, so there is a single producer.
    fn push(&self, item: T) -> Result<(), T> {
        if self.is_completed() {
            return Err(item);
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail - head == self.capacity() as u64 {
            return Err(item);
        }

        // SAFETY: Single producer. The slot at `tail` is outside the
        // consumer's window [head, tail), so nobody else touches it until
        // the Release store below publishes it.
        unsafe {
            *self.slots[(tail & self.mask) as usize].get() = Some(item);
        }
        self.tail.store(tail + 1, Ordering::Release);
        Ok(())
    }

    /// Consumer side. Clears the slot before releasing it to the producer.
    ///
    /// Only [`RingReader`] calls this, so there is a single consumer.
    fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        // SAFETY: Single consumer. The Acquire load of `tail` makes the
        // producer's store into this slot visible, and the producer will not
        // reuse it until `head` moves past it.
        let item = unsafe { (*self.slots[(head & self.mask) as usize].get()).take() };
        self.head.store(head + 1, Ordering::Release);
        item
    }

    #[inline]
    fn backoff(&self, backoff: &Backoff) {
        match self.wait {
            WaitStrategy::Spin => backoff.spin(),
            WaitStrategy::Hybrid => backoff.snooze(),
        }
    }
}

/// Producer end of a ring. Dropping it completes the channel.
pub struct RingWriter<T> {
    ring: Arc<RingChannel<T>>,
}

impl<T> RingWriter<T> {
    /// Attempts one non-blocking write.
    ///
    /// # Errors
    ///
    /// Hands the item back if the channel is completed or full.
    #[inline]
    pub fn try_write(&mut self, item: T) -> Result<(), T> {
        self.ring.push(item)
    }

    /// Writes an item, waiting for space under [`FullPolicy::Wait`].
    ///
    /// Under [`FullPolicy::DropOnFull`] this makes exactly one attempt and
    /// never blocks.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Closed`] if the channel is (or becomes) completed
    /// - [`ChannelError::Canceled`] if `cancel` is raised while waiting
    /// - [`ChannelError::Full`] if full under drop-on-full (item dropped)
    pub fn write(&mut self, item: T, cancel: &CancelSignal) -> ChannelResult<()> {
        let ring = &*self.ring;

        if ring.policy == FullPolicy::DropOnFull {
            return match ring.push(item) {
                Ok(()) => Ok(()),
                Err(_) if ring.is_completed() => Err(ChannelError::Closed),
                Err(_) => Err(ChannelError::Full),
            };
        }

        let backoff = Backoff::new();
        let mut item = item;
        loop {
            match ring.push(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
            if ring.is_completed() {
                return Err(ChannelError::Closed);
            }
            if cancel.is_canceled() {
                return Err(ChannelError::Canceled);
            }
            ring.backoff(&backoff);
        }
    }

    /// Completes the channel. Idempotent.
    #[inline]
    pub fn complete(&self) {
        self.ring.complete();
    }

    /// Access to the shared ring state.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &RingChannel<T> {
        &self.ring
    }
}

impl<T> Drop for RingWriter<T> {
    fn drop(&mut self) {
        self.ring.complete();
    }
}

/// Consumer end of a ring. Dropping it completes the channel.
pub struct RingReader<T> {
    ring: Arc<RingChannel<T>>,
}

impl<T> RingReader<T> {
    /// Attempts one non-blocking read.
    ///
    /// Returns `None` when the ring is empty. Items written before
    /// completion are still returned.
    #[inline]
    pub fn try_read(&mut self) -> Option<T> {
        self.ring.pop()
    }

    /// Reads an item, waiting until one arrives.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Closed`] once the channel is completed and drained
    /// - [`ChannelError::Canceled`] if `cancel` is raised while waiting
    pub fn read(&mut self, cancel: &CancelSignal) -> ChannelResult<T> {
        let ring = &*self.ring;
        let backoff = Backoff::new();
        loop {
            if let Some(item) = ring.pop() {
                return Ok(item);
            }
            if ring.is_completed() {
                // Items published before completion must still drain.
                return ring.pop().ok_or(ChannelError::Closed);
            }
            if cancel.is_canceled() {
                return Err(ChannelError::Canceled);
            }
            ring.backoff(&backoff);
        }
    }

    /// Reads up to `max` queued items without waiting.
    ///
    /// Returns the number of items handed to `f`.
    pub fn drain(&mut self, max: usize, mut f: impl FnMut(T)) -> usize {
        let mut count = 0;
        while count < max {
            match self.ring.pop() {
                Some(item) => {
                    f(item);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Completes the channel. Idempotent.
    #[inline]
    pub fn complete(&self) {
        self.ring.complete();
    }

    /// Access to the shared ring state.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &RingChannel<T> {
        &self.ring
    }
}

impl<T> Drop for RingReader<T> {
    fn drop(&mut self) {
        self.ring.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::thread;
    use std::time::Duration;

    fn ring<T>(capacity: usize, policy: FullPolicy) -> (RingWriter<T>, RingReader<T>) {
        RingChannel::bounded(capacity, policy, WaitStrategy::Hybrid)
    }

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = ring::<u32>(16, FullPolicy::Wait);

        for i in 0..16 {
            assert!(tx.try_write(i).is_ok());
        }
        let read: Vec<u32> = (0..16).map(|_| rx.try_read().unwrap()).collect();

        assert_eq!(read, (0..16).collect::<Vec<_>>());
        assert!(rx.try_read().is_none());
    }

    #[test]
    fn test_capacity_four() {
        let (mut tx, mut rx) = ring::<u32>(4, FullPolicy::DropOnFull);

        for i in 0..4 {
            assert!(tx.try_write(i).is_ok());
        }
        assert_eq!(tx.try_write(4), Err(4));
        assert!(tx.channel().is_full());

        assert_eq!(rx.try_read(), Some(0));
        assert!(tx.try_write(5).is_ok());
        assert_eq!(tx.try_write(6), Err(6));
    }

    #[test]
    fn test_offsets_keep_counting_past_capacity() {
        let (mut tx, mut rx) = ring::<u64>(2, FullPolicy::Wait);

        for i in 0..1000 {
            assert!(tx.try_write(i).is_ok());
            assert_eq!(rx.try_read(), Some(i));
        }
        assert!(rx.channel().is_empty());
    }

    #[test]
    fn test_complete_is_idempotent() {
        let (mut tx, mut rx) = ring::<u32>(4, FullPolicy::Wait);
        let cancel = CancelSignal::new();

        assert!(tx.try_write(1).is_ok());
        tx.complete();
        tx.complete();

        assert!(tx.channel().is_completed());
        assert_eq!(tx.try_write(2), Err(2));
        assert_eq!(tx.write(3, &cancel), Err(ChannelError::Closed));

        // Drains what was written before completion, then stays closed.
        assert_eq!(rx.read(&cancel), Ok(1));
        assert_eq!(rx.read(&cancel), Err(ChannelError::Closed));
        for _ in 0..3 {
            assert!(rx.try_read().is_none());
        }
    }

    #[test]
    fn test_drop_on_full_write_never_blocks() {
        let (mut tx, _rx) = ring::<u32>(2, FullPolicy::DropOnFull);
        let cancel = CancelSignal::new();

        assert_eq!(tx.write(1, &cancel), Ok(()));
        assert_eq!(tx.write(2, &cancel), Ok(()));
        assert_eq!(tx.write(3, &cancel), Err(ChannelError::Full));
    }

    #[test]
    fn test_blocking_write_canceled() {
        let (mut tx, _rx) = ring::<u32>(1, FullPolicy::Wait);
        let cancel = CancelSignal::new();
        assert!(tx.try_write(0).is_ok());

        let remote = cancel.clone();
        let canceler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.cancel(CancelReason::User);
        });

        assert_eq!(tx.write(1, &cancel), Err(ChannelError::Canceled));
        canceler.join().unwrap();
    }

    #[test]
    fn test_blocking_read_canceled() {
        let (_tx, mut rx) = ring::<u32>(4, FullPolicy::Wait);
        let cancel = CancelSignal::new();
        cancel.cancel(CancelReason::User);

        assert_eq!(rx.read(&cancel), Err(ChannelError::Canceled));
    }

    #[test]
    fn test_writer_drop_closes_reader() {
        let (mut tx, mut rx) = ring::<u32>(4, FullPolicy::Wait);
        let cancel = CancelSignal::new();

        assert!(tx.try_write(7).is_ok());
        drop(tx);

        assert_eq!(rx.read(&cancel), Ok(7));
        assert_eq!(rx.read(&cancel), Err(ChannelError::Closed));
    }

    #[test]
    fn test_reader_drop_closes_writer() {
        let (mut tx, rx) = ring::<u32>(1, FullPolicy::Wait);
        let cancel = CancelSignal::new();
        assert!(tx.try_write(1).is_ok());

        drop(rx);
        assert_eq!(tx.write(2, &cancel), Err(ChannelError::Closed));
    }

    #[test]
    fn test_consumed_slot_is_released() {
        let (mut tx, mut rx) = ring::<Arc<u32>>(4, FullPolicy::Wait);
        let value = Arc::new(5);

        assert!(tx.try_write(Arc::clone(&value)).is_ok());
        let got = rx.try_read().unwrap();
        drop(got);

        // The ring kept no reference after the read.
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_drain_batch() {
        let (mut tx, mut rx) = ring::<u32>(8, FullPolicy::Wait);
        for i in 0..6 {
            assert!(tx.try_write(i).is_ok());
        }

        let mut seen = Vec::new();
        assert_eq!(rx.drain(4, |x| seen.push(x)), 4);
        assert_eq!(rx.drain(usize::MAX, |x| seen.push(x)), 2);
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_threaded_fifo_under_contention() {
        let mut rng = StdRng::seed_from_u64(0x7121_AD);
        let expected: Vec<u64> = (0..50_000).map(|_| rng.gen()).collect();
        let (mut tx, mut rx) = ring::<u64>(8, FullPolicy::Wait);
        let cancel = CancelSignal::new();

        let producer = {
            let items = expected.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                for item in items {
                    tx.write(item, &cancel).unwrap();
                }
            })
        };

        let mut received = Vec::with_capacity(expected.len());
        loop {
            match rx.read(&cancel) {
                Ok(item) => received.push(item),
                Err(ChannelError::Closed) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        producer.join().unwrap();

        assert_eq!(received, expected);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two() {
        let _ = ring::<u32>(3, FullPolicy::Wait);
    }
}
