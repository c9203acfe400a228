//! Producer barrier over a [`ChunkedBuffer`]: claims never wait for consumers.
//!
//! Any number of producers claim by `fetch_add` on the cursor and publish
//! through per-slot published marks. Memory is bounded by the gap between the
//! fastest producer and the slowest gating consumer, since consumed chunks are
//! recycled or dropped whenever a producer crosses into a new chunk.

use crate::blocker::SequenceBlocker;
use crate::chunked_buffer::ChunkedBuffer;
use crate::consumer_barrier::ConsumerBarrier;
use crate::error::{InsufficientCapacity, Interrupted};
use crate::gating::GatingSequences;
use crate::producer_barrier::ProducerBarrier;
use crate::sequence::Sequence;
use std::fmt;
use std::sync::atomic::AtomicBool;

/// Multi-producer barrier over a [`ChunkedBuffer`].
///
/// [`ProducerBarrier::sequence`] reports the highest *claimed* sequence;
/// consumers find the published prefix through the buffer's per-slot marks.
pub struct UnboundedProducerBarrier<E> {
    buffer: ChunkedBuffer<E>,
    /// Highest claimed sequence.
    cursor: Sequence,
    gating: GatingSequences,
    blocker: Option<SequenceBlocker>,
}

impl<E> fmt::Debug for UnboundedProducerBarrier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedProducerBarrier")
            .field("buffer", &self.buffer)
            .field("cursor", &self.cursor.get_volatile())
            .field("gating", &self.gating)
            .field("blocker", &self.blocker.is_some())
            .finish()
    }
}

impl<E> UnboundedProducerBarrier<E> {
    /// Takes ownership of `buffer`. With `blocker` set, every publish wakes
    /// consumers parked by a [`BlockingWaitStrategy`](crate::BlockingWaitStrategy).
    pub fn new(buffer: ChunkedBuffer<E>, blocker: bool) -> Self {
        Self {
            buffer,
            cursor: Sequence::default(),
            gating: GatingSequences::default(),
            blocker: blocker.then(SequenceBlocker::new),
        }
    }

    /// The storage claimed sequences resolve to.
    pub fn buffer(&self) -> &ChunkedBuffer<E> {
        &self.buffer
    }

    /// # Panics
    ///
    /// Panics if `n` is zero.
    fn claim(&self, n: usize) -> i64 {
        assert!(n >= 1, "n must be > 0");
        let n = i64::try_from(n).unwrap_or(i64::MAX);
        let hi = self.cursor.add_and_get(n);

        if self.buffer.needs_rotation(hi) {
            // Recycle consumed chunks first so the extension below can reuse them.
            self.try_reclaim();
        }
        self.buffer.ensure_chunk(hi);
        hi
    }

    /// Reclaims chunks every registered gating consumer has moved past.
    ///
    /// Does nothing while no consumer gates this producer, since nothing then
    /// proves a chunk is no longer read.
    pub fn try_reclaim(&self) -> bool {
        match self.gating.minimum_registered() {
            Some(gating) => self.buffer.try_move_head_to_next(gating),
            None => false,
        }
    }

    /// Reclaims chunks up to `gating_sequence`, clamped to the slowest
    /// registered gating consumer.
    ///
    /// With no gating consumer registered, the caller vouches that nothing at
    /// or below `gating_sequence` is still being read.
    pub fn try_move_head_to_next(&self, gating_sequence: i64) -> bool {
        let bound = self
            .gating
            .minimum_registered()
            .map_or(gating_sequence, |gating| gating.min(gating_sequence));
        self.buffer.try_move_head_to_next(bound)
    }

    #[inline]
    fn signal(&self) {
        if let Some(blocker) = &self.blocker {
            blocker.signal_all();
        }
    }
}

impl<E: Send + Sync> ProducerBarrier for UnboundedProducerBarrier<E> {
    #[inline]
    fn sequence(&self) -> i64 {
        self.cursor.get_volatile()
    }

    fn next_n(&self, n: usize) -> i64 {
        self.claim(n)
    }

    /// Never fails: the buffer grows instead.
    fn try_next_n(&self, n: usize) -> Result<i64, InsufficientCapacity> {
        Ok(self.claim(n))
    }

    fn next_interruptibly(&self, n: usize, _interrupt: &AtomicBool) -> Result<i64, Interrupted> {
        Ok(self.claim(n))
    }

    fn publish(&self, sequence: i64) {
        self.buffer.set_published(sequence);
        self.signal();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        for sequence in lo..=hi {
            self.buffer.set_published(sequence);
        }
        self.signal();
    }

    #[inline]
    fn is_published(&self, sequence: i64) -> bool {
        self.buffer.is_published(sequence)
    }

    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        // Unbounded scan; consumers pay it once per batch, not per event.
        (next_sequence..=available_sequence)
            .find(|sequence| !self.buffer.is_published(*sequence))
            .map_or(available_sequence, |hole| hole - 1)
    }

    fn has_available_capacity(&self, _required: usize) -> bool {
        true
    }

    fn remaining_capacity(&self) -> i64 {
        i64::MAX
    }

    fn add_gating_barriers(&self, barriers: &[&dyn ConsumerBarrier]) {
        for barrier in barriers {
            self.gating.add(barrier.id(), barrier.gating_sequences());
        }
    }

    fn remove_gating_barrier(&self, barrier: &dyn ConsumerBarrier) -> bool {
        self.gating.remove(barrier.id())
    }

    fn min_gating_sequence(&self) -> i64 {
        self.gating.minimum(self.cursor.get_volatile())
    }

    fn blocker(&self) -> Option<&SequenceBlocker> {
        self.blocker.as_ref()
    }
}
