//! The producer side of the protocol: claiming, publishing and gating.

use crate::blocker::SequenceBlocker;
use crate::consumer_barrier::ConsumerBarrier;
use crate::error::{InsufficientCapacity, Interrupted};
use crate::gating::GatingSequences;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Coordinates sequence claiming for one or many producers.
///
/// Claims return the *highest* sequence of the claimed range; a claim of `n`
/// covers `hi - n + 1 ..= hi`. Every claimed sequence must eventually be
/// published, otherwise consumers stall on the hole.
pub trait ProducerBarrier: Send + Sync + fmt::Debug {
    /// The cursor consumers wait on: the published sequence for a single
    /// producer, the highest claimed sequence for multiple producers.
    fn sequence(&self) -> i64;

    /// Claims `n` sequences, spinning while the ring is full.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero or larger than the capacity.
    fn next_n(&self, n: usize) -> i64;

    fn next(&self) -> i64 {
        self.next_n(1)
    }

    /// Claims `n` sequences without waiting.
    ///
    /// # Errors
    ///
    /// [`InsufficientCapacity`] when the claim would lap a gating consumer;
    /// nothing is claimed in that case.
    fn try_next_n(&self, n: usize) -> Result<i64, InsufficientCapacity>;

    fn try_next(&self) -> Result<i64, InsufficientCapacity> {
        self.try_next_n(1)
    }

    /// Like [`ProducerBarrier::next_n`], but gives up once `interrupt` is raised.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] when `interrupt` is observed set while waiting for capacity.
    fn next_interruptibly(&self, n: usize, interrupt: &AtomicBool) -> Result<i64, Interrupted>;

    /// Makes `sequence` visible to consumers.
    fn publish(&self, sequence: i64);

    /// Makes `lo..=hi` visible to consumers.
    fn publish_range(&self, lo: i64, hi: i64);

    fn is_published(&self, sequence: i64) -> bool;

    /// Highest sequence in `next_sequence..=available_sequence` with no
    /// unpublished sequence before it, or `next_sequence - 1` if
    /// `next_sequence` itself is unpublished.
    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

    fn has_available_capacity(&self, required: usize) -> bool;

    fn remaining_capacity(&self) -> i64;

    /// Registers terminal consumer barriers the producer must not lap.
    fn add_gating_barriers(&self, barriers: &[&dyn ConsumerBarrier]);

    fn remove_gating_barrier(&self, barrier: &dyn ConsumerBarrier) -> bool;

    /// Slowest gating sequence, or the producer's own cursor when nothing gates it.
    fn min_gating_sequence(&self) -> i64;

    fn blocker(&self) -> Option<&SequenceBlocker>;

    /// Wakes consumers parked in a blocking wait. No-op without a blocker.
    fn signal_all_when_blocking(&self) {
        if let Some(blocker) = self.blocker() {
            blocker.signal_all();
        }
    }
}

/// State every bounded producer barrier shares.
#[derive(Debug)]
pub(crate) struct ProducerCore {
    pub(crate) capacity: i64,
    pub(crate) gating: GatingSequences,
    pub(crate) blocker: Option<SequenceBlocker>,
    producer_sleep: Duration,
}

impl ProducerCore {
    pub(crate) fn new(capacity: usize, blocker: bool, producer_sleep_nanos: u64) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of 2");
        let capacity = i64::try_from(capacity).expect("capacity must fit into i64");
        Self {
            capacity,
            gating: GatingSequences::default(),
            blocker: blocker.then(SequenceBlocker::new),
            producer_sleep: Duration::from_nanos(producer_sleep_nanos),
        }
    }

    /// Validates a blocking claim of `n` and returns it as `i64`.
    pub(crate) fn checked_claim(&self, n: usize) -> i64 {
        assert!(n >= 1, "n must be > 0");
        let n = i64::try_from(n).unwrap_or(i64::MAX);
        assert!(
            n <= self.capacity,
            "n must be <= capacity ({n} > {})",
            self.capacity
        );
        n
    }

    /// Validates a non-blocking claim of `n`; `None` when it can never fit.
    pub(crate) fn try_claim_size(&self, n: usize) -> Option<i64> {
        assert!(n >= 1, "n must be > 0");
        i64::try_from(n).ok().filter(|n| *n <= self.capacity)
    }

    /// Backs off while waiting for consumers to free capacity.
    #[inline]
    pub(crate) fn park(&self) {
        std::thread::sleep(self.producer_sleep);
    }

    pub(crate) fn add_gating_barriers(&self, barriers: &[&dyn ConsumerBarrier]) {
        for barrier in barriers {
            self.gating.add(barrier.id(), barrier.gating_sequences());
        }
    }

    pub(crate) fn remove_gating_barrier(&self, barrier: &dyn ConsumerBarrier) -> bool {
        self.gating.remove(barrier.id())
    }

    #[inline]
    pub(crate) fn signal(&self) {
        if let Some(blocker) = &self.blocker {
            blocker.signal_all();
        }
    }
}
