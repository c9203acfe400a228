//! The padded 64-bit progress counter every producer and consumer advances.
//!
//! A `Sequence` is the only cross-thread visibility bridge in the crate: a
//! producer writes an event into its slot and then performs a release store of
//! the slot's sequence; a consumer performing an acquire load that observes the
//! stored value is guaranteed to also observe the event payload.

use crossbeam_utils::CachePadded;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI64, Ordering};

/// Value of every sequence before the first element has been claimed or consumed.
pub const INITIAL_SEQUENCE: i64 = -1;

/// Maps a sequence number onto a slot index of a power-of-two sized array.
pub trait SequenceIndex: Sized {
    fn get_index_from(self, mask: usize) -> usize;
}

impl SequenceIndex for i64 {
    #[inline]
    fn get_index_from(self, mask: usize) -> usize {
        (self as usize) & mask
    }
}

/// A cache-line padded atomic counter.
///
/// The padding keeps two hot counters (say a producer cursor and the consumer
/// sequence that gates it) from landing on the same cache line.
#[derive(Debug)]
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_SEQUENCE)
    }
}

impl Sequence {
    pub fn new(value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(value)),
        }
    }

    /// Plain load, no ordering guarantees.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Plain store, no ordering guarantees.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed)
    }

    /// Acquire load. Pairs with [`Sequence::set_release`].
    #[inline]
    pub fn get_volatile(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Release store. Every write performed before this call becomes visible to
    /// a thread whose [`Sequence::get_volatile`] observes `value`.
    #[inline]
    pub fn set_release(&self, value: i64) {
        self.value.store(value, Ordering::Release)
    }

    /// Sequentially consistent store, for the rare StoreLoad case where a
    /// producer must publish its position before re-reading the gating sequences.
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst)
    }

    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn compare_exchange_weak(&self, current: i64, new: i64) -> Result<i64, i64> {
        self.value
            .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed)
    }

    /// Adds `delta` and returns the previous value.
    #[inline]
    pub fn get_and_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel)
    }

    /// Adds `delta` and returns the new value.
    #[inline]
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.get_and_add(delta) + delta
    }
}

/// Minimum over a set of sequences, or `default` when the set is empty.
pub(crate) fn min_sequence<'a, I>(sequences: I, default: i64) -> i64
where
    I: IntoIterator<Item = &'a Sequence>,
{
    sequences
        .into_iter()
        .map(Sequence::get_volatile)
        .fold(default, i64::min)
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl PartialEq<i64> for Sequence {
    fn eq(&self, other: &i64) -> bool {
        self.get() == *other
    }
}

impl Eq for Sequence {}

impl Ord for Sequence {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.get().cmp(&other.get())
    }
}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialOrd<i64> for Sequence {
    fn partial_cmp(&self, other: &i64) -> Option<CmpOrdering> {
        Some(self.get().cmp(other))
    }
}
