//! Defines the consumer-side RAII handles: `EventBatch` and `WorkItem`.
//!
//! Both release their sequences on drop, which is what lets producers (or
//! downstream stages) reuse the slots. Holding one stalls everything gated on
//! the owning barrier, so keep them short-lived.

use crate::consumer_barrier::MultiConsumerBarrier;
use crate::data_provider::DataProvider;
use crate::fence;
use crate::sequence::Sequence;
use std::fmt;
use std::ops::Deref;

/// A contiguous run of published events, read by a single consumer.
///
/// Dropping the batch stores its last sequence into the consumer's progress.
pub struct EventBatch<'a, E> {
    provider: &'a dyn DataProvider<E>,
    progress: &'a Sequence,
    lo: i64,
    hi: i64,
    _guard: fence::Guard<'a>,
}

impl<E> fmt::Debug for EventBatch<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBatch")
            .field("lo", &self.lo)
            .field("hi", &self.hi)
            .finish()
    }
}

impl<'a, E> EventBatch<'a, E> {
    pub(crate) fn new(
        provider: &'a dyn DataProvider<E>,
        progress: &'a Sequence,
        lo: i64,
        hi: i64,
        guard: fence::Guard<'a>,
    ) -> Self {
        debug_assert!(lo <= hi);
        Self {
            provider,
            progress,
            lo,
            hi,
            _guard: guard,
        }
    }

    #[inline]
    pub fn first_sequence(&self) -> i64 {
        self.lo
    }

    #[inline]
    pub fn last_sequence(&self) -> i64 {
        self.hi
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.hi - self.lo + 1) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, sequence: i64) -> Option<&E> {
        if !(self.lo..=self.hi).contains(&sequence) {
            return None;
        }
        // SAFETY: published, and not released until this batch is dropped.
        Some(unsafe { &*self.provider.slot(sequence) })
    }

    /// Iterates `(sequence, event)` in publication order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &E)> + '_ {
        let provider = self.provider;
        (self.lo..=self.hi).map(move |sequence| (sequence, unsafe { &*provider.slot(sequence) }))
    }
}

impl<E> Drop for EventBatch<'_, E> {
    fn drop(&mut self) {
        self.progress.set_release(self.hi);
    }
}

/// A single event handed to one member of a worker pool.
///
/// Dropping it completes the claim, storing the sequence into the member's own
/// sequence.
pub struct WorkItem<'a, E> {
    provider: &'a dyn DataProvider<E>,
    pool: &'a MultiConsumerBarrier,
    member: usize,
    sequence: i64,
}

impl<E> fmt::Debug for WorkItem<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<'a, E> WorkItem<'a, E> {
    pub(crate) fn new(
        provider: &'a dyn DataProvider<E>,
        pool: &'a MultiConsumerBarrier,
        member: usize,
        sequence: i64,
    ) -> Self {
        Self {
            provider,
            pool,
            member,
            sequence,
        }
    }

    #[inline]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }
}

impl<E> Deref for WorkItem<'_, E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        // SAFETY: claimed by this member alone and published.
        unsafe { &*self.provider.slot(self.sequence) }
    }
}

impl<E> Drop for WorkItem<'_, E> {
    fn drop(&mut self) {
        self.pool.complete(self.member, self.sequence);
    }
}
