//! Defines `ClaimGuard`, the RAII handle over a claimed range of slots.
//!
//! A guard is the producer-side counterpart of a consumer batch: it owns the
//! claimed sequences `lo..=hi` exclusively, hands out mutable access to their
//! slots, and publishes the whole range when dropped. Publishing on drop means
//! a panicking writer still closes its hole, so consumers are never wedged
//! behind a claim that will not be published.

use crate::data_provider::DataProvider;
use crate::producer_barrier::ProducerBarrier;
use std::fmt;

/// Exclusive, publish-on-drop access to a claimed range of slots.
pub struct ClaimGuard<'a, E> {
    provider: &'a dyn DataProvider<E>,
    producer: &'a dyn ProducerBarrier,
    lo: i64,
    hi: i64,
}

impl<E> fmt::Debug for ClaimGuard<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("lo", &self.lo)
            .field("hi", &self.hi)
            .finish()
    }
}

impl<'a, E> ClaimGuard<'a, E> {
    /// `lo..=hi` must have just been claimed from `producer` by the caller.
    pub(crate) fn new(
        provider: &'a dyn DataProvider<E>,
        producer: &'a dyn ProducerBarrier,
        lo: i64,
        hi: i64,
    ) -> Self {
        debug_assert!(lo <= hi);
        Self {
            provider,
            producer,
            lo,
            hi,
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

    /// Mutable access to the slot of `sequence`, or `None` outside the claim.
    pub fn get_mut(&mut self, sequence: i64) -> Option<&mut E> {
        if !(self.lo..=self.hi).contains(&sequence) {
            return None;
        }
        // SAFETY: the sequence is claimed by this guard and not yet published;
        // `&mut self` prevents a second live reference to the same slot.
        Some(unsafe { &mut *self.provider.slot(sequence) })
    }

    /// Iterates `(sequence, slot)` over the whole claim, in order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (i64, &mut E)> + '_ {
        let provider = self.provider;
        // SAFETY: every sequence is distinct, so the yielded references never alias.
        (self.lo..=self.hi).map(move |sequence| (sequence, unsafe { &mut *provider.slot(sequence) }))
    }
}

impl<E> Drop for ClaimGuard<'_, E> {
    fn drop(&mut self) {
        if self.lo == self.hi {
            self.producer.publish(self.hi);
        } else {
            self.producer.publish_range(self.lo, self.hi);
        }
    }
}
