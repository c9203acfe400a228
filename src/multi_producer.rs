//! Bounded producer barrier shared by any number of producer threads.
//!
//! Producers claim by CAS on a shared cursor, then fill and publish their slots
//! in whatever order they finish. Each slot carries an availability flag (the
//! "lap" of the sequence last published into it) so consumers can find the
//! contiguous published prefix.

use crate::blocker::SequenceBlocker;
use crate::consumer_barrier::ConsumerBarrier;
use crate::error::{InsufficientCapacity, Interrupted};
use crate::producer_barrier::{ProducerBarrier, ProducerCore};
use crate::sequence::{Sequence, SequenceIndex};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

#[derive(Debug)]
pub struct MultiProducerBarrier {
    core: ProducerCore,
    /// Highest claimed sequence.
    cursor: Sequence,
    gating_cache: Sequence,
    available: Box<[AtomicI32]>,
    index_mask: usize,
    index_shift: u32,
}

impl MultiProducerBarrier {
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize, blocker: bool, producer_sleep_nanos: u64) -> Self {
        let core = ProducerCore::new(capacity, blocker, producer_sleep_nanos);
        let available = (0..capacity)
            .map(|_| AtomicI32::new(-1))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            core,
            cursor: Sequence::default(),
            gating_cache: Sequence::default(),
            available,
            index_mask: capacity - 1,
            index_shift: capacity.trailing_zeros(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity as usize
    }

    #[inline]
    fn availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    #[inline]
    fn set_available(&self, sequence: i64) {
        let index = sequence.get_index_from(self.index_mask);
        self.available[index].store(self.availability_flag(sequence), Ordering::Release);
    }

    fn has_capacity(&self, cursor_value: i64, n: i64) -> bool {
        let wrap_point = cursor_value + n - self.core.capacity;
        let cached = self.gating_cache.get();

        if wrap_point > cached || cached > cursor_value {
            let min_sequence = self.core.gating.minimum(cursor_value);
            self.gating_cache.set(min_sequence);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }

    fn claim(&self, n: i64, interrupt: Option<&AtomicBool>) -> Result<i64, Interrupted> {
        loop {
            let current = self.cursor.get_volatile();
            let next = current + n;
            let wrap_point = next - self.core.capacity;
            let cached = self.gating_cache.get();

            if wrap_point > cached || cached > current {
                let gating = self.core.gating.minimum(current);
                if wrap_point > gating {
                    if interrupt.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                        return Err(Interrupted);
                    }
                    self.core.park();
                    continue;
                }
                self.gating_cache.set(gating);
            } else if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }
}

impl ProducerBarrier for MultiProducerBarrier {
    #[inline]
    fn sequence(&self) -> i64 {
        self.cursor.get_volatile()
    }

    fn next_n(&self, n: usize) -> i64 {
        let n = self.core.checked_claim(n);
        match self.claim(n, None) {
            Ok(sequence) => sequence,
            Err(Interrupted) => unreachable!("claim without an interrupt flag cannot be interrupted"),
        }
    }

    fn try_next_n(&self, n: usize) -> Result<i64, InsufficientCapacity> {
        let requested = i64::try_from(n).unwrap_or(i64::MAX);
        let n = self
            .core
            .try_claim_size(n)
            .ok_or(InsufficientCapacity { requested })?;
        loop {
            let current = self.cursor.get_volatile();
            if !self.has_capacity(current, n) {
                return Err(InsufficientCapacity { requested });
            }
            let next = current + n;
            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn next_interruptibly(&self, n: usize, interrupt: &AtomicBool) -> Result<i64, Interrupted> {
        let n = self.core.checked_claim(n);
        self.claim(n, Some(interrupt))
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.core.signal();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        for sequence in lo..=hi {
            self.set_available(sequence);
        }
        self.core.signal();
    }

    #[inline]
    fn is_published(&self, sequence: i64) -> bool {
        let index = sequence.get_index_from(self.index_mask);
        self.available[index].load(Ordering::Acquire) == self.availability_flag(sequence)
    }

    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        // Bounded by the ring: a producer can never claim past gating + capacity.
        (next_sequence..=available_sequence)
            .find(|sequence| !self.is_published(*sequence))
            .map_or(available_sequence, |hole| hole - 1)
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        match self.core.try_claim_size(required) {
            Some(n) => self.has_capacity(self.cursor.get_volatile(), n),
            None => false,
        }
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get_volatile();
        let consumed = self.core.gating.minimum(produced);
        self.core.capacity - (produced - consumed)
    }

    fn add_gating_barriers(&self, barriers: &[&dyn ConsumerBarrier]) {
        self.core.add_gating_barriers(barriers);
    }

    fn remove_gating_barrier(&self, barrier: &dyn ConsumerBarrier) -> bool {
        self.core.remove_gating_barrier(barrier)
    }

    fn min_gating_sequence(&self) -> i64 {
        self.core.gating.minimum(self.cursor.get_volatile())
    }

    fn blocker(&self) -> Option<&SequenceBlocker> {
        self.core.blocker.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer_barrier::SingleConsumerBarrier;
    use crate::wait_strategy::{SleepingWaitStrategy, WaitStrategy};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn gated(capacity: usize) -> (Arc<MultiProducerBarrier>, Arc<SingleConsumerBarrier>) {
        let producer = Arc::new(MultiProducerBarrier::new(capacity, false, 100));
        let strategy: Arc<dyn WaitStrategy> = Arc::new(SleepingWaitStrategy::default());
        let consumer = Arc::new(SingleConsumerBarrier::new(
            producer.clone(),
            strategy,
            Vec::new(),
        ));
        producer.add_gating_barriers(&[&*consumer]);
        (producer, consumer)
    }

    #[test]
    fn test_out_of_order_publish_stops_at_first_hole() {
        let (producer, _consumer) = gated(8);
        let hi = producer.next_n(4);
        assert_eq!(hi, 3);
        // Cursor tracks claims, not publishes
        assert_eq!(producer.sequence(), 3);

        producer.publish(0);
        producer.publish(2);
        producer.publish(3);
        assert!(producer.is_published(0));
        assert!(!producer.is_published(1));
        assert_eq!(producer.highest_published_sequence(0, 3), 0);
        assert_eq!(producer.highest_published_sequence(1, 3), 0);

        producer.publish(1);
        assert_eq!(producer.highest_published_sequence(0, 3), 3);
    }

    #[test]
    fn test_availability_flags_distinguish_laps() {
        let (producer, consumer) = gated(4);
        let hi = producer.next_n(4);
        producer.publish_range(0, hi);
        consumer.progress().set_release(hi);

        // Sequence 4 shares a slot with 0 but belongs to the next lap
        assert!(producer.is_published(0));
        assert!(!producer.is_published(4));
        assert_eq!(producer.next(), 4);
        producer.publish(4);
        assert!(producer.is_published(4));
        assert!(!producer.is_published(0));
    }

    #[test]
    fn test_try_next_capacity() {
        let (producer, consumer) = gated(8);
        assert_eq!(
            producer.try_next_n(10),
            Err(InsufficientCapacity { requested: 10 })
        );
        assert_eq!(
            producer.try_next_n(usize::MAX),
            Err(InsufficientCapacity {
                requested: i64::MAX
            })
        );
        assert_eq!(producer.try_next_n(8), Ok(7));
        assert!(producer.try_next().is_err());
        assert_eq!(producer.remaining_capacity(), 0);

        consumer.progress().set_release(3);
        assert_eq!(producer.remaining_capacity(), 4);
        assert_eq!(producer.try_next_n(4), Ok(11));
        assert!(!producer.has_available_capacity(1));
    }

    #[test]
    fn test_concurrent_claims_are_disjoint() {
        let producer = Arc::new(MultiProducerBarrier::new(1024, false, 100));
        let claimed = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let producer = producer.clone();
                let claimed = claimed.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let sequence = producer.next();
                        assert!(claimed.lock().unwrap().insert(sequence));
                        producer.publish(sequence);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(claimed.lock().unwrap().len(), 400);
        assert_eq!(producer.sequence(), 399);
        assert_eq!(producer.highest_published_sequence(0, 399), 399);
    }
}
