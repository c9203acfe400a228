//! Bounded producer barrier for exactly one producer thread.
//!
//! The claim counter is only ever touched by the producer, so claiming is a
//! plain load/store; the published cursor is the only value consumers read.

use crate::blocker::SequenceBlocker;
use crate::consumer_barrier::ConsumerBarrier;
use crate::error::{InsufficientCapacity, Interrupted};
use crate::producer_barrier::{ProducerBarrier, ProducerCore};
use crate::sequence::{INITIAL_SEQUENCE, Sequence};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{self, AtomicBool, AtomicI64, Ordering};

#[derive(Debug)]
pub struct SingleProducerBarrier {
    core: ProducerCore,
    /// Published sequence.
    cursor: Sequence,
    /// Highest claimed sequence. Producer-thread only.
    next_value: CachePadded<AtomicI64>,
    /// Last observed minimum gating sequence. Producer-thread only.
    cached_gating: CachePadded<AtomicI64>,
}

impl SingleProducerBarrier {
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize, blocker: bool, producer_sleep_nanos: u64) -> Self {
        Self {
            core: ProducerCore::new(capacity, blocker, producer_sleep_nanos),
            cursor: Sequence::default(),
            next_value: CachePadded::new(AtomicI64::new(INITIAL_SEQUENCE)),
            cached_gating: CachePadded::new(AtomicI64::new(INITIAL_SEQUENCE)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity as usize
    }

    fn has_capacity(&self, n: i64) -> bool {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let wrap_point = next_value + n - self.core.capacity;
        let cached = self.cached_gating.load(Ordering::Relaxed);

        if wrap_point > cached || cached > next_value {
            // StoreLoad: our claims must be visible before we sample the consumers.
            atomic::fence(Ordering::SeqCst);
            let min_sequence = self.core.gating.minimum(next_value);
            self.cached_gating.store(min_sequence, Ordering::Relaxed);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }

    /// Spins until `n` more sequences fit, or `interrupt` is raised.
    fn claim(&self, n: i64, interrupt: Option<&AtomicBool>) -> Result<i64, Interrupted> {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.core.capacity;
        let cached = self.cached_gating.load(Ordering::Relaxed);

        if wrap_point > cached || cached > next_value {
            atomic::fence(Ordering::SeqCst);
            let min_sequence = loop {
                let min_sequence = self.core.gating.minimum(next_value);
                if wrap_point <= min_sequence {
                    break min_sequence;
                }
                if interrupt.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                    return Err(Interrupted);
                }
                self.core.park();
            };
            self.cached_gating.store(min_sequence, Ordering::Relaxed);
        }

        self.next_value.store(next_sequence, Ordering::Relaxed);
        Ok(next_sequence)
    }
}

impl ProducerBarrier for SingleProducerBarrier {
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
        if !self.has_capacity(n) {
            return Err(InsufficientCapacity { requested });
        }
        let next_sequence = self.next_value.load(Ordering::Relaxed) + n;
        self.next_value.store(next_sequence, Ordering::Relaxed);
        Ok(next_sequence)
    }

    fn next_interruptibly(&self, n: usize, interrupt: &AtomicBool) -> Result<i64, Interrupted> {
        let n = self.core.checked_claim(n);
        self.claim(n, Some(interrupt))
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set_release(sequence);
        self.core.signal();
    }

    fn publish_range(&self, _lo: i64, hi: i64) {
        self.publish(hi);
    }

    fn is_published(&self, sequence: i64) -> bool {
        let current = self.cursor.get_volatile();
        sequence <= current && sequence > current - self.core.capacity
    }

    #[inline]
    fn highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
        available_sequence
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        match self.core.try_claim_size(required) {
            Some(n) => self.has_capacity(n),
            None => false,
        }
    }

    fn remaining_capacity(&self) -> i64 {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let consumed = self.core.gating.minimum(next_value);
        self.core.capacity - (next_value - consumed)
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
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn gated(capacity: usize) -> (Arc<SingleProducerBarrier>, Arc<SingleConsumerBarrier>) {
        let producer = Arc::new(SingleProducerBarrier::new(capacity, false, 100));
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
    fn test_claim_and_publish() {
        let (producer, _consumer) = gated(8);
        assert_eq!(producer.sequence(), INITIAL_SEQUENCE);

        assert_eq!(producer.next(), 0);
        assert_eq!(producer.next_n(3), 3);
        // Claiming alone does not publish
        assert_eq!(producer.sequence(), INITIAL_SEQUENCE);
        assert!(!producer.is_published(0));

        producer.publish_range(0, 3);
        assert_eq!(producer.sequence(), 3);
        assert!(producer.is_published(0));
        assert!(producer.is_published(3));
        assert!(!producer.is_published(4));
    }

    #[test]
    fn test_try_next_saturates_and_recovers() {
        let (producer, consumer) = gated(4);

        for expected in 0..4 {
            assert_eq!(producer.try_next(), Ok(expected));
            producer.publish(expected);
        }
        assert_eq!(
            producer.try_next(),
            Err(InsufficientCapacity { requested: 1 })
        );
        assert!(!producer.has_available_capacity(1));
        assert_eq!(producer.remaining_capacity(), 0);

        consumer.progress().set_release(1);
        assert!(producer.has_available_capacity(2));
        assert_eq!(producer.try_next_n(2), Ok(5));
        assert_eq!(
            producer.try_next(),
            Err(InsufficientCapacity { requested: 1 })
        );
    }

    #[test]
    fn test_try_next_larger_than_capacity_never_claims() {
        let (producer, _consumer) = gated(8);
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
        assert_eq!(producer.next(), 0);
    }

    #[test]
    fn test_next_waits_for_consumer() {
        let (producer, consumer) = gated(2);
        let hi = producer.next_n(2);
        producer.publish(hi);

        let blocked = {
            let producer = producer.clone();
            thread::spawn(move || producer.next())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!blocked.is_finished(), "producer must not lap the consumer");

        consumer.progress().set_release(0);
        assert_eq!(blocked.join().unwrap(), 2);
    }

    #[test]
    fn test_next_interruptibly() {
        let (producer, _consumer) = gated(2);
        producer.next_n(2);

        let interrupt = AtomicBool::new(true);
        assert_eq!(producer.next_interruptibly(1, &interrupt), Err(Interrupted));

        interrupt.store(false, Ordering::Release);
        let (producer, _consumer) = gated(2);
        assert_eq!(producer.next_interruptibly(1, &interrupt), Ok(0));
    }

    #[test]
    fn test_remove_gating_barrier_releases_producer() {
        let (producer, consumer) = gated(2);
        producer.next_n(2);
        assert!(producer.try_next().is_err());

        assert!(producer.remove_gating_barrier(&*consumer));
        assert_eq!(producer.try_next(), Ok(2));
    }
}
