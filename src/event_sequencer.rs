//! Pairs slot storage with its producer barrier: the user-facing sequencer.
//!
//! [`RingBufferEventSequencer`] is bounded and applies back-pressure;
//! [`UnboundedEventSequencer`] grows in chunks and recycles consumed ones.
//! Both expose the same [`EventSequencer`] surface, so producers and
//! consumers are written once against the trait.

use crate::builder::{RingBufferBuilder, UnboundedBuilder};
use crate::chunked_buffer::ChunkedBuffer;
use crate::consumer::{EventBatch, WorkItem};
use crate::consumer_barrier::{ConsumerBarrier, MultiConsumerBarrier, SingleConsumerBarrier};
use crate::data_provider::{DataProvider, EventFactory};
use crate::error::{InsufficientCapacity, WaitError};
use crate::producer_barrier::ProducerBarrier;
use crate::publisher::ClaimGuard;
use crate::ring_buffer::RingBuffer;
use crate::unbounded_producer::UnboundedProducerBarrier;
use crate::wait_strategy::WaitStrategy;
use std::fmt;
use std::sync::Arc;

pub trait EventSequencer<E>: DataProvider<E> + Send + Sync {
    fn producer_barrier(&self) -> &Arc<dyn ProducerBarrier>;

    /// Strategy handed to every consumer barrier created by this sequencer.
    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy>;

    fn sequence(&self) -> i64 {
        self.producer_barrier().sequence()
    }

    fn next(&self) -> i64 {
        self.producer_barrier().next()
    }

    fn next_n(&self, n: usize) -> i64 {
        self.producer_barrier().next_n(n)
    }

    fn try_next(&self) -> Result<i64, InsufficientCapacity> {
        self.producer_barrier().try_next()
    }

    fn try_next_n(&self, n: usize) -> Result<i64, InsufficientCapacity> {
        self.producer_barrier().try_next_n(n)
    }

    fn publish(&self, sequence: i64) {
        self.producer_barrier().publish(sequence);
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        self.producer_barrier().publish_range(lo, hi);
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        self.producer_barrier().has_available_capacity(required)
    }

    fn remaining_capacity(&self) -> i64 {
        self.producer_barrier().remaining_capacity()
    }

    /// Mutable access to a claimed slot.
    ///
    /// # Safety
    ///
    /// `sequence` must be claimed by the caller and not yet published, and no
    /// other reference to the slot may be live.
    #[allow(clippy::mut_from_ref)]
    unsafe fn producer_get(&self, sequence: i64) -> &mut E {
        unsafe { &mut *self.slot(sequence) }
    }

    /// Shared access to a published slot.
    ///
    /// # Safety
    ///
    /// `sequence` must have been returned as available by a consumer barrier
    /// of this sequencer, and not yet released by that consumer.
    unsafe fn consumer_get(&self, sequence: i64) -> &E {
        unsafe { &*self.slot(sequence) }
    }

    /// Claims one slot, fills it with `write` and publishes it.
    fn publish_event<F>(&self, write: F) -> i64
    where
        F: FnOnce(&mut E, i64),
        Self: Sized,
    {
        let mut claim = self.claim(1);
        let sequence = claim.last_sequence();
        if let Some(slot) = claim.get_mut(sequence) {
            write(slot, sequence);
        }
        sequence
    }

    /// Like [`EventSequencer::publish_event`], without waiting for capacity.
    ///
    /// # Errors
    ///
    /// [`InsufficientCapacity`] when the ring is full; `write` is not called.
    fn try_publish_event<F>(&self, write: F) -> Result<i64, InsufficientCapacity>
    where
        F: FnOnce(&mut E, i64),
        Self: Sized,
    {
        let mut claim = self.try_claim(1)?;
        let sequence = claim.last_sequence();
        if let Some(slot) = claim.get_mut(sequence) {
            write(slot, sequence);
        }
        Ok(sequence)
    }

    /// Claims `n` slots, waiting for capacity. The range publishes when the
    /// guard drops.
    fn claim(&self, n: usize) -> ClaimGuard<'_, E>
    where
        Self: Sized,
    {
        let hi = self.next_n(n);
        ClaimGuard::new(self, &**self.producer_barrier(), hi - n as i64 + 1, hi)
    }

    /// # Errors
    ///
    /// [`InsufficientCapacity`] when `n` slots are not free right now.
    fn try_claim(&self, n: usize) -> Result<ClaimGuard<'_, E>, InsufficientCapacity>
    where
        Self: Sized,
    {
        let hi = self.try_next_n(n)?;
        Ok(ClaimGuard::new(
            self,
            &**self.producer_barrier(),
            hi - n as i64 + 1,
            hi,
        ))
    }

    /// Creates a single-consumer barrier waiting on `dependents`, or on the
    /// producer when `dependents` is empty. The barrier does not gate the
    /// producer until registered with [`EventSequencer::add_gating_barriers`].
    fn new_single_consumer_barrier(
        &self,
        dependents: &[Arc<dyn ConsumerBarrier>],
    ) -> Arc<SingleConsumerBarrier> {
        Arc::new(SingleConsumerBarrier::new(
            Arc::clone(self.producer_barrier()),
            Arc::clone(self.wait_strategy()),
            dependents.to_vec(),
        ))
    }

    /// Creates a worker-pool barrier with `members` members.
    fn new_multi_consumer_barrier(
        &self,
        members: usize,
        dependents: &[Arc<dyn ConsumerBarrier>],
    ) -> Arc<MultiConsumerBarrier> {
        Arc::new(MultiConsumerBarrier::new(
            Arc::clone(self.producer_barrier()),
            Arc::clone(self.wait_strategy()),
            dependents.to_vec(),
            members,
        ))
    }

    fn add_gating_barriers(&self, barriers: &[&dyn ConsumerBarrier]) {
        self.producer_barrier().add_gating_barriers(barriers);
    }

    fn remove_gating_barrier(&self, barrier: &dyn ConsumerBarrier) -> bool {
        self.producer_barrier().remove_gating_barrier(barrier)
    }

    /// Waits for the next events past the consumer's progress and returns them
    /// as one batch. Progress moves to the end of the batch when it drops.
    ///
    /// # Errors
    ///
    /// Whatever [`ConsumerBarrier::wait_for`] reports.
    fn batch<'a>(&'a self, barrier: &'a SingleConsumerBarrier) -> Result<EventBatch<'a, E>, WaitError>
    where
        Self: Sized,
    {
        let guard = barrier.fence().acquire();
        let next = barrier.progress().get_volatile() + 1;
        let available = barrier.wait_for(next)?;
        Ok(EventBatch::new(
            self,
            barrier.progress(),
            next,
            available,
            guard,
        ))
    }

    /// Claims the next sequence for pool member `member` and waits for it.
    ///
    /// # Errors
    ///
    /// Whatever [`ConsumerBarrier::wait_for`] reports. The claimed sequence
    /// stays with `member`, and its next call waits for that sequence again
    /// before claiming another.
    fn work<'a>(
        &'a self,
        barrier: &'a MultiConsumerBarrier,
        member: usize,
    ) -> Result<WorkItem<'a, E>, WaitError>
    where
        Self: Sized,
    {
        let sequence = barrier.claim(member);
        barrier.wait_for(sequence)?;
        Ok(WorkItem::new(self, barrier, member, sequence))
    }
}

/// Bounded sequencer over a [`RingBuffer`].
pub struct RingBufferEventSequencer<E> {
    buffer: RingBuffer<E>,
    producer: Arc<dyn ProducerBarrier>,
    wait_strategy: Arc<dyn WaitStrategy>,
}

impl<E> fmt::Debug for RingBufferEventSequencer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBufferEventSequencer")
            .field("capacity", &self.buffer.capacity())
            .field("producer", &self.producer)
            .field("wait_strategy", &self.wait_strategy)
            .finish()
    }
}

impl<E: Send + Sync + 'static> RingBufferEventSequencer<E> {
    pub fn builder<F: EventFactory<E> + 'static>(factory: F) -> RingBufferBuilder<E> {
        RingBufferBuilder::new(factory)
    }
}

impl<E> RingBufferEventSequencer<E> {
    pub(crate) fn from_parts(
        buffer: RingBuffer<E>,
        producer: Arc<dyn ProducerBarrier>,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Self {
        Self {
            buffer,
            producer,
            wait_strategy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}

impl<E> DataProvider<E> for RingBufferEventSequencer<E> {
    #[inline]
    fn slot(&self, sequence: i64) -> *mut E {
        self.buffer.get(sequence)
    }
}

impl<E: Send + Sync> EventSequencer<E> for RingBufferEventSequencer<E> {
    fn producer_barrier(&self) -> &Arc<dyn ProducerBarrier> {
        &self.producer
    }

    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        &self.wait_strategy
    }
}

/// Unbounded sequencer over a [`ChunkedBuffer`].
pub struct UnboundedEventSequencer<E> {
    producer: Arc<UnboundedProducerBarrier<E>>,
    /// The same barrier, type-erased for consumer barriers.
    erased: Arc<dyn ProducerBarrier>,
    wait_strategy: Arc<dyn WaitStrategy>,
}

impl<E> fmt::Debug for UnboundedEventSequencer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedEventSequencer")
            .field("producer", &self.producer)
            .field("wait_strategy", &self.wait_strategy)
            .finish()
    }
}

impl<E: Send + Sync + 'static> UnboundedEventSequencer<E> {
    pub fn builder<F: EventFactory<E> + 'static>(factory: F) -> UnboundedBuilder<E> {
        UnboundedBuilder::new(factory)
    }

    pub(crate) fn from_parts(
        buffer: ChunkedBuffer<E>,
        blocker: bool,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Self {
        let producer = Arc::new(UnboundedProducerBarrier::new(buffer, blocker));
        Self {
            erased: producer.clone(),
            producer,
            wait_strategy,
        }
    }
}

impl<E> UnboundedEventSequencer<E> {
    pub fn buffer(&self) -> &ChunkedBuffer<E> {
        self.producer.buffer()
    }

    pub fn chunk_size(&self) -> usize {
        self.buffer().chunk_size()
    }

    /// See [`UnboundedProducerBarrier::try_reclaim`].
    pub fn try_reclaim(&self) -> bool {
        self.producer.try_reclaim()
    }

    /// See [`UnboundedProducerBarrier::try_move_head_to_next`].
    pub fn try_move_head_to_next(&self, gating_sequence: i64) -> bool {
        self.producer.try_move_head_to_next(gating_sequence)
    }

    pub fn live_chunk_count(&self) -> usize {
        self.buffer().live_chunk_count()
    }

    pub fn pooled_chunk_count(&self) -> usize {
        self.buffer().pooled_chunk_count()
    }
}

impl<E> DataProvider<E> for UnboundedEventSequencer<E> {
    #[inline]
    fn slot(&self, sequence: i64) -> *mut E {
        self.producer.buffer().slot(sequence)
    }
}

impl<E: Send + Sync> EventSequencer<E> for UnboundedEventSequencer<E> {
    fn producer_barrier(&self) -> &Arc<dyn ProducerBarrier> {
        &self.erased
    }

    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        &self.wait_strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProducerType;
    use crate::wait_strategy::{BusySpinWaitStrategy, YieldingWaitStrategy};
    use std::thread;
    use std::time::Duration;

    fn ring(capacity: usize) -> RingBufferEventSequencer<i64> {
        RingBufferEventSequencer::<i64>::builder(|| 0i64)
            .capacity(capacity)
            .wait_strategy(YieldingWaitStrategy::default())
            .build()
    }

    #[test]
    fn test_publish_event_is_visible_to_consumer() {
        let sequencer = ring(8);
        let consumer = sequencer.new_single_consumer_barrier(&[]);
        sequencer.add_gating_barriers(&[&*consumer]);

        let sequence = sequencer.publish_event(|slot, sequence| *slot = sequence * 10);
        assert_eq!(sequence, 0);
        assert_eq!(sequencer.publish_event(|slot, sequence| *slot = sequence * 10), 1);

        let batch = sequencer.batch(&consumer).unwrap();
        assert_eq!((batch.first_sequence(), batch.last_sequence()), (0, 1));
        assert_eq!(batch.iter().map(|(_, e)| *e).collect::<Vec<_>>(), vec![0, 10]);
        assert_eq!(batch.get(2), None);
        drop(batch);

        assert_eq!(consumer.progress().get_volatile(), 1);
    }

    #[test]
    fn test_claim_guard_publishes_on_drop() {
        let sequencer = ring(8);
        let consumer = sequencer.new_single_consumer_barrier(&[]);
        sequencer.add_gating_barriers(&[&*consumer]);

        let mut claim = sequencer.claim(3);
        assert_eq!(claim.len(), 3);
        for (sequence, slot) in claim.iter_mut() {
            *slot = sequence + 100;
        }
        assert_eq!(claim.get_mut(3), None);
        // Single producer publishes by moving its cursor
        assert_eq!(sequencer.sequence(), -1);
        drop(claim);

        assert_eq!(sequencer.sequence(), 2);
        let batch = sequencer.batch(&consumer).unwrap();
        assert_eq!(batch.get(2), Some(&102));
    }

    #[test]
    fn test_try_publish_event_reports_full_ring() {
        let sequencer = ring(4);
        let consumer = sequencer.new_single_consumer_barrier(&[]);
        sequencer.add_gating_barriers(&[&*consumer]);

        for _ in 0..4 {
            assert!(sequencer.try_publish_event(|slot, _| *slot = 1).is_ok());
        }
        let mut called = false;
        assert_eq!(
            sequencer.try_publish_event(|_, _| called = true),
            Err(InsufficientCapacity { requested: 1 })
        );
        assert!(!called);

        drop(sequencer.batch(&consumer).unwrap());
        assert_eq!(sequencer.try_publish_event(|slot, _| *slot = 2), Ok(4));
    }

    #[test]
    fn test_unbounded_sequencer_grows_and_recycles() {
        let sequencer = UnboundedEventSequencer::<i64>::builder(|| 0i64)
            .chunk_size(8)
            .max_pooled_chunks(1)
            .wait_strategy(BusySpinWaitStrategy)
            .build();
        let consumer = sequencer.new_single_consumer_barrier(&[]);
        sequencer.add_gating_barriers(&[&*consumer]);

        for _ in 0..40 {
            sequencer.publish_event(|slot, sequence| *slot = sequence);
        }
        assert_eq!(sequencer.live_chunk_count(), 5);
        assert_eq!(sequencer.remaining_capacity(), i64::MAX);

        let batch = sequencer.batch(&consumer).unwrap();
        assert_eq!(batch.len(), 40);
        assert!(batch.iter().all(|(sequence, event)| *event == sequence));
        drop(batch);

        assert!(sequencer.try_reclaim());
        assert_eq!(sequencer.buffer().head_chunk_index(), 4);
        assert_eq!(sequencer.pooled_chunk_count(), 1);
        assert_eq!(sequencer.live_chunk_count(), 2);
    }

    #[test]
    fn test_worker_pool_splits_sequences() {
        let sequencer = Arc::new(
            RingBufferEventSequencer::<i64>::builder(|| 0i64)
                .capacity(16)
                .producer_type(ProducerType::Multi)
                .wait_strategy(YieldingWaitStrategy::default())
                .build(),
        );
        let pool = sequencer.new_multi_consumer_barrier(2, &[]);
        sequencer.add_gating_barriers(&[&*pool]);

        let workers: Vec<_> = (0..2)
            .map(|member| {
                let sequencer = sequencer.clone();
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match sequencer.work(&pool, member) {
                            Ok(item) => seen.push(*item),
                            Err(WaitError::Alerted) => return seen,
                            Err(error) => panic!("unexpected {error}"),
                        }
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            sequencer.publish_event(|slot, sequence| *slot = sequence);
        }
        while pool.sequence() < 99 {
            thread::yield_now();
        }
        pool.alert();

        let mut all: Vec<i64> = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_work_retries_claim_after_timeout() {
        let sequencer = RingBufferEventSequencer::<i64>::builder(|| -1i64)
            .capacity(8)
            .wait_strategy(YieldingWaitStrategy::with_timeout(
                10,
                Duration::from_millis(5),
            ))
            .build();
        let pool = sequencer.new_multi_consumer_barrier(1, &[]);
        sequencer.add_gating_barriers(&[&*pool]);

        assert_eq!(
            sequencer.work(&pool, 0).unwrap_err(),
            WaitError::Timeout { sequence: 0 }
        );
        assert_eq!(pool.pending_claim(0), Some(0));

        sequencer.publish_event(|slot, sequence| *slot = sequence * 10);
        sequencer.publish_event(|slot, sequence| *slot = sequence * 10);

        let item = sequencer.work(&pool, 0).unwrap();
        assert_eq!(item.sequence(), 0);
        assert_eq!(*item, 0);
        assert_eq!(pool.sequence(), -1);
        drop(item);
        assert_eq!(pool.sequence(), 0);

        let item = sequencer.work(&pool, 0).unwrap();
        assert_eq!(item.sequence(), 1);
        assert_eq!(*item, 10);
    }
}
