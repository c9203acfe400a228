//! Builders for the two sequencer flavours.

use crate::chunked_buffer::ChunkedBuffer;
use crate::data_provider::EventFactory;
use crate::event_sequencer::{RingBufferEventSequencer, UnboundedEventSequencer};
use crate::multi_producer::MultiProducerBarrier;
use crate::producer_barrier::ProducerBarrier;
use crate::ring_buffer::RingBuffer;
use crate::single_producer::SingleProducerBarrier;
use crate::wait_strategy::{SleepingWaitStrategy, WaitStrategy};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_PRODUCER_SLEEP_NANOS: u64 = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_MAX_POOLED_CHUNKS: usize = 8;

/// How many threads may claim sequences from a bounded sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerType {
    /// One producer thread. Cheapest claims, no CAS.
    #[default]
    Single,
    Multi,
}

pub struct RingBufferBuilder<E> {
    factory: Arc<dyn EventFactory<E>>,
    capacity: usize,
    producer_type: ProducerType,
    wait_strategy: Arc<dyn WaitStrategy>,
    producer_sleep_nanos: u64,
    blocker: bool,
}

impl<E> fmt::Debug for RingBufferBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBufferBuilder")
            .field("capacity", &self.capacity)
            .field("producer_type", &self.producer_type)
            .field("wait_strategy", &self.wait_strategy)
            .field("producer_sleep_nanos", &self.producer_sleep_nanos)
            .field("blocker", &self.blocker)
            .finish()
    }
}

impl<E: Send + Sync + 'static> RingBufferBuilder<E> {
    pub fn new<F: EventFactory<E> + 'static>(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            capacity: DEFAULT_CAPACITY,
            producer_type: ProducerType::default(),
            wait_strategy: Arc::new(SleepingWaitStrategy::default()),
            producer_sleep_nanos: DEFAULT_PRODUCER_SLEEP_NANOS,
            blocker: false,
        }
    }

    /// Number of slots; must be a power of two.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn producer_type(mut self, producer_type: ProducerType) -> Self {
        self.producer_type = producer_type;
        self
    }

    pub fn wait_strategy<W: WaitStrategy + 'static>(mut self, wait_strategy: W) -> Self {
        self.wait_strategy = Arc::new(wait_strategy);
        self
    }

    /// How long a producer sleeps between capacity checks on a full ring.
    pub fn producer_sleep_nanos(mut self, nanos: u64) -> Self {
        self.producer_sleep_nanos = nanos;
        self
    }

    /// Gives the producer a blocker even if the wait strategy does not need one.
    pub fn blocker(mut self, enabled: bool) -> Self {
        self.blocker = enabled;
        self
    }

    /// # Panics
    ///
    /// Panics if the capacity is not a power of two.
    pub fn build(self) -> RingBufferEventSequencer<E> {
        let blocker = self.blocker || self.wait_strategy.requires_blocker();
        let buffer = RingBuffer::new(self.capacity, &*self.factory);
        let producer: Arc<dyn ProducerBarrier> = match self.producer_type {
            ProducerType::Single => Arc::new(SingleProducerBarrier::new(
                self.capacity,
                blocker,
                self.producer_sleep_nanos,
            )),
            ProducerType::Multi => Arc::new(MultiProducerBarrier::new(
                self.capacity,
                blocker,
                self.producer_sleep_nanos,
            )),
        };

        debug_log!(
            capacity = self.capacity,
            producer_type = ?self.producer_type,
            blocker,
            "built ring buffer sequencer"
        );
        RingBufferEventSequencer::from_parts(buffer, producer, self.wait_strategy)
    }
}

pub struct UnboundedBuilder<E> {
    factory: Arc<dyn EventFactory<E>>,
    chunk_size: usize,
    max_pooled_chunks: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
    blocker: bool,
}

impl<E> fmt::Debug for UnboundedBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedBuilder")
            .field("chunk_size", &self.chunk_size)
            .field("max_pooled_chunks", &self.max_pooled_chunks)
            .field("wait_strategy", &self.wait_strategy)
            .field("blocker", &self.blocker)
            .finish()
    }
}

impl<E: Send + Sync + 'static> UnboundedBuilder<E> {
    pub fn new<F: EventFactory<E> + 'static>(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_pooled_chunks: DEFAULT_MAX_POOLED_CHUNKS,
            wait_strategy: Arc::new(SleepingWaitStrategy::default()),
            blocker: false,
        }
    }

    /// Slots per chunk; must be a power of two.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Consumed chunks kept for reuse instead of being dropped.
    pub fn max_pooled_chunks(mut self, max_pooled_chunks: usize) -> Self {
        self.max_pooled_chunks = max_pooled_chunks;
        self
    }

    pub fn wait_strategy<W: WaitStrategy + 'static>(mut self, wait_strategy: W) -> Self {
        self.wait_strategy = Arc::new(wait_strategy);
        self
    }

    pub fn blocker(mut self, enabled: bool) -> Self {
        self.blocker = enabled;
        self
    }

    /// # Panics
    ///
    /// Panics if the chunk size is not a power of two.
    pub fn build(self) -> UnboundedEventSequencer<E> {
        let blocker = self.blocker || self.wait_strategy.requires_blocker();
        let buffer = ChunkedBuffer::new(self.chunk_size, self.max_pooled_chunks, self.factory);

        debug_log!(
            chunk_size = self.chunk_size,
            max_pooled_chunks = self.max_pooled_chunks,
            blocker,
            "built unbounded sequencer"
        );
        UnboundedEventSequencer::from_parts(buffer, blocker, self.wait_strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sequencer::EventSequencer;
    use crate::wait_strategy::BlockingWaitStrategy;

    #[test]
    fn test_defaults() {
        let sequencer = RingBufferBuilder::<u8>::new(|| 0u8).build();
        assert_eq!(sequencer.capacity(), DEFAULT_CAPACITY);
        assert!(sequencer.producer_barrier().blocker().is_none());

        let unbounded = UnboundedBuilder::<u8>::new(|| 0u8).build();
        assert_eq!(unbounded.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert!(unbounded.producer_barrier().blocker().is_none());
    }

    #[test]
    fn test_blocking_strategy_forces_blocker() {
        let sequencer = RingBufferBuilder::<u8>::new(|| 0u8)
            .capacity(8)
            .wait_strategy(BlockingWaitStrategy::new())
            .build();
        assert!(sequencer.producer_barrier().blocker().is_some());

        let unbounded = UnboundedBuilder::<u8>::new(|| 0u8)
            .chunk_size(8)
            .wait_strategy(BlockingWaitStrategy::new())
            .build();
        assert!(unbounded.producer_barrier().blocker().is_some());
    }

    #[test]
    fn test_explicit_blocker() {
        let sequencer = RingBufferBuilder::<u8>::new(|| 0u8)
            .capacity(8)
            .producer_type(ProducerType::Multi)
            .blocker(true)
            .build();
        assert!(sequencer.producer_barrier().blocker().is_some());
    }

    #[test]
    #[should_panic(expected = "capacity must be a power of 2")]
    fn test_rejects_bad_capacity() {
        RingBufferBuilder::<u8>::new(|| 0u8).capacity(100).build();
    }
}
