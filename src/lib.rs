//! Lock-free sequencing for inter-thread event exchange.
//!
//! A producer barrier hands out monotonically increasing sequences; producers
//! fill the slot behind each sequence in place and publish it. Consumer
//! barriers wait, through a pluggable [`WaitStrategy`], until a sequence is
//! published and all upstream stages are done with it. Producers in turn never
//! lap the slowest *gating* consumer.
//!
//! Two storages are provided: a bounded [`RingBuffer`] (single or multi
//! producer) and an unbounded [`ChunkedBuffer`] that grows in chunks and
//! recycles the ones every consumer has passed.
//!
//! ```no_run
//! use spindle::{EventSequencer, RingBufferEventSequencer, YieldingWaitStrategy};
//!
//! let sequencer = RingBufferEventSequencer::<u64>::builder(|| 0)
//!     .capacity(64)
//!     .wait_strategy(YieldingWaitStrategy::default())
//!     .build();
//! let consumer = sequencer.new_single_consumer_barrier(&[]);
//! sequencer.add_gating_barriers(&[&*consumer]);
//!
//! sequencer.publish_event(|slot, sequence| *slot = sequence as u64 * 2);
//!
//! let batch = sequencer.batch(&consumer).unwrap();
//! for (sequence, event) in batch.iter() {
//!     assert_eq!(*event, sequence as u64 * 2);
//! }
//! ```

#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => { ::tracing::trace!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

mod blocker;
mod builder;
mod chunked_buffer;
mod consumer;
mod consumer_barrier;
mod data_provider;
mod error;
mod event_sequencer;
mod fence;
mod gating;
mod multi_producer;
mod producer_barrier;
mod publisher;
mod ring_buffer;
mod sequence;
mod single_producer;
mod unbounded_producer;
mod wait_strategy;

pub use crate::blocker::SequenceBlocker;
pub use crate::builder::*;
pub use crate::chunked_buffer::{ChunkState, ChunkedBuffer};
pub use crate::consumer::{EventBatch, WorkItem};
pub use crate::consumer_barrier::{ConsumerBarrier, MultiConsumerBarrier, SingleConsumerBarrier};
pub use crate::data_provider::{DataProvider, EventFactory};
pub use crate::error::{InsufficientCapacity, Interrupted, WaitError};
pub use crate::event_sequencer::{EventSequencer, RingBufferEventSequencer, UnboundedEventSequencer};
pub use crate::multi_producer::MultiProducerBarrier;
pub use crate::producer_barrier::ProducerBarrier;
pub use crate::publisher::ClaimGuard;
pub use crate::ring_buffer::RingBuffer;
pub use crate::sequence::{INITIAL_SEQUENCE, Sequence};
pub use crate::single_producer::SingleProducerBarrier;
pub use crate::unbounded_producer::UnboundedProducerBarrier;
pub use crate::wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy, WaitStrategy,
    YieldingWaitStrategy,
};
