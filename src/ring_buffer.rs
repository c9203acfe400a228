//! Defines `RingBuffer`, the fixed-capacity slot storage of the bounded sequencer.
//!
//! `RingBuffer` is a fixed-size, `UnsafeCell`-based circular buffer whose slots
//! are pre-filled by an [`EventFactory`] and then mutated in place forever.
//!
//! All safety relies on external atomic sequences for coordination rather than
//! on locks. A producer claims a sequence before writing its slot, and consumers
//! only read a slot after its sequence has been published.

use crate::data_provider::{DataProvider, EventFactory};
use crate::sequence::SequenceIndex;
use std::cell::UnsafeCell;

/// A fixed-size circular buffer of pre-allocated events.
///
/// # Safety
///
/// `Send` and `Sync` are implemented `unsafe`ly, based on these conventions:
///
/// 1.  **External coordination**: every read and write is ordered by a producer
///     barrier and the gating sequences of its consumers. The buffer itself
///     provides no synchronization.
/// 2.  **Single writer**: for any sequence, at most one producer holds the
///     claim, and it never writes a slot a gating consumer has not released.
/// 3.  **Publish before read**: consumers read a slot only after observing its
///     publication through an acquire load.
#[derive(Debug)]
pub struct RingBuffer<E> {
    slots: Box<[UnsafeCell<E>]>,

    /// `capacity - 1`, maps a sequence onto an index.
    index_mask: usize,
}

// SAFETY: see the type-level documentation; slot access is serialized by the
// sequence protocol, never by the buffer.
unsafe impl<E: Send + Sync> Send for RingBuffer<E> {}
unsafe impl<E: Send + Sync> Sync for RingBuffer<E> {}

impl<E> RingBuffer<E> {
    /// Creates a buffer and fills every slot from `factory`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize, factory: &dyn EventFactory<E>) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of 2");

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(factory.new_instance()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            index_mask: capacity - 1,
        }
    }

    /// Gets a mutable pointer to the slot holding `sequence`.
    ///
    /// `get_unchecked` is sound because `index_mask` keeps the index in bounds.
    #[inline]
    pub fn get(&self, sequence: i64) -> *mut E {
        let index = sequence.get_index_from(self.index_mask);
        // SAFETY: `index` is masked into the range of `slots`.
        unsafe { self.slots.get_unchecked(index).get() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<E> DataProvider<E> for RingBuffer<E> {
    #[inline]
    fn slot(&self, sequence: i64) -> *mut E {
        self.get(sequence)
    }
}
