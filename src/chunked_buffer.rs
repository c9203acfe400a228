//! Unbounded slot storage built from fixed-size, recyclable chunks.
//!
//! Chunk `k` stores sequences `k * chunk_size ..= (k + 1) * chunk_size - 1`.
//! Live chunks sit in a concurrent map keyed by chunk index; that map is the
//! arena, and a chunk index is the only handle anyone holds. Three indices
//! describe the chain:
//!
//! - `head`: oldest live chunk. Moved only by the holder of the head lock.
//! - `producer`: chunk the fastest producer writes into. Either
//!   `Stable(index)` or `Rotating` while one thread extends or recycles the chain.
//! - `tail`: newest chunk in the map. Chunks in `producer + 1 ..= tail` are
//!   pooled: recycled and waiting for producers to reach them.
//!
//! A chunk removed from the map is reclaimed by the map's epoch-based
//! collector only once no thread still observes it.

use crate::data_provider::{DataProvider, EventFactory};
use crate::fence::Fence;
use crate::sequence::SequenceIndex;
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Index stored in a chunk while it is being moved from the head to the tail.
const RECYCLED: i64 = -1;
/// Encoded `ChunkState::Rotating`.
const ROTATING: i64 = -2;

/// State of the producer chunk pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Producers write into the chunk with this index.
    Stable(i64),
    /// One thread is extending or recycling the chain; others back off.
    Rotating,
}

impl ChunkState {
    #[inline]
    fn decode(raw: i64) -> Self {
        if raw == ROTATING {
            ChunkState::Rotating
        } else {
            ChunkState::Stable(raw)
        }
    }
}

struct Chunk<E> {
    /// Chunk index this chunk currently backs; `RECYCLED` while in transit.
    index: AtomicI64,
    slots: Box<[UnsafeCell<E>]>,
    /// Sequence last published into each slot; `-1` before the first publish.
    published: Box<[AtomicI64]>,
}

// SAFETY: slots are only touched under the sequence protocol, as in `RingBuffer`.
unsafe impl<E: Send + Sync> Send for Chunk<E> {}
unsafe impl<E: Send + Sync> Sync for Chunk<E> {}

impl<E> Chunk<E> {
    fn new(index: i64, size: usize, factory: &dyn EventFactory<E>) -> Self {
        Self {
            index: AtomicI64::new(index),
            slots: (0..size)
                .map(|_| UnsafeCell::new(factory.new_instance()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            published: (0..size)
                .map(|_| AtomicI64::new(-1))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }
}

/// An unbounded, chunk-recycling event store.
///
/// Slots follow the same access protocol as a ring buffer: a slot belongs to
/// the producer that claimed its sequence until it is published, and is then
/// read-only until every gating consumer has moved past it.
pub struct ChunkedBuffer<E> {
    chunk_size: usize,
    chunk_shift: u32,
    index_mask: usize,
    max_pooled_chunks: i64,
    factory: Arc<dyn EventFactory<E>>,
    chunks: papaya::HashMap<i64, Arc<Chunk<E>>>,
    head_chunk: CachePadded<AtomicI64>,
    tail_chunk: CachePadded<AtomicI64>,
    producer_chunk: CachePadded<AtomicI64>,
    head_lock: Fence,
}

impl<E> fmt::Debug for ChunkedBuffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedBuffer")
            .field("chunk_size", &self.chunk_size)
            .field("max_pooled_chunks", &self.max_pooled_chunks)
            .field("head_chunk", &self.head_chunk_index())
            .field("tail_chunk", &self.tail_chunk_index())
            .field("producer_chunk", &self.producer_state())
            .field("live_chunks", &self.live_chunk_count())
            .finish()
    }
}

impl<E> ChunkedBuffer<E> {
    /// Creates the buffer with chunk 0 allocated.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is not a power of two.
    pub fn new(
        chunk_size: usize,
        max_pooled_chunks: usize,
        factory: Arc<dyn EventFactory<E>>,
    ) -> Self {
        assert!(chunk_size.is_power_of_two(), "chunk size must be a power of 2");

        let chunks = papaya::HashMap::new();
        chunks
            .pin()
            .insert(0, Arc::new(Chunk::new(0, chunk_size, &*factory)));

        Self {
            chunk_size,
            chunk_shift: chunk_size.trailing_zeros(),
            index_mask: chunk_size - 1,
            max_pooled_chunks: i64::try_from(max_pooled_chunks).unwrap_or(i64::MAX),
            factory,
            chunks,
            head_chunk: CachePadded::new(AtomicI64::new(0)),
            tail_chunk: CachePadded::new(AtomicI64::new(0)),
            producer_chunk: CachePadded::new(AtomicI64::new(0)),
            head_lock: Fence::default(),
        }
    }

    /// Number of slots per chunk, a power of two.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Index of the chunk that stores `sequence`.
    #[inline]
    pub fn chunk_index(&self, sequence: i64) -> i64 {
        sequence >> self.chunk_shift
    }

    /// Highest sequence stored by chunk `chunk_index`.
    #[inline]
    fn max_sequence_of(&self, chunk_index: i64) -> i64 {
        ((chunk_index + 1) << self.chunk_shift) - 1
    }

    /// Oldest live chunk. Everything below it has been reclaimed.
    pub fn head_chunk_index(&self) -> i64 {
        self.head_chunk.load(Ordering::Acquire)
    }

    /// Newest chunk in the chain, the last pooled one if any are pooled.
    pub fn tail_chunk_index(&self) -> i64 {
        self.tail_chunk.load(Ordering::Acquire)
    }

    /// Chunk producers currently write into, or `Rotating`.
    #[inline]
    pub fn producer_state(&self) -> ChunkState {
        ChunkState::decode(self.producer_chunk.load(Ordering::Acquire))
    }

    /// Chunks held in memory, pooled ones included.
    pub fn live_chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks linked past the producer chunk, ready for reuse.
    ///
    /// Waits out a rotation in progress, so the count always reflects a chain
    /// between rotations.
    pub fn pooled_chunk_count(&self) -> usize {
        let backoff = Backoff::new();
        loop {
            if let ChunkState::Stable(producer) = self.producer_state() {
                let tail = self.tail_chunk_index();
                // Unchanged producer: `tail` was read from the same chain.
                if self.producer_chunk.load(Ordering::Acquire) == producer {
                    return usize::try_from(tail - producer).unwrap_or(0);
                }
            }
            backoff.snooze();
        }
    }

    /// Whether storing `sequence` requires moving the producer chunk forward.
    #[inline]
    pub fn needs_rotation(&self, sequence: i64) -> bool {
        match self.producer_state() {
            ChunkState::Stable(producer) => producer < self.chunk_index(sequence),
            ChunkState::Rotating => true,
        }
    }

    /// Swaps `Stable(p)` for `Rotating`, spinning while another thread rotates.
    fn lock_rotation(&self) -> i64 {
        let backoff = Backoff::new();
        loop {
            match self.producer_state() {
                ChunkState::Stable(producer) => {
                    if self
                        .producer_chunk
                        .compare_exchange_weak(
                            producer,
                            ROTATING,
                            Ordering::Acquire,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return producer;
                    }
                }
                ChunkState::Rotating => backoff.snooze(),
            }
        }
    }

    #[inline]
    fn unlock_rotation(&self, producer: i64) {
        debug_assert!(producer >= 0);
        self.producer_chunk.store(producer, Ordering::Release);
    }

    /// Makes sure the chunk holding `sequence` is linked, extending the chain
    /// (from the pool first, then by allocation) if the producer chunk is behind.
    pub fn ensure_chunk(&self, sequence: i64) {
        let target = self.chunk_index(sequence);
        let backoff = Backoff::new();
        loop {
            match self.producer_state() {
                ChunkState::Stable(producer) if producer >= target => return,
                ChunkState::Stable(producer) => {
                    if self
                        .producer_chunk
                        .compare_exchange_weak(
                            producer,
                            ROTATING,
                            Ordering::Acquire,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        self.extend_to(target);
                        self.unlock_rotation(target);
                        return;
                    }
                }
                ChunkState::Rotating => backoff.snooze(),
            }
        }
    }

    /// Allocates chunks up to `target`. Caller holds the rotation lock.
    fn extend_to(&self, target: i64) {
        let tail = self.tail_chunk.load(Ordering::Relaxed);
        if target <= tail {
            // Pooled chunks already cover the target.
            return;
        }

        let chunks = self.chunks.pin();
        for index in tail + 1..=target {
            chunks.insert(
                index,
                Arc::new(Chunk::new(index, self.chunk_size, &*self.factory)),
            );
        }
        self.tail_chunk.store(target, Ordering::Release);
        debug_log!(from = tail + 1, to = target, "allocated chunks");
    }

    /// First chunk at or after `head` that is not yet recyclable.
    fn recyclable_end(&self, head: i64, producer: i64, gating_sequence: i64) -> i64 {
        let mut end = head;
        while end < producer && self.max_sequence_of(end) <= gating_sequence {
            end += 1;
        }
        end
    }

    /// Reclaims every head chunk that is fully consumed up to `gating_sequence`
    /// and is strictly behind the producer chunk.
    ///
    /// Reclaimed chunks are re-linked at the tail while fewer than
    /// `max_pooled_chunks` are pooled; the rest are dropped. Returns `false`
    /// when nothing was reclaimed or another thread holds the head lock.
    ///
    /// `gating_sequence` must not exceed the slowest consumer's sequence.
    pub fn try_move_head_to_next(&self, gating_sequence: i64) -> bool {
        let Some(_guard) = self.head_lock.try_acquire() else {
            return false;
        };

        let head = self.head_chunk.load(Ordering::Acquire);
        // Cheap pre-check so idle reclaim attempts never stall producers.
        let ChunkState::Stable(producer) = self.producer_state() else {
            return false;
        };
        if self.recyclable_end(head, producer, gating_sequence) == head {
            return false;
        }

        let producer = self.lock_rotation();
        let end = self.recyclable_end(head, producer, gating_sequence);
        self.head_chunk.store(end, Ordering::Release);

        let chunks = self.chunks.pin();
        let mut tail = self.tail_chunk.load(Ordering::Relaxed);
        let mut pooled = 0usize;
        let mut dropped = 0usize;
        for index in head..end {
            let Some(chunk) = chunks.remove(&index) else {
                continue;
            };
            let chunk = Arc::clone(chunk);
            chunk.index.store(RECYCLED, Ordering::Release);

            if tail - producer < self.max_pooled_chunks {
                tail += 1;
                chunk.index.store(tail, Ordering::Release);
                chunks.insert(tail, chunk);
                pooled += 1;
            } else {
                dropped += 1;
            }
        }
        self.tail_chunk.store(tail, Ordering::Release);
        self.unlock_rotation(producer);

        debug_log!(
            head = end,
            tail,
            pooled,
            dropped,
            "reclaimed consumed chunks"
        );
        true
    }

    /// Runs `f` on the live chunk holding `sequence`, if any.
    #[inline]
    fn with_chunk<R>(&self, sequence: i64, f: impl FnOnce(&Chunk<E>, usize) -> R) -> Option<R> {
        let index = self.chunk_index(sequence);
        let chunks = self.chunks.pin();
        let chunk = chunks.get(&index)?;
        // A mismatching index means the chunk was recycled under us.
        if chunk.index.load(Ordering::Acquire) != index {
            return None;
        }
        Some(f(&**chunk, sequence.get_index_from(self.index_mask)))
    }

    /// Marks `sequence` as published.
    ///
    /// # Panics
    ///
    /// Panics if `sequence` was never claimed.
    pub fn set_published(&self, sequence: i64) {
        let stored = self.with_chunk(sequence, |chunk, offset| {
            chunk.published[offset].store(sequence, Ordering::Release);
        });
        assert!(
            stored.is_some(),
            "published sequence {sequence} is not backed by a live chunk"
        );
    }

    /// Whether `sequence` is published and still backed by a live chunk.
    ///
    /// Reclaimed sequences report `false`, as do slots a recycled chunk last
    /// published under an older sequence.
    #[inline]
    pub fn is_published(&self, sequence: i64) -> bool {
        self.with_chunk(sequence, |chunk, offset| {
            chunk.published[offset].load(Ordering::Acquire) == sequence
        })
        .unwrap_or(false)
    }
}

impl<E> DataProvider<E> for ChunkedBuffer<E> {
    /// # Panics
    ///
    /// Panics if `sequence` is not backed by a live chunk, meaning it was never
    /// claimed or has already been reclaimed.
    fn slot(&self, sequence: i64) -> *mut E {
        match self.with_chunk(sequence, |chunk, offset| chunk.slots[offset].get()) {
            Some(slot) => slot,
            None => panic!("sequence {sequence} is not backed by a live chunk"),
        }
    }
}
