//! Registry of the consumer sequences a producer must not lap.

use crate::sequence::Sequence;
use crossbeam_utils::CachePadded;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out process-unique consumer barrier ids.
#[derive(Debug)]
pub(crate) struct BarrierIds {
    id: CachePadded<AtomicU64>,
}

impl BarrierIds {
    const fn new() -> Self {
        Self {
            id: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.id.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) static BARRIER_IDS: BarrierIds = BarrierIds::new();

/// Gating sequences keyed by the id of the barrier that owns them.
///
/// A multi-consumer barrier registers one sequence per member, so the slowest
/// member gates the producer.
#[derive(Debug, Default)]
pub(crate) struct GatingSequences {
    barriers: papaya::HashMap<u64, Box<[Arc<Sequence>]>>,
}

impl GatingSequences {
    pub(crate) fn add(&self, id: u64, sequences: Vec<Arc<Sequence>>) {
        self.barriers
            .pin()
            .insert(id, sequences.into_boxed_slice());
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.barriers.pin().remove(&id).is_some()
    }

    /// Slowest registered sequence, or `default` when nothing is registered.
    pub(crate) fn minimum(&self, default: i64) -> i64 {
        let barriers = self.barriers.pin();
        barriers
            .values()
            .flat_map(|sequences| sequences.iter())
            .map(|sequence| sequence.get_volatile())
            .fold(default, i64::min)
    }

    /// Slowest registered sequence, or `None` when nothing is registered.
    pub(crate) fn minimum_registered(&self) -> Option<i64> {
        let barriers = self.barriers.pin();
        barriers
            .values()
            .flat_map(|sequences| sequences.iter())
            .map(|sequence| sequence.get_volatile())
            .min()
    }

    pub(crate) fn len(&self) -> usize {
        self.barriers.len()
    }
}
