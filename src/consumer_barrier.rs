//! Consumer barriers: where consumers wait, and how far they may advance.
//!
//! A barrier waits on its *dependents*: the upstream barriers of a pipeline
//! stage, or the producer itself for the first stage. It never reports a
//! sequence beyond the slowest dependent, so chained stages see every event in
//! order, exactly once.

use crate::error::WaitError;
use crate::fence::Fence;
use crate::gating::BARRIER_IDS;
use crate::producer_barrier::ProducerBarrier;
use crate::sequence::{Sequence, min_sequence};
use crate::wait_strategy::{WaitStrategy, check_deadline, deadline};
use crossbeam_utils::CachePadded;
use std::fmt;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Marks a worker-pool member without an unfinished claim.
const NO_CLAIM: i64 = -1;

/// Where a consumer waits for published sequences.
///
/// Both flavours share one deadline per [`wait_for`](Self::wait_for) call,
/// taken from the wait strategy's timeout.
pub trait ConsumerBarrier: Send + Sync + fmt::Debug {
    /// Unique id, used as the gating registration key.
    fn id(&self) -> u64;

    /// Progress of this barrier as seen by downstream stages and producers.
    fn sequence(&self) -> i64;

    /// The sequences a producer must not lap on behalf of this barrier.
    fn gating_sequences(&self) -> Vec<Arc<Sequence>>;

    /// Slowest upstream sequence, or the producer cursor for a first stage.
    fn dependent_sequence(&self) -> i64;

    /// Blocks until `sequence` is available and returns the highest sequence
    /// that can be consumed without skipping an unpublished one.
    ///
    /// # Errors
    ///
    /// [`WaitError::Alerted`] once the barrier is alerted, or
    /// [`WaitError::Timeout`] from a timeout-bounded wait strategy.
    fn wait_for(&self, sequence: i64) -> Result<i64, WaitError>;

    /// Raises the alert and wakes any thread parked on the producer's blocker.
    fn alert(&self);

    /// Lowers the alert so waits proceed again.
    fn clear_alert(&self);

    /// Whether the alert is raised.
    fn is_alerted(&self) -> bool;

    /// # Errors
    ///
    /// [`WaitError::Alerted`] while the alert is raised.
    fn check_alert(&self) -> Result<(), WaitError> {
        if self.is_alerted() {
            Err(WaitError::Alerted)
        } else {
            Ok(())
        }
    }
}

/// Wiring shared by single- and multi-consumer barriers.
struct BarrierCore {
    id: u64,
    producer: Arc<dyn ProducerBarrier>,
    wait_strategy: Arc<dyn WaitStrategy>,
    dependents: Box<[Arc<dyn ConsumerBarrier>]>,
    alerted: CachePadded<AtomicBool>,
}

impl fmt::Debug for BarrierCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierCore")
            .field("id", &self.id)
            .field("wait_strategy", &self.wait_strategy)
            .field("dependents", &self.dependents.len())
            .field("alerted", &self.alerted.load(Ordering::Relaxed))
            .finish()
    }
}

impl BarrierCore {
    fn new(
        producer: Arc<dyn ProducerBarrier>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<dyn ConsumerBarrier>>,
    ) -> Self {
        Self {
            id: BARRIER_IDS.next_id(),
            producer,
            wait_strategy,
            dependents: dependents.into_boxed_slice(),
            alerted: CachePadded::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    fn dependent_sequence(&self) -> i64 {
        if self.dependents.is_empty() {
            return self.producer.sequence();
        }
        self.dependents
            .iter()
            .map(|dependent| dependent.sequence())
            .fold(i64::MAX, i64::min)
    }

    fn wait_for(&self, sequence: i64, barrier: &dyn ConsumerBarrier) -> Result<i64, WaitError> {
        let deadline = deadline(self.wait_strategy.timeout());
        let mut attempt = 0u32;
        loop {
            barrier.check_alert()?;
            let available = self.wait_strategy.wait_for(
                sequence,
                &*self.producer,
                self.producer.blocker(),
                barrier,
                deadline,
            )?;

            let highest = self
                .producer
                .highest_published_sequence(sequence, available);
            if highest >= sequence {
                return Ok(highest);
            }
            // Claimed by a producer but not yet published.
            check_deadline(deadline, sequence)?;
            self.wait_strategy.back_off(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        debug_log!(barrier = self.id, "barrier alerted");
        self.producer.signal_all_when_blocking();
    }

    fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
        debug_log!(barrier = self.id, "barrier alert cleared");
    }

    #[inline]
    fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }
}

/// Barrier for one consumer thread owning one progress sequence.
#[derive(Debug)]
pub struct SingleConsumerBarrier {
    core: BarrierCore,
    progress: Arc<Sequence>,
    /// Keeps a single batch in flight at a time.
    fence: Fence,
}

impl SingleConsumerBarrier {
    /// Creates a barrier waiting on `dependents`, or on `producer` directly
    /// when there are none.
    pub fn new(
        producer: Arc<dyn ProducerBarrier>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<dyn ConsumerBarrier>>,
    ) -> Self {
        Self {
            core: BarrierCore::new(producer, wait_strategy, dependents),
            progress: Arc::new(Sequence::default()),
            fence: Fence::default(),
        }
    }

    /// This consumer's progress. The consumer stores the last processed
    /// sequence here with [`Sequence::set_release`].
    pub fn progress(&self) -> &Arc<Sequence> {
        &self.progress
    }

    pub(crate) fn fence(&self) -> &Fence {
        &self.fence
    }
}

impl ConsumerBarrier for SingleConsumerBarrier {
    fn id(&self) -> u64 {
        self.core.id
    }

    #[inline]
    fn sequence(&self) -> i64 {
        self.progress.get_volatile()
    }

    fn gating_sequences(&self) -> Vec<Arc<Sequence>> {
        vec![self.progress.clone()]
    }

    #[inline]
    fn dependent_sequence(&self) -> i64 {
        self.core.dependent_sequence()
    }

    fn wait_for(&self, sequence: i64) -> Result<i64, WaitError> {
        self.core.wait_for(sequence, self)
    }

    fn alert(&self) {
        self.core.alert();
    }

    fn clear_alert(&self) {
        self.core.clear_alert();
    }

    fn is_alerted(&self) -> bool {
        self.core.is_alerted()
    }
}

/// Barrier for a worker pool: members claim disjoint sequences from a shared
/// group sequence and each track their own progress.
///
/// A claim stays with its member until [`complete`](Self::complete) is
/// called, so a member whose wait failed picks the same sequence up again on
/// its next [`claim`](Self::claim).
#[derive(Debug)]
pub struct MultiConsumerBarrier {
    core: BarrierCore,
    /// Highest sequence claimed by any member.
    group: Sequence,
    members: Box<[Arc<Sequence>]>,
    /// Per member: the claimed sequence not yet completed, or `NO_CLAIM`.
    pending: Box<[CachePadded<AtomicI64>]>,
}

impl MultiConsumerBarrier {
    /// Creates a pool of `members` workers waiting on `dependents`, or on
    /// `producer` directly when there are none.
    ///
    /// # Panics
    ///
    /// Panics if `members` is zero.
    pub fn new(
        producer: Arc<dyn ProducerBarrier>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<dyn ConsumerBarrier>>,
        members: usize,
    ) -> Self {
        assert!(members > 0, "a consumer group needs at least one member");
        let members = (0..members)
            .map(|_| Arc::new(Sequence::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let pending = (0..members.len())
            .map(|_| CachePadded::new(AtomicI64::new(NO_CLAIM)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            core: BarrierCore::new(producer, wait_strategy, dependents),
            group: Sequence::default(),
            members,
            pending,
        }
    }

    /// Number of workers in the pool.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Progress of member `index`: everything it claimed at or below this
    /// sequence is done.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a member of this group.
    pub fn member_sequence(&self, index: usize) -> &Arc<Sequence> {
        &self.members[index]
    }

    /// Highest sequence claimed by any member, processed or not.
    pub fn group_sequence(&self) -> &Sequence {
        &self.group
    }

    /// The sequence member `index` claimed and has not completed yet.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a member of this group.
    pub fn pending_claim(&self, index: usize) -> Option<i64> {
        let pending = self.pending[index].load(Ordering::Relaxed);
        (pending != NO_CLAIM).then_some(pending)
    }

    /// Claims the next sequence for member `index`, or hands back the one it
    /// claimed earlier and has not completed.
    ///
    /// A fresh claim first moves the member's sequence to just below the
    /// sequence it is about to take, releasing everything it processed before.
    /// A member is driven by one thread at a time.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a member of this group.
    pub fn claim(&self, index: usize) -> i64 {
        if let Some(pending) = self.pending_claim(index) {
            return pending;
        }

        let member = &self.members[index];
        loop {
            let current = self.group.get_volatile();
            member.set_release(current);
            if self.group.compare_and_set(current, current + 1) {
                self.pending[index].store(current + 1, Ordering::Relaxed);
                return current + 1;
            }
            hint::spin_loop();
        }
    }

    /// Marks `sequence`, claimed by member `index`, as processed.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a member of this group.
    pub fn complete(&self, index: usize, sequence: i64) {
        self.pending[index].store(NO_CLAIM, Ordering::Relaxed);
        self.members[index].set_release(sequence);
    }
}

impl ConsumerBarrier for MultiConsumerBarrier {
    fn id(&self) -> u64 {
        self.core.id
    }

    /// The slowest member; no member is still working on anything at or below it.
    #[inline]
    fn sequence(&self) -> i64 {
        min_sequence(self.members.iter().map(|member| &**member), i64::MAX)
    }

    fn gating_sequences(&self) -> Vec<Arc<Sequence>> {
        self.members.to_vec()
    }

    #[inline]
    fn dependent_sequence(&self) -> i64 {
        self.core.dependent_sequence()
    }

    fn wait_for(&self, sequence: i64) -> Result<i64, WaitError> {
        self.core.wait_for(sequence, self)
    }

    fn alert(&self) {
        self.core.alert();
    }

    fn clear_alert(&self) {
        self.core.clear_alert();
    }

    fn is_alerted(&self) -> bool {
        self.core.is_alerted()
    }
}
