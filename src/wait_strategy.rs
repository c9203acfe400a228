//! Pluggable algorithms a consumer uses while waiting for a sequence.
//!
//! | strategy   | latency  | cpu      | notes                                   |
//! |------------|----------|----------|-----------------------------------------|
//! | BusySpin   | lowest   | 100%     | dedicated cores only                    |
//! | Yielding   | low      | high     | spins, then gives up its time slice     |
//! | Sleeping   | moderate | low      | spins, yields, then sleeps              |
//! | Blocking   | highest  | lowest   | parks on the producer's blocker         |
//!
//! Every strategy re-checks the barrier's alert flag on each iteration, and all
//! but `BusySpin` accept an optional timeout. The consumer barrier turns that
//! timeout into one deadline per wait, so a wait that keeps running into a
//! claimed but unpublished sequence still gives up on time.

use crate::blocker::SequenceBlocker;
use crate::consumer_barrier::ConsumerBarrier;
use crate::error::WaitError;
use crate::producer_barrier::ProducerBarrier;
use std::fmt;
use std::hint;
use std::thread;
use std::time::{Duration, Instant};

/// Waits until the barrier's dependent sequence reaches `sequence`.
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Returns the dependent sequence once it is `>= sequence`.
    ///
    /// # Errors
    ///
    /// [`WaitError::Alerted`] when the barrier is alerted while waiting and
    /// [`WaitError::Timeout`] once `deadline` has passed.
    fn wait_for(
        &self,
        sequence: i64,
        producer: &dyn ProducerBarrier,
        blocker: Option<&SequenceBlocker>,
        barrier: &dyn ConsumerBarrier,
        deadline: Option<Instant>,
    ) -> Result<i64, WaitError>;

    /// How long a single consumer wait may take before it fails with
    /// [`WaitError::Timeout`]. `None` waits forever.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Backs off once while the dependent sequence has been claimed but the
    /// slot behind it is not yet published. `attempt` counts from zero.
    fn back_off(&self, _attempt: u32) {
        hint::spin_loop();
    }

    /// Whether producers must own a [`SequenceBlocker`] for this strategy to wake up.
    fn requires_blocker(&self) -> bool {
        false
    }
}

#[inline]
pub(crate) fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|timeout| Instant::now() + timeout)
}

#[inline]
pub(crate) fn check_deadline(deadline: Option<Instant>, sequence: i64) -> Result<(), WaitError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => {
            trace_log!(sequence, "wait timed out");
            Err(WaitError::Timeout { sequence })
        }
        _ => Ok(()),
    }
}

/// Re-reads the dependent sequence in a tight loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _producer: &dyn ProducerBarrier,
        _blocker: Option<&SequenceBlocker>,
        barrier: &dyn ConsumerBarrier,
        _deadline: Option<Instant>,
    ) -> Result<i64, WaitError> {
        loop {
            let available = barrier.dependent_sequence();
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            hint::spin_loop();
        }
    }
}

/// Spins `spin_tries` times, then yields the thread on every further miss.
#[derive(Debug, Clone, Copy)]
pub struct YieldingWaitStrategy {
    spin_tries: u32,
    timeout: Option<Duration>,
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new(100)
    }
}

impl YieldingWaitStrategy {
    pub const fn new(spin_tries: u32) -> Self {
        Self {
            spin_tries,
            timeout: None,
        }
    }

    pub const fn with_timeout(spin_tries: u32, timeout: Duration) -> Self {
        Self {
            spin_tries,
            timeout: Some(timeout),
        }
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _producer: &dyn ProducerBarrier,
        _blocker: Option<&SequenceBlocker>,
        barrier: &dyn ConsumerBarrier,
        deadline: Option<Instant>,
    ) -> Result<i64, WaitError> {
        let mut counter = self.spin_tries;
        loop {
            let available = barrier.dependent_sequence();
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;

            if counter > 0 {
                counter -= 1;
                hint::spin_loop();
            } else {
                check_deadline(deadline, sequence)?;
                thread::yield_now();
            }
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn back_off(&self, attempt: u32) {
        if attempt < self.spin_tries {
            hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}

/// Spins, then yields, then sleeps `sleep_nanos` between re-reads.
#[derive(Debug, Clone, Copy)]
pub struct SleepingWaitStrategy {
    spin_tries: u32,
    yield_tries: u32,
    sleep_nanos: u64,
    timeout: Option<Duration>,
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new(100, 100, 1_000)
    }
}

impl SleepingWaitStrategy {
    pub const fn new(spin_tries: u32, yield_tries: u32, sleep_nanos: u64) -> Self {
        Self {
            spin_tries,
            yield_tries,
            sleep_nanos,
            timeout: None,
        }
    }

    pub const fn with_timeout(
        spin_tries: u32,
        yield_tries: u32,
        sleep_nanos: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            spin_tries,
            yield_tries,
            sleep_nanos,
            timeout: Some(timeout),
        }
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _producer: &dyn ProducerBarrier,
        _blocker: Option<&SequenceBlocker>,
        barrier: &dyn ConsumerBarrier,
        deadline: Option<Instant>,
    ) -> Result<i64, WaitError> {
        let mut spins = self.spin_tries;
        let mut yields = self.yield_tries;
        loop {
            let available = barrier.dependent_sequence();
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;

            if spins > 0 {
                spins -= 1;
                hint::spin_loop();
            } else if yields > 0 {
                yields -= 1;
                check_deadline(deadline, sequence)?;
                thread::yield_now();
            } else {
                check_deadline(deadline, sequence)?;
                thread::sleep(Duration::from_nanos(self.sleep_nanos));
            }
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn back_off(&self, attempt: u32) {
        if attempt < self.spin_tries {
            hint::spin_loop();
        } else if attempt - self.spin_tries < self.yield_tries {
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_nanos(self.sleep_nanos));
        }
    }
}

/// Parks on the producer's [`SequenceBlocker`] until the producer reaches
/// `sequence`, then sleeps in `sleep_nanos` steps until upstream consumers
/// catch up.
///
/// A publish is the only event worth a wake-up; a slow upstream stage is just
/// polled.
#[derive(Debug, Clone, Copy)]
pub struct BlockingWaitStrategy {
    sleep_nanos: u64,
    timeout: Option<Duration>,
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingWaitStrategy {
    pub const fn new() -> Self {
        Self {
            sleep_nanos: 10,
            timeout: None,
        }
    }

    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            sleep_nanos: 10,
            timeout: Some(timeout),
        }
    }

    pub const fn sleep_nanos(mut self, sleep_nanos: u64) -> Self {
        self.sleep_nanos = sleep_nanos;
        self
    }

    fn wait_for_producer(
        &self,
        sequence: i64,
        producer: &dyn ProducerBarrier,
        blocker: Option<&SequenceBlocker>,
        barrier: &dyn ConsumerBarrier,
        deadline: Option<Instant>,
    ) -> Result<(), WaitError> {
        let Some(blocker) = blocker else {
            // Unwired blocker: poll the producer instead of parking forever.
            while producer.sequence() < sequence {
                barrier.check_alert()?;
                check_deadline(deadline, sequence)?;
                thread::sleep(Duration::from_nanos(self.sleep_nanos));
            }
            return Ok(());
        };

        let mut guard = blocker.lock();
        while producer.sequence() < sequence {
            barrier.check_alert()?;
            match deadline {
                None => blocker.wait(&mut guard),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        trace_log!(sequence, "blocking wait timed out");
                        return Err(WaitError::Timeout { sequence });
                    }
                    blocker.wait_timeout(&mut guard, deadline - now);
                }
            }
        }
        Ok(())
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        producer: &dyn ProducerBarrier,
        blocker: Option<&SequenceBlocker>,
        barrier: &dyn ConsumerBarrier,
        deadline: Option<Instant>,
    ) -> Result<i64, WaitError> {
        if producer.sequence() < sequence {
            self.wait_for_producer(sequence, producer, blocker, barrier, deadline)?;
        }

        loop {
            let available = barrier.dependent_sequence();
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            check_deadline(deadline, sequence)?;
            thread::sleep(Duration::from_nanos(self.sleep_nanos));
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn back_off(&self, _attempt: u32) {
        thread::sleep(Duration::from_nanos(self.sleep_nanos));
    }

    fn requires_blocker(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer_barrier::SingleConsumerBarrier;
    use crate::single_producer::SingleProducerBarrier;
    use std::sync::Arc;

    fn wire(
        strategy: Arc<dyn WaitStrategy>,
    ) -> (Arc<SingleProducerBarrier>, Arc<SingleConsumerBarrier>) {
        let producer = Arc::new(SingleProducerBarrier::new(8, true, 100));
        let barrier = Arc::new(SingleConsumerBarrier::new(
            producer.clone(),
            strategy,
            Vec::new(),
        ));
        (producer, barrier)
    }

    fn all_strategies() -> Vec<Arc<dyn WaitStrategy>> {
        vec![
            Arc::new(BusySpinWaitStrategy),
            Arc::new(YieldingWaitStrategy::default()),
            Arc::new(SleepingWaitStrategy::default()),
            Arc::new(BlockingWaitStrategy::new()),
        ]
    }

    #[test]
    fn test_returns_immediately_when_available() {
        for strategy in all_strategies() {
            let (producer, barrier) = wire(strategy.clone());
            let hi = producer.next_n(3);
            producer.publish(hi);

            let available = strategy
                .wait_for(1, &*producer, producer.blocker(), &*barrier, None)
                .unwrap();
            assert_eq!(available, 2, "{strategy:?}");
        }
    }

    #[test]
    fn test_wakes_on_publish() {
        for strategy in all_strategies() {
            let (producer, barrier) = wire(strategy.clone());

            let waiter = {
                let producer = producer.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    strategy.wait_for(0, &*producer, producer.blocker(), &*barrier, None)
                })
            };

            thread::sleep(Duration::from_millis(10));
            let sequence = producer.next();
            producer.publish(sequence);

            assert_eq!(waiter.join().unwrap(), Ok(0));
        }
    }

    #[test]
    fn test_alert_interrupts_every_strategy() {
        for strategy in all_strategies() {
            let (producer, barrier) = wire(strategy.clone());

            let waiter = {
                let producer = producer.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    strategy.wait_for(0, &*producer, producer.blocker(), &*barrier, None)
                })
            };

            thread::sleep(Duration::from_millis(10));
            barrier.alert();
            assert_eq!(waiter.join().unwrap(), Err(WaitError::Alerted));
        }
    }

    #[test]
    fn test_timeout_variants_give_up() {
        let timeouts: Vec<Arc<dyn WaitStrategy>> = vec![
            Arc::new(YieldingWaitStrategy::with_timeout(10, Duration::from_millis(5))),
            Arc::new(SleepingWaitStrategy::with_timeout(
                10,
                10,
                1_000,
                Duration::from_millis(5),
            )),
            Arc::new(BlockingWaitStrategy::with_timeout(Duration::from_millis(5))),
        ];

        for strategy in timeouts {
            let (producer, barrier) = wire(strategy.clone());
            let started = Instant::now();
            let deadline = deadline(strategy.timeout());
            let result = strategy.wait_for(0, &*producer, producer.blocker(), &*barrier, deadline);
            assert_eq!(result, Err(WaitError::Timeout { sequence: 0 }), "{strategy:?}");
            assert!(started.elapsed() >= Duration::from_millis(5));
        }
    }

    #[test]
    fn test_blocking_without_blocker_still_wakes() {
        let producer = Arc::new(SingleProducerBarrier::new(8, false, 100));
        let strategy: Arc<dyn WaitStrategy> = Arc::new(BlockingWaitStrategy::new());
        let barrier = Arc::new(SingleConsumerBarrier::new(
            producer.clone(),
            strategy.clone(),
            Vec::new(),
        ));

        let waiter = {
            let producer = producer.clone();
            let barrier = barrier.clone();
            thread::spawn(move || strategy.wait_for(0, &*producer, None, &*barrier, None))
        };

        thread::sleep(Duration::from_millis(10));
        let sequence = producer.next();
        producer.publish(sequence);
        assert_eq!(waiter.join().unwrap(), Ok(0));
    }

    #[test]
    fn test_only_blocking_requires_blocker() {
        assert!(!BusySpinWaitStrategy.requires_blocker());
        assert!(!YieldingWaitStrategy::default().requires_blocker());
        assert!(!SleepingWaitStrategy::default().requires_blocker());
        assert!(BlockingWaitStrategy::new().requires_blocker());
    }

    #[test]
    fn test_only_timeout_variants_report_a_timeout() {
        let limit = Duration::from_millis(5);
        assert_eq!(BusySpinWaitStrategy.timeout(), None);
        assert_eq!(YieldingWaitStrategy::default().timeout(), None);
        assert_eq!(YieldingWaitStrategy::with_timeout(1, limit).timeout(), Some(limit));
        assert_eq!(
            SleepingWaitStrategy::with_timeout(1, 1, 10, limit).timeout(),
            Some(limit)
        );
        assert_eq!(BlockingWaitStrategy::with_timeout(limit).timeout(), Some(limit));
    }

    #[test]
    fn test_sleeping_back_off_escalates_to_sleep() {
        let strategy = SleepingWaitStrategy::new(2, 2, 2_000_000);

        for attempt in 0..4 {
            strategy.back_off(attempt);
        }

        let started = Instant::now();
        strategy.back_off(4);
        assert!(started.elapsed() >= Duration::from_millis(2));
    }
}
