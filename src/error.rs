//! Expected, recoverable signals raised by claim and wait operations.
//!
//! Protocol misuse (bad capacity, claiming more than the ring can ever hold,
//! out-of-range worker index) is not represented here; it panics at the call site.

/// A non-blocking claim could not be satisfied without lapping a gating consumer.
///
/// Nothing was claimed when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("insufficient capacity to claim {requested} sequence(s)")]
pub struct InsufficientCapacity {
    pub requested: i64,
}

/// The interrupt flag passed to `next_interruptibly` was raised while the
/// producer was waiting for capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("claim interrupted while waiting for capacity")]
pub struct Interrupted;

/// Why a `wait_for` returned without reaching its target sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The barrier was alerted; the waiting thread should leave its loop.
    #[error("barrier alerted")]
    Alerted,
    /// A timeout-bounded wait strategy gave up.
    #[error("timed out waiting for sequence {sequence}")]
    Timeout { sequence: i64 },
}

impl WaitError {
    pub fn is_alert(&self) -> bool {
        matches!(self, WaitError::Alerted)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}
