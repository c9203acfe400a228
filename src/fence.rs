//! Provides `Fence`, a tiny CAS spin lock.
//!
//! The unbounded buffer uses it as the single-writer lock around head
//! reclamation, and consumers use it to keep one batch in flight per barrier.
//! It is never held across a wait; contention is expected to be rare and hold
//! times a handful of instructions.

use crossbeam_utils::{Backoff, CachePadded};
use std::sync::atomic::{AtomicBool, Ordering};

/// RAII guard for a locked `Fence`. Dropping it releases the lock.
#[derive(Debug)]
pub struct Guard<'a>(&'a Fence);

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.0.flag.store(false, Ordering::Release);
    }
}

/// A spin lock over a padded `AtomicBool`.
#[derive(Debug, Default)]
pub struct Fence {
    flag: CachePadded<AtomicBool>,
}

impl Fence {
    /// Takes the lock if it is free. Never waits.
    #[inline]
    pub fn try_acquire(&self) -> Option<Guard<'_>> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(Guard(self))
        } else {
            None
        }
    }

    /// Spins, then yields, until the lock is taken.
    pub fn acquire(&self) -> Guard<'_> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            backoff.snooze();
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
