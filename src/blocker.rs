//! Lock + condition pair used only by the blocking wait strategies.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Lets a producer (or an alert) wake consumers parked in a blocking wait.
///
/// Waiters must re-check their wake condition while holding the lock returned
/// by [`SequenceBlocker::lock`]; [`SequenceBlocker::signal_all`] takes the same
/// lock before notifying, so a signal can never slip in between a waiter's check
/// and its park.
#[derive(Debug, Default)]
pub struct SequenceBlocker {
    lock: Mutex<()>,
    condition: Condvar,
}

impl SequenceBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Parks until signalled. Spurious wake-ups are possible.
    #[inline]
    pub fn wait(&self, guard: &mut MutexGuard<'_, ()>) {
        self.condition.wait(guard);
    }

    /// Parks until signalled or `timeout` elapses. Returns `true` on timeout.
    #[inline]
    pub fn wait_timeout(&self, guard: &mut MutexGuard<'_, ()>, timeout: Duration) -> bool {
        self.condition.wait_for(guard, timeout).timed_out()
    }

    /// Wakes every parked waiter.
    pub fn signal_all(&self) {
        let _guard = self.lock.lock();
        self.condition.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_signal_wakes_all_waiters() {
        let blocker = Arc::new(SequenceBlocker::new());
        let ready = Arc::new(AtomicBool::new(false));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let blocker = Arc::clone(&blocker);
                let ready = Arc::clone(&ready);
                thread::spawn(move || {
                    let mut guard = blocker.lock();
                    while !ready.load(Ordering::Acquire) {
                        blocker.wait(&mut guard);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        ready.store(true, Ordering::Release);
        blocker.signal_all();

        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_wait_timeout_expires() {
        let blocker = SequenceBlocker::new();
        let mut guard = blocker.lock();
        assert!(blocker.wait_timeout(&mut guard, Duration::from_millis(5)));
    }
}
