use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A small, blocking counting semaphore.
///
/// Caps the number of units executing at once, independently of the worker count.
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits.max(1)),
            cv: Condvar::new(),
        }
    }

    /// Acquire one permit, blocking until available.
    ///
    /// Returns the time spent waiting (zero if no wait was required). The permit is returned
    /// when the guard drops.
    pub(crate) fn acquire(&self) -> (Permit<'_>, Duration) {
        let start = Instant::now();
        let mut waited = false;
        // The counter stays consistent even if a holder panicked.
        let mut g = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        while *g == 0 {
            waited = true;
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        *g -= 1;
        let wait = if waited { start.elapsed() } else { Duration::ZERO };
        (Permit { sem: self }, wait)
    }

    fn release(&self) {
        let mut g = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *g += 1;
        self.cv.notify_one();
    }
}

/// One held permit.
pub(crate) struct Permit<'a> {
    sem: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}
