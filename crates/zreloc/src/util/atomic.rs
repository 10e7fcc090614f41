//! Atomic Utilities
//!
//! Helper functions for atomic operations.

use std::sync::atomic::{AtomicU32, Ordering};

/// AtomicUtils - utility for atomic operations
pub struct AtomicUtils;

impl AtomicUtils {
    /// Increment `counter` unless it is zero
    ///
    /// Returns true if the increment happened.
    pub fn increment_if_positive(counter: &AtomicU32) -> bool {
        let mut current = counter.load(Ordering::Acquire);

        loop {
            if current == 0 {
                return false;
            }

            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Spin wait with backoff
    ///
    /// Returns false if `condition` still fails after `max_spins` rounds.
    pub fn spin_wait<F>(mut condition: F, max_spins: usize) -> bool
    where
        F: FnMut() -> bool,
    {
        let backoff = crossbeam::utils::Backoff::new();
        let mut spins = 0;

        while !condition() {
            if spins >= max_spins {
                return false;
            }

            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
            spins += 1;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_if_positive() {
        let counter = AtomicU32::new(1);
        assert!(AtomicUtils::increment_if_positive(&counter));
        assert_eq!(counter.load(Ordering::Relaxed), 2);

        let zero = AtomicU32::new(0);
        assert!(!AtomicUtils::increment_if_positive(&zero));
        assert_eq!(zero.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_spin_wait_times_out() {
        assert!(!AtomicUtils::spin_wait(|| false, 10));
        assert!(AtomicUtils::spin_wait(|| true, 0));
    }

    #[test]
    fn test_spin_wait_observes_other_thread() {
        let counter = Arc::new(AtomicU32::new(3));
        let worker = {
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                for _ in 0..3 {
                    counter.fetch_sub(1, Ordering::Release);
                }
            })
        };

        assert!(AtomicUtils::spin_wait(
            || counter.load(Ordering::Acquire) == 0,
            usize::MAX
        ));
        worker.join().unwrap();
    }
}
