//! One-shot countdown latch with timeout-able await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A one-shot latch: a count that is decremented toward zero, and a single
/// await that blocks until zero is reached or a timeout elapses.
///
/// Misuse faults: counting down past zero, counting down after the await
/// finished, and awaiting twice are programming errors and panic.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
/// use std::time::Duration;
/// use stemma::CountDownLatch;
///
/// let latch = Arc::new(CountDownLatch::new(2));
/// let signaller = Arc::clone(&latch);
/// thread::spawn(move || {
///     signaller.count_down();
///     signaller.count_down();
/// });
/// let timed_out = latch.await_timeout(Duration::from_secs(100));
/// assert!(!timed_out);
/// ```
#[derive(Debug)]
pub struct CountDownLatch {
    count: Mutex<u32>,
    zero_reached: Condvar,
    timed_out: AtomicBool,
    completed: AtomicBool,
}

impl CountDownLatch {
    /// A latch requiring `count` count-downs.
    #[must_use]
    pub fn new(count: u32) -> Self {
        Self {
            count: Mutex::new(count),
            zero_reached: Condvar::new(),
            timed_out: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    /// Returns `true` once an await has finished.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Returns `true` if an await gave up before the count reached zero.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Decrements the count by one, waking the awaiter on zero.
    ///
    /// # Panics
    ///
    /// Panics when the latch has already completed or the count is already
    /// zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        assert!(!self.completed(), "latch already completed");
        assert!(*count > 0, "latch count already zero");
        *count -= 1;
        if *count == 0 {
            self.zero_reached.notify_all();
        }
    }

    /// Waits up to `timeout` for the count to reach zero. Returns `true`
    /// when the wait timed out, `false` when zero was reached.
    ///
    /// # Panics
    ///
    /// Panics when the latch has already completed (one-shot contract).
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        assert!(!self.completed(), "latch already completed");
        let deadline = Instant::now() + timeout;
        while *count > 0 {
            if self.zero_reached.wait_until(&mut count, deadline).timed_out() {
                self.timed_out.store(true, Ordering::Release);
                self.completed.store(true, Ordering::Release);
                return true;
            }
        }
        self.completed.store(true, Ordering::Release);
        false
    }

    /// Waits up to `timeout` for the count to reach zero without consuming
    /// the one-shot await. Returns `true` on timeout.
    ///
    /// Several transactions may block on one conflicting transaction's
    /// latch, so this path tolerates any number of concurrent or repeated
    /// waiters.
    pub(crate) fn wait_zero(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        let deadline = Instant::now() + timeout;
        while *count > 0 {
            if self.zero_reached.wait_until(&mut count, deadline).timed_out() {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;

    #[rstest]
    fn test_await_returns_false_once_count_reaches_zero() {
        let latch = Arc::new(CountDownLatch::new(2));
        let signaller = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signaller.count_down();
            thread::sleep(Duration::from_millis(50));
            signaller.count_down();
        });
        let started = Instant::now();
        let timed_out = latch.await_timeout(Duration::from_secs(100));
        handle.join().expect("signaller panicked");
        assert!(!timed_out);
        assert!(latch.completed());
        assert!(!latch.timed_out());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[rstest]
    fn test_await_times_out_when_count_stays_positive() {
        let latch = CountDownLatch::new(1);
        let timed_out = latch.await_timeout(Duration::from_millis(30));
        assert!(timed_out);
        assert!(latch.timed_out());
        assert!(latch.completed());
    }

    #[rstest]
    #[should_panic(expected = "latch count already zero")]
    fn test_over_count_down_faults() {
        let latch = CountDownLatch::new(1);
        latch.count_down();
        latch.count_down();
    }

    #[rstest]
    #[should_panic(expected = "latch already completed")]
    fn test_double_await_faults() {
        let latch = CountDownLatch::new(0);
        let _ = latch.await_timeout(Duration::from_millis(1));
        let _ = latch.await_timeout(Duration::from_millis(1));
    }

    #[rstest]
    #[should_panic(expected = "latch already completed")]
    fn test_count_down_after_completion_faults() {
        let latch = CountDownLatch::new(1);
        let _ = latch.await_timeout(Duration::from_millis(1));
        latch.count_down();
    }

    #[rstest]
    fn test_wait_zero_tolerates_many_waiters() {
        let latch = Arc::new(CountDownLatch::new(1));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait_zero(Duration::from_secs(5)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        latch.count_down();
        for waiter in waiters {
            assert!(!waiter.join().expect("waiter panicked"));
        }
    }
}
