//! Retry policy and the cancellable backoff timer.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Bounded backoff for transient handler failures.
///
/// The delay before retry `n` is `base_delay * n * scale_factor`, capped at
/// `max_delay`: linear-times-scale growth rather than unbounded
/// exponential, keeping worst-case per-message latency predictable. The
/// first attempt never counts against `max_retries`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub scale_factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            scale_factor: 2,
            max_delay: Duration::from_millis(30000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        (self.base_delay * retry * self.scale_factor).min(self.max_delay)
    }
}

/// Cooperative cancellation shared by consumer workers.
///
/// `wait_timeout` doubles as the backoff sleep: it blocks for the given
/// duration but returns early, reporting `true`, when the token is
/// cancelled, so stopping a consumer interrupts an in-flight backoff.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for `timeout` or until cancelled. Returns `true` when the wait
    /// ended because of cancellation.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);

        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, wait) = condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
            if wait.timed_out() {
                break;
            }
        }

        *cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn delays_grow_linearly_and_cap() {
        let policy = RetryPolicy::default();

        let delays: Vec<Duration> = (1..=20).map(|n| policy.delay_for(n)).collect();

        assert_eq!(delays[0], Duration::from_millis(2000));
        assert_eq!(delays[1], Duration::from_millis(4000));
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
        assert_eq!(*delays.last().unwrap(), policy.max_delay);
    }

    #[test]
    fn wait_runs_to_timeout_when_not_cancelled() {
        let token = CancelToken::new();
        let started = Instant::now();

        assert!(!token.wait_timeout(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn cancel_interrupts_a_waiting_timer() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = thread::spawn(move || {
            let started = Instant::now();
            let cancelled = waiter.wait_timeout(Duration::from_secs(30));
            (cancelled, started.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (cancelled, elapsed) = handle.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn wait_returns_immediately_once_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.wait_timeout(Duration::from_secs(30)));
        assert!(token.is_cancelled());
    }
}
