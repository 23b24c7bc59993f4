//! Fixed-window rate limiting for outbound messages.
//!
//! Every send goes through [`RateLimiter::try_acquire`], regardless of the
//! destination. Counting restarts at discrete window boundaries, so a burst
//! straddling a boundary can reach twice the capacity.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default number of messages per window.
pub const DEFAULT_CAPACITY: u32 = 30;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// A fixed-window permit counter shared by all outbound paths.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Takes one permit from the current window.
    ///
    /// Returns `false` when the window is exhausted; callers drop the message.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        // A poisoned lock only means another thread panicked mid-update; the
        // counter is still usable.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }

        if state.count < self.capacity {
            state.count += 1;
            true
        } else {
            false
        }
    }

    /// Permits left in the current window, as of the last acquisition.
    pub fn remaining(&self) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.capacity.saturating_sub(state.count)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_fourth_acquire_in_window_is_denied() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let results: Vec<bool> = (0..4).map(|_| limiter.try_acquire()).collect();
        assert_eq!(results, vec![true, true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_duration() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        advance(Duration::from_secs(59)).await;
        assert!(!limiter.try_acquire());

        advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
        assert_eq!(limiter.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_burst_is_bounded_by_twice_capacity() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        advance(Duration::from_secs(9)).await;
        let before = (0..10).filter(|_| limiter.try_acquire()).count();
        advance(Duration::from_secs(1)).await;
        let after = (0..10).filter(|_| limiter.try_acquire()).count();
        assert_eq!(before, 5);
        assert_eq!(after, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquires_never_exceed_capacity() {
        let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(3600)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { (0..20).filter(|_| limiter.try_acquire()).count() })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            granted += handle.await.unwrap();
        }
        assert_eq!(granted, 50);
    }
}
