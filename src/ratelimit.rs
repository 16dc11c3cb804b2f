//! Per-connection rate limiter (part of C2): a 1-second sliding window with
//! a reset-on-expiry counter, not a token bucket.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

pub struct RateLimiter {
    cap: u32,
    count: u32,
    window_started_at: Instant,
}

impl RateLimiter {
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            count: 0,
            window_started_at: Instant::now(),
        }
    }

    /// Records one frame against the current window. Returns `true` if the
    /// frame should be processed, `false` if it overflows the cap and must
    /// be dropped with `ERROR{RATE_LIMITED}`.
    pub fn record(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_started_at) >= WINDOW {
            self.window_started_at = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_cap_within_window() {
        let mut limiter = RateLimiter::new(3);
        assert!(limiter.record());
        assert!(limiter.record());
        assert!(limiter.record());
        assert!(!limiter.record());
    }

    #[test]
    fn resets_after_window_elapses() {
        let mut limiter = RateLimiter::new(1);
        assert!(limiter.record());
        assert!(!limiter.record());
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.record());
    }

    #[test]
    fn s6_150_frames_in_one_second_allows_exactly_100() {
        let mut limiter = RateLimiter::new(100);
        let allowed = (0..150).filter(|_| limiter.record()).count();
        assert_eq!(allowed, 100);
    }
}
