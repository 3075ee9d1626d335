//! Exponential restart delay, shared by process restarts and SBS reconnects.

use std::time::Duration;

/// Delay before the first retry after a failure.
pub const BASE_BACKOFF_MS: u64 = 1000;

/// Default ceiling for the retry delay.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Doubling delay capped at a maximum.
///
/// `next_delay` hands out the current delay and doubles it for the next
/// failure; `reset` goes back to the base after a clean start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        let base_ms = base_ms.max(1);
        let max_ms = max_ms.max(base_ms);
        Backoff {
            base_ms,
            max_ms,
            current_ms: base_ms,
        }
    }

    /// Delay to use now; the stored delay doubles up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }

    /// Delay the next failure will wait.
    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    pub fn base_ms(&self) -> u64 {
        self.base_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(BASE_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_then_plateaus() {
        let mut b = Backoff::new(1000, 10_000);
        let delays: Vec<u64> = (0..7).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn test_strictly_increasing_until_cap() {
        let mut b = Backoff::new(1000, 60_000);
        let mut prev = b.next_delay();
        for _ in 0..20 {
            let next = b.next_delay();
            if prev.as_millis() < 60_000 {
                assert!(next > prev);
            } else {
                assert_eq!(next, prev);
            }
            prev = next;
        }
    }

    #[test]
    fn test_reset() {
        let mut b = Backoff::new(1000, 30_000);
        b.next_delay();
        b.next_delay();
        assert_eq!(b.current_ms(), 4000);
        b.reset();
        assert_eq!(b.current_ms(), 1000);
    }

    #[test]
    fn test_max_below_base() {
        let mut b = Backoff::new(1000, 10);
        assert_eq!(b.max_ms(), 1000);
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_no_overflow() {
        let mut b = Backoff::new(1, u64::MAX);
        for _ in 0..100 {
            b.next_delay();
        }
        assert_eq!(b.current_ms(), u64::MAX);
    }
}
