//! Fixed-window admission gate for apply operations.
//!
//! [`BatchTimer`] is a burst-then-pause limiter, not a smooth one: it admits
//! up to `max_per_window` operations immediately, then the next caller sleeps
//! until the current window has elapsed and a fresh window begins. Destination
//! APIs enforce request quotas per time window, so pacing the *start* of
//! concurrent operations this way keeps a run under quota.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Used when a non-positive batch size is configured.
pub const DEFAULT_MAX_PER_WINDOW: u32 = 50;

/// Used when a non-positive window length is configured.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Burst-then-pause admission gate.
#[derive(Debug)]
pub struct BatchTimer {
    max_per_window: u32,
    window: Duration,
    admitted: u32,
    window_start: Option<Instant>,
}

impl BatchTimer {
    /// Create a gate admitting at most `max_per_window` operations per
    /// `window_secs` seconds. Zero for either falls back to the defaults.
    pub fn new(max_per_window: u32, window_secs: u64) -> Self {
        let max_per_window = if max_per_window == 0 {
            DEFAULT_MAX_PER_WINDOW
        } else {
            max_per_window
        };
        let window_secs = if window_secs == 0 {
            DEFAULT_WINDOW_SECS
        } else {
            window_secs
        };
        Self::with_window(max_per_window, Duration::from_secs(window_secs))
    }

    /// Like [`new`](Self::new) but with a sub-second window.
    pub fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window: if window.is_zero() {
                Duration::from_secs(DEFAULT_WINDOW_SECS)
            } else {
                window
            },
            admitted: 0,
            window_start: None,
        }
    }

    pub fn max_per_window(&self) -> u32 {
        self.max_per_window
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until one more operation may start.
    pub async fn admit(&mut self) {
        let now = Instant::now();
        let start = *self.window_start.get_or_insert(now);
        let window_end = start + self.window;

        if now >= window_end {
            self.window_start = Some(now);
            self.admitted = 0;
        } else if self.admitted >= self.max_per_window {
            debug!(
                admitted = self.admitted,
                wait_ms = (window_end - now).as_millis() as u64,
                "batch full, waiting for next window"
            );
            sleep_until(window_end).await;
            self.window_start = Some(Instant::now());
            self.admitted = 0;
        }

        self.admitted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let timer = BatchTimer::new(0, 0);
        assert_eq!(timer.max_per_window(), DEFAULT_MAX_PER_WINDOW);
        assert_eq!(timer.window(), Duration::from_secs(DEFAULT_WINDOW_SECS));

        let timer = BatchTimer::with_window(0, Duration::ZERO);
        assert_eq!(timer.max_per_window(), 1);
        assert_eq!(timer.window(), Duration::from_secs(DEFAULT_WINDOW_SECS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_burst_without_waiting() {
        let mut timer = BatchTimer::new(3, 10);
        let begin = Instant::now();
        for _ in 0..3 {
            timer.admit().await;
        }
        assert_eq!(Instant::now(), begin);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_per_second_five_ops_spans_two_windows() {
        let mut timer = BatchTimer::new(2, 1);
        let begin = Instant::now();
        let mut starts = Vec::new();
        for _ in 0..5 {
            timer.admit().await;
            starts.push(Instant::now() - begin);
        }

        assert!(Instant::now() - begin >= Duration::from_secs(2));

        // No 1-second span contains more than two admissions.
        for (i, a) in starts.iter().enumerate() {
            let in_window = starts[i..]
                .iter()
                .filter(|b| **b - *a < Duration::from_secs(1))
                .count();
            assert!(in_window <= 2, "{in_window} admissions within 1s of {a:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_starts_fresh_window() {
        let mut timer = BatchTimer::new(1, 1);
        let begin = Instant::now();
        timer.admit().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        timer.admit().await;
        let elapsed = Instant::now() - begin;
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    }
}
